//! Aegis Common - Shared types and traits
//!
//! This crate provides the data model, error taxonomy and capability traits
//! used across the Aegis scan orchestration ecosystem.
//!
//! Key pieces:
//! - Findings, scan records and schedules with serde support
//! - `ScanBackend` capability implemented by every scanner
//! - `ScanStore` / `ScheduleStore` persistence seams
//! - `RunLedger` for backends that track their own runs

pub mod error;
pub mod ledger;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{AegisError, AegisResult, BackendFailure};
pub use ledger::RunLedger;
pub use traits::{ScanBackend, ScanStore, ScheduleStore};
pub use types::{
    now_millis, BackendHandle, BackendReport, Finding, ScanKind, ScanProgress, ScanRecord,
    ScanStatus, Schedule, Severity,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
