//! Storage - persistence for scan records and schedules
//!
//! Both stores implement `ScanStore` and `ScheduleStore` from `aegis-common`.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Default on-disk database, created next to the working directory.
pub const DEFAULT_DATABASE_URL: &str = "sqlite://aegis.db";
