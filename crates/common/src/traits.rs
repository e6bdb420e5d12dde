//! Core traits for Aegis components
//!
//! - `ScanBackend`: the capability every scanner implements
//! - `ScanStore` / `ScheduleStore`: the persistence the orchestrator and
//!   scheduler consume

use crate::error::AegisResult;
use crate::types::{BackendReport, ScanKind, ScanProgress, ScanRecord, Schedule};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Core scan backend trait - all scanners must implement this
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Backend name/identifier, unique within one orchestrator
    fn name(&self) -> &str;

    /// Domain this backend covers
    fn kind(&self) -> ScanKind;

    /// Begin a scan and return the backend's own handle for it.
    ///
    /// Must return quickly; long work is scheduled in the background. The
    /// target format is validated here, not by the caller.
    async fn start(&self, target: &str) -> AegisResult<String>;

    /// Current status of a run. Unrecognised handles report `Unknown`.
    async fn status(&self, handle: &str) -> AegisResult<ScanProgress>;

    /// Whatever findings are available so far; never an error merely because
    /// the run is still in progress.
    async fn results(&self, handle: &str) -> AegisResult<BackendReport>;

    /// Prior runs, most recent first. Stateless backends return nothing.
    async fn history(&self) -> AegisResult<Vec<BackendReport>> {
        Ok(Vec::new())
    }

    /// Stop any background work this backend owns.
    async fn shutdown(&self) {}
}

/// Persistence for scan records
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Insert a new record; the scan id must not exist yet
    async fn create_scan(&self, record: &ScanRecord) -> AegisResult<()>;

    async fn get_scan(&self, scan_id: &str) -> AegisResult<Option<ScanRecord>>;

    /// Replace status, findings and update time of an existing record
    async fn update_scan(&self, record: &ScanRecord) -> AegisResult<()>;

    /// All records, most recently created first
    async fn list_scans(&self) -> AegisResult<Vec<ScanRecord>>;
}

/// Persistence for recurring schedules
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn create_schedule(&self, schedule: &Schedule) -> AegisResult<()>;

    async fn get_schedule(&self, id: Uuid) -> AegisResult<Option<Schedule>>;

    /// Returns whether a schedule was actually removed
    async fn delete_schedule(&self, id: Uuid) -> AegisResult<bool>;

    /// All schedules, oldest first
    async fn list_schedules(&self) -> AegisResult<Vec<Schedule>>;

    /// Record run bookkeeping. Missing schedules are ignored.
    async fn record_schedule_run(
        &self,
        id: Uuid,
        last_run: Option<DateTime<Utc>>,
        next_run: Option<DateTime<Utc>>,
    ) -> AegisResult<()>;
}
