//! Scheduler - durable recurring scans armed as timer tasks

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use aegis_common::{AegisError, AegisResult, ScanKind, Schedule, ScheduleStore};
use aegis_orchestrator::Orchestrator;
use aegis_telemetry as telemetry;

use crate::recurrence::Recurrence;

/// Keeps one timer task per persisted schedule.
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    orchestrator: Arc<Orchestrator>,
    armed: Mutex<HashMap<Uuid, JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn ScheduleStore>, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store,
            orchestrator,
            armed: Mutex::new(HashMap::new()),
        }
    }

    /// Load every persisted schedule and arm it. Returns how many are armed.
    ///
    /// Calling this again re-arms in place; a schedule never gets two timers.
    pub async fn start(&self) -> AegisResult<usize> {
        let schedules = self.store.list_schedules().await?;
        for schedule in &schedules {
            match Recurrence::parse(&schedule.expression) {
                Ok(recurrence) => self.arm(schedule, recurrence),
                Err(e) => warn!("Skipping schedule {}: {}", schedule.id, e),
            }
        }
        let armed = self.armed_count();
        info!("Scheduler started with {} armed schedule(s)", armed);
        Ok(armed)
    }

    /// Disarm every timer. Persisted schedules are untouched.
    pub fn stop(&self) {
        let mut armed = self.armed.lock();
        for (_, task) in armed.drain() {
            task.abort();
        }
        telemetry::record_schedules_armed(0);
    }

    /// Validate, persist and immediately arm a new schedule that fans out to
    /// every backend.
    pub async fn add_schedule(&self, target: &str, expression: &str) -> AegisResult<Schedule> {
        self.add_schedule_with_kind(target, None, expression).await
    }

    /// Like [`Scheduler::add_schedule`], but each firing only starts backends
    /// of `kind` when one is given.
    #[instrument(skip(self))]
    pub async fn add_schedule_with_kind(
        &self,
        target: &str,
        kind: Option<ScanKind>,
        expression: &str,
    ) -> AegisResult<Schedule> {
        let target = target.trim();
        if target.is_empty() {
            return Err(AegisError::InvalidTarget("target must not be empty".into()));
        }
        if let Some(kind) = kind {
            if !self.orchestrator.handles_kind(kind) {
                return Err(AegisError::Validation(format!(
                    "no registered backend handles {kind} scans"
                )));
            }
        }
        let recurrence = Recurrence::parse(expression)?;

        let schedule = Schedule::new(target, recurrence.expression())
            .with_kind(kind)
            .with_next_run(recurrence.next_after(&Utc::now()));
        self.store.create_schedule(&schedule).await?;
        self.arm(&schedule, recurrence);

        info!(
            "Added schedule {} target={} kind={} expression={}",
            schedule.id,
            schedule.target,
            schedule.kind.map_or("all", |k| k.as_str()),
            schedule.expression
        );
        Ok(schedule)
    }

    /// Delete and disarm a schedule. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn remove_schedule(&self, id: Uuid) -> AegisResult<()> {
        let existed = self.store.delete_schedule(id).await?;
        let disarmed = self.disarm(id);
        if existed || disarmed {
            info!("Removed schedule {}", id);
        } else {
            debug!("Schedule {} not found, nothing to remove", id);
        }
        Ok(())
    }

    pub async fn get_schedules(&self) -> AegisResult<Vec<Schedule>> {
        self.store.list_schedules().await
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    pub fn is_armed(&self, id: Uuid) -> bool {
        self.armed.lock().contains_key(&id)
    }

    fn arm(&self, schedule: &Schedule, recurrence: Recurrence) {
        let task = tokio::spawn(run_schedule(
            schedule.id,
            schedule.target.clone(),
            schedule.kind,
            recurrence,
            Arc::clone(&self.store),
            Arc::clone(&self.orchestrator),
        ));

        let mut armed = self.armed.lock();
        if let Some(previous) = armed.insert(schedule.id, task) {
            previous.abort();
        }
        telemetry::record_schedules_armed(armed.len());
        debug!("Armed schedule {}", schedule.id);
    }

    fn disarm(&self, id: Uuid) -> bool {
        let mut armed = self.armed.lock();
        let removed = armed.remove(&id);
        telemetry::record_schedules_armed(armed.len());
        match removed {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Timer loop for one schedule. Each firing starts the scan on its own task
/// so a slow backend never delays the next firing.
async fn run_schedule(
    id: Uuid,
    target: String,
    kind: Option<ScanKind>,
    recurrence: Recurrence,
    store: Arc<dyn ScheduleStore>,
    orchestrator: Arc<Orchestrator>,
) {
    let mut cursor = Utc::now();
    let mut last_fired = None;

    loop {
        let next = recurrence.next_after(&cursor);
        if let Err(e) = store.record_schedule_run(id, last_fired, next).await {
            warn!("Failed to record run of schedule {}: {}", id, e);
        }
        let Some(next) = next else {
            info!("Schedule {} has no further firings", id);
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let orchestrator = Arc::clone(&orchestrator);
        let target_for_scan = target.clone();
        tokio::spawn(async move {
            match orchestrator.start_with_kind(&target_for_scan, kind).await {
                Ok(scan_id) => {
                    info!("Schedule {} started scan {} for {}", id, scan_id, target_for_scan);
                    telemetry::record_schedule_fired(true);
                }
                Err(e) => {
                    error!("Schedule {} failed to start scan for {}: {}", id, target_for_scan, e);
                    telemetry::record_schedule_fired(false);
                }
            }
        });

        last_fired = Some(next);
        cursor = next.max(Utc::now());
    }
}
