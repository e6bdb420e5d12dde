//! Per-backend run bookkeeping
//!
//! Every backend instance owns its own `RunLedger`; there is no process-wide
//! registry of runs.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::types::{now_millis, BackendReport, Finding, ScanProgress, ScanStatus};

/// How a run advances.
#[derive(Debug, Clone)]
enum Progression {
    /// Simulated work that finishes `duration` after `started`.
    Timed { started: Instant, duration: Duration },
    /// Driven explicitly by a worker task.
    Tracked { status: ScanStatus, percent: u8 },
}

#[derive(Debug, Clone)]
struct Run {
    seq: u64,
    target: String,
    started_at: DateTime<Utc>,
    progression: Progression,
    findings: Vec<Finding>,
}

impl Run {
    fn progress(&self) -> ScanProgress {
        match &self.progression {
            Progression::Timed { started, duration } => {
                let elapsed = started.elapsed();
                if duration.is_zero() || elapsed >= *duration {
                    ScanProgress::new(ScanStatus::Completed, 100)
                } else {
                    let percent = (elapsed.as_millis() * 100 / duration.as_millis().max(1)) as u8;
                    ScanProgress::new(ScanStatus::Running, percent)
                }
            }
            Progression::Tracked { status, percent } => ScanProgress::new(*status, *percent),
        }
    }

    /// Timed runs reveal findings in proportion to their progress.
    fn visible_findings(&self, progress: ScanProgress) -> Vec<Finding> {
        match self.progression {
            Progression::Timed { .. } if !progress.status.is_terminal() => {
                let shown = self.findings.len() * progress.percent as usize / 100;
                self.findings[..shown].to_vec()
            }
            _ => self.findings.clone(),
        }
    }

    fn report(&self, handle: &str) -> BackendReport {
        let progress = self.progress();
        BackendReport {
            handle: handle.to_string(),
            target: self.target.clone(),
            status: progress.status,
            findings: self.visible_findings(progress),
            started_at: self.started_at,
        }
    }
}

/// Handle-indexed record of the runs one backend has started.
#[derive(Debug)]
pub struct RunLedger {
    prefix: String,
    runs: RwLock<HashMap<String, Run>>,
    next_seq: AtomicU64,
}

impl RunLedger {
    /// `prefix` namespaces the handles this ledger issues (e.g. "web").
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            runs: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn insert(&self, target: &str, progression: Progression, findings: Vec<Finding>) -> String {
        let handle = format!("{}-{}", self.prefix, Uuid::new_v4().simple());
        let run = Run {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            target: target.to_string(),
            started_at: now_millis(),
            progression,
            findings,
        };
        self.runs.write().insert(handle.clone(), run);
        handle
    }

    /// Open a simulated run whose findings become visible over `duration`.
    pub fn open_timed(&self, target: &str, duration: Duration, findings: Vec<Finding>) -> String {
        let progression = Progression::Timed {
            started: Instant::now(),
            duration,
        };
        self.insert(target, progression, findings)
    }

    /// Open a run in the `queued` state, to be driven by a worker.
    pub fn open_tracked(&self, target: &str) -> String {
        let progression = Progression::Tracked {
            status: ScanStatus::Queued,
            percent: 0,
        };
        self.insert(target, progression, Vec::new())
    }

    fn set_tracked(&self, handle: &str, status: ScanStatus, percent: u8, findings: Option<Vec<Finding>>) {
        if let Some(run) = self.runs.write().get_mut(handle) {
            run.progression = Progression::Tracked { status, percent };
            if let Some(findings) = findings {
                run.findings = findings;
            }
        }
    }

    pub fn mark_running(&self, handle: &str, percent: u8) {
        self.set_tracked(handle, ScanStatus::Running, percent, None);
    }

    pub fn finish(&self, handle: &str, findings: Vec<Finding>) {
        self.set_tracked(handle, ScanStatus::Completed, 100, Some(findings));
    }

    pub fn fail(&self, handle: &str) {
        self.set_tracked(handle, ScanStatus::Failed, 100, None);
    }

    /// Fail a tracked run whose worker is gone. Runs that already reached a
    /// terminal state keep it. Returns whether the run was failed.
    pub fn abandon(&self, handle: &str) -> bool {
        let mut runs = self.runs.write();
        let Some(run) = runs.get_mut(handle) else {
            return false;
        };
        match run.progression {
            Progression::Tracked { status, .. } if !status.is_terminal() => {
                run.progression = Progression::Tracked {
                    status: ScanStatus::Failed,
                    percent: 100,
                };
                true
            }
            _ => false,
        }
    }

    /// Status of a run; unknown handles report `Unknown`.
    #[must_use]
    pub fn progress(&self, handle: &str) -> ScanProgress {
        self.runs
            .read()
            .get(handle)
            .map(Run::progress)
            .unwrap_or_else(ScanProgress::unknown)
    }

    #[must_use]
    pub fn report(&self, handle: &str) -> Option<BackendReport> {
        self.runs.read().get(handle).map(|run| run.report(handle))
    }

    /// Every run, most recently opened first.
    #[must_use]
    pub fn reports(&self) -> Vec<BackendReport> {
        let runs = self.runs.read();
        let mut ordered: Vec<_> = runs.iter().collect();
        ordered.sort_by(|a, b| b.1.seq.cmp(&a.1.seq));
        ordered.into_iter().map(|(handle, run)| run.report(handle)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
