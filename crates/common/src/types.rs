//! Core data types for Aegis scan orchestration
//!
//! Timestamps are `DateTime<Utc>` truncated to millisecond precision so a record
//! read back from any store compares equal to the one that was written.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AegisError;

/// Current time at the precision the stores persist.
#[inline]
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Finding severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" | "informational" => Ok(Severity::Info),
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(AegisError::Validation(format!("unknown severity '{other}'"))),
        }
    }
}

/// Kind of backend, and the domain a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanKind {
    /// Dynamic web-application scanning.
    Web,
    /// Cloud account configuration posture.
    Cloud,
    /// Software composition / dependency analysis.
    Dependency,
}

impl ScanKind {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScanKind::Web => "web",
            ScanKind::Cloud => "cloud",
            ScanKind::Dependency => "dependency",
        }
    }
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanKind {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" | "dast" => Ok(ScanKind::Web),
            "cloud" | "aws" => Ok(ScanKind::Cloud),
            "dependency" | "sca" => Ok(ScanKind::Dependency),
            other => Err(AegisError::Validation(format!("unknown scan kind '{other}'"))),
        }
    }
}

/// Lifecycle status of a backend run or of an aggregated scan record.
///
/// Records move `queued -> running -> {completed, failed}`. `Unknown` is only
/// ever reported by backends (or for an unrecognised scan id) and is never
/// persisted on a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Unknown,
    Queued,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Unknown => "unknown",
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }

    /// Whether a record in `self` may move to `next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: ScanStatus) -> bool {
        match (self, next) {
            (_, ScanStatus::Unknown) => false,
            (ScanStatus::Unknown, _) => true,
            (ScanStatus::Queued, _) => true,
            (ScanStatus::Running, ScanStatus::Queued) => false,
            (ScanStatus::Running, _) => true,
            (ScanStatus::Completed, ScanStatus::Completed) => true,
            (ScanStatus::Failed, ScanStatus::Failed) => true,
            _ => false,
        }
    }

    /// Fold the statuses reported by several backends into one.
    ///
    /// `Unknown` answers are ignored. Anything still in flight keeps the
    /// aggregate in flight; once every backend is terminal a single failure
    /// makes the aggregate `Failed`. Returns `Unknown` when nothing answered.
    #[must_use]
    pub fn aggregate<I>(statuses: I) -> ScanStatus
    where
        I: IntoIterator<Item = ScanStatus>,
    {
        let mut seen = false;
        let mut queued = 0usize;
        let mut running = false;
        let mut terminal = 0usize;
        let mut failed = false;

        for status in statuses {
            match status {
                ScanStatus::Unknown => continue,
                ScanStatus::Queued => queued += 1,
                ScanStatus::Running => running = true,
                ScanStatus::Completed => terminal += 1,
                ScanStatus::Failed => {
                    terminal += 1;
                    failed = true;
                }
            }
            seen = true;
        }

        if !seen {
            ScanStatus::Unknown
        } else if running || (queued > 0 && terminal > 0) {
            ScanStatus::Running
        } else if queued > 0 {
            ScanStatus::Queued
        } else if failed {
            ScanStatus::Failed
        } else {
            ScanStatus::Completed
        }
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScanStatus {
    type Err = AegisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unknown" => Ok(ScanStatus::Unknown),
            "queued" => Ok(ScanStatus::Queued),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            other => Err(AegisError::Validation(format!("unknown scan status '{other}'"))),
        }
    }
}

/// Status plus completion percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub status: ScanStatus,
    pub percent: u8,
}

impl ScanProgress {
    #[inline]
    #[must_use]
    pub fn new(status: ScanStatus, percent: u8) -> Self {
        let percent = if status.is_terminal() { 100 } else { percent.min(100) };
        Self { status, percent }
    }

    #[inline]
    #[must_use]
    pub const fn unknown() -> Self {
        Self {
            status: ScanStatus::Unknown,
            percent: 0,
        }
    }
}

/// One immutable security observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub title: String,
    pub description: String,
    pub severity: Severity,
    pub category: ScanKind,
    pub remediation: String,
}

impl Finding {
    #[inline]
    #[must_use]
    pub fn new<S: Into<String>>(category: ScanKind, severity: Severity, title: S) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            severity,
            category,
            remediation: String::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }

    #[inline]
    #[must_use]
    pub fn with_remediation<S: Into<String>>(mut self, remediation: S) -> Self {
        self.remediation = remediation.into();
        self
    }
}

/// Handle a backend returned when it started its part of a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHandle {
    pub backend: String,
    pub handle: String,
}

impl BackendHandle {
    pub fn new(backend: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            handle: handle.into(),
        }
    }
}

/// What a backend reports for one of its runs: the record-shaped result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendReport {
    pub handle: String,
    pub target: String,
    pub status: ScanStatus,
    pub findings: Vec<Finding>,
    pub started_at: DateTime<Utc>,
}

/// Durable, aggregated representation of one logical scan across backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub scan_id: String,
    pub target: String,
    pub kind: Option<ScanKind>,
    pub status: ScanStatus,
    pub backend_handles: Vec<BackendHandle>,
    pub findings: Vec<Finding>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScanRecord {
    /// A freshly started scan in the `queued` state.
    #[must_use]
    pub fn queued(
        scan_id: impl Into<String>,
        target: impl Into<String>,
        kind: Option<ScanKind>,
        backend_handles: Vec<BackendHandle>,
    ) -> Self {
        let now = now_millis();
        Self {
            scan_id: scan_id.into(),
            target: target.into(),
            kind,
            status: ScanStatus::Queued,
            backend_handles,
            findings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The handle `backend` issued for this scan, if it took part.
    #[must_use]
    pub fn handle_for(&self, backend: &str) -> Option<&str> {
        self.backend_handles
            .iter()
            .find(|h| h.backend == backend)
            .map(|h| h.handle.as_str())
    }

    /// Apply `next` if the state machine allows it. Returns whether it changed.
    pub fn advance(&mut self, next: ScanStatus) -> bool {
        if next == self.status || !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Fold freshly reported findings into the record without losing or
    /// duplicating any. Fresh findings keep their order; earlier ones that
    /// were not reported this round follow them. Findings are matched as a
    /// multiset, so a repeated finding keeps every copy it ever had.
    /// Returns whether the set changed.
    pub fn merge_findings(&mut self, fresh: Vec<Finding>) -> bool {
        let mut unclaimed: Vec<&Finding> = fresh.iter().collect();
        let mut carried = Vec::new();
        for previous in &self.findings {
            match unclaimed.iter().position(|f| *f == previous) {
                Some(pos) => {
                    unclaimed.swap_remove(pos);
                }
                None => carried.push(previous.clone()),
            }
        }

        let mut merged = fresh;
        merged.extend(carried);
        if merged == self.findings {
            return false;
        }
        self.findings = merged;
        true
    }

    #[inline]
    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }

    /// Number of findings per severity, every severity present.
    #[must_use]
    pub fn severity_counts(&self) -> BTreeMap<Severity, usize> {
        let mut counts: BTreeMap<Severity, usize> = Severity::ALL.iter().map(|s| (*s, 0)).collect();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_default() += 1;
        }
        counts
    }

    #[must_use]
    pub fn highest_severity(&self) -> Option<Severity> {
        self.findings.iter().map(|f| f.severity).max()
    }
}

/// A standing rule that starts a scan on a recurring cadence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub target: String,
    /// Restrict each firing to backends of this kind; `None` fans out to all.
    pub kind: Option<ScanKind>,
    /// Cron expression or shorthand macro, exactly as supplied.
    pub expression: String,
    pub next_run: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    #[must_use]
    pub fn new(target: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            kind: None,
            expression: expression.into(),
            next_run: None,
            last_run: None,
            created_at: now_millis(),
        }
    }

    #[must_use]
    pub fn with_kind(mut self, kind: Option<ScanKind>) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_next_run(mut self, next_run: Option<DateTime<Utc>>) -> Self {
        self.next_run = next_run;
        self
    }
}
