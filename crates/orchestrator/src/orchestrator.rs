// crates/orchestrator/src/orchestrator.rs
//! Orchestrator - fan-out of one logical scan over every backend, fan-in of results

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use aegis_common::{
    AegisError, AegisResult, BackendFailure, BackendHandle, ScanBackend, ScanKind, ScanProgress,
    ScanRecord, ScanStatus, ScanStore,
};
use aegis_telemetry::{self as telemetry, BackendOp};

use crate::config::OrchestratorConfig;
use crate::locks::ScanLocks;
use crate::progress::ProgressTally;

/// Builder for [`Orchestrator`]; the backend list is fixed once built.
pub struct OrchestratorBuilder {
    store: Arc<dyn ScanStore>,
    backends: Vec<Arc<dyn ScanBackend>>,
    config: OrchestratorConfig,
}

impl OrchestratorBuilder {
    /// Register a backend. Registration order is the order findings are
    /// concatenated in.
    pub fn with_backend(mut self, backend: Arc<dyn ScanBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> AegisResult<Orchestrator> {
        if self.backends.is_empty() {
            return Err(AegisError::Config("no scan backends registered".into()));
        }
        let mut names = HashSet::new();
        for backend in &self.backends {
            if !names.insert(backend.name().to_string()) {
                return Err(AegisError::Config(format!(
                    "backend '{}' registered twice",
                    backend.name()
                )));
            }
        }
        Ok(Orchestrator {
            backends: self.backends,
            store: self.store,
            config: self.config,
            locks: ScanLocks::new(),
        })
    }
}

/// Orchestrator coordinates a scan across backends and owns its scan records.
pub struct Orchestrator {
    backends: Vec<Arc<dyn ScanBackend>>,
    store: Arc<dyn ScanStore>,
    config: OrchestratorConfig,
    locks: ScanLocks,
}

impl Orchestrator {
    pub fn builder(store: Arc<dyn ScanStore>) -> OrchestratorBuilder {
        OrchestratorBuilder {
            store,
            backends: Vec::new(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Registered backend names, in registration order.
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    /// Whether at least one registered backend scans `kind`.
    pub fn handles_kind(&self, kind: ScanKind) -> bool {
        self.backends.iter().any(|b| b.kind() == kind)
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn backend(&self, name: &str) -> Option<&Arc<dyn ScanBackend>> {
        self.backends.iter().find(|b| b.name() == name)
    }

    /// Start a scan on every registered backend.
    pub async fn start(&self, target: &str) -> AegisResult<String> {
        self.start_with_kind(target, None).await
    }

    /// Start a scan on every backend (or only those of `kind`) concurrently.
    ///
    /// All-or-nothing: if any backend fails to start, nothing is persisted and
    /// the combined failure is returned.
    #[instrument(skip(self))]
    pub async fn start_with_kind(&self, target: &str, kind: Option<ScanKind>) -> AegisResult<String> {
        let target = target.trim();
        if target.is_empty() {
            return Err(AegisError::InvalidTarget("target must not be empty".into()));
        }

        let selected: Vec<Arc<dyn ScanBackend>> = self
            .backends
            .iter()
            .filter(|b| kind.map_or(true, |k| b.kind() == k))
            .cloned()
            .collect();
        if selected.is_empty() {
            return Err(AegisError::Validation(format!(
                "no registered backend handles {} scans",
                kind.map_or("any", |k| k.as_str())
            )));
        }

        // One task per backend, joined in registration order
        let limit = self.config.backend_timeout;
        let mut tasks = Vec::with_capacity(selected.len());
        for backend in &selected {
            let backend = Arc::clone(backend);
            let target = target.to_string();
            tasks.push(tokio::spawn(async move {
                let started = Instant::now();
                let outcome = timeout(limit, backend.start(&target)).await;
                telemetry::record_backend_call(backend.name(), BackendOp::Start, started.elapsed());
                outcome
            }));
        }

        let mut handles = Vec::with_capacity(selected.len());
        let mut failures = Vec::new();
        for (backend, task) in selected.iter().zip(tasks) {
            let name = backend.name();
            match task.await {
                Ok(Ok(Ok(handle))) if !handle.is_empty() => {
                    debug!("Backend {} started run {}", name, handle);
                    handles.push(BackendHandle::new(name, handle));
                }
                Ok(Ok(Ok(_))) => failures.push(BackendFailure::new(name, "returned an empty handle")),
                Ok(Ok(Err(e))) => failures.push(BackendFailure::new(name, e.to_string())),
                Ok(Err(_)) => {
                    failures.push(BackendFailure::new(name, format!("timed out after {limit:?}")))
                }
                Err(e) => failures.push(BackendFailure::new(name, format!("start task aborted: {e}"))),
            }
        }

        if !failures.is_empty() {
            for failure in &failures {
                telemetry::record_backend_failure(&failure.backend, BackendOp::Start);
            }
            telemetry::record_scan_start_failed();
            warn!("Scan of {} not started: {} backend(s) failed", target, failures.len());
            return Err(AegisError::BackendStart(failures));
        }

        let scan_id = Uuid::new_v4().to_string();
        let record = ScanRecord::queued(&scan_id, target, kind, handles);
        self.store.create_scan(&record).await?;

        telemetry::record_scan_started(selected.len());
        info!("Started scan {} target={} backends={}", scan_id, target, selected.len());
        Ok(scan_id)
    }

    /// Aggregate status across the scan's backends, mirrored into the store.
    ///
    /// Unknown scan ids report `Unknown` rather than an error. A known scan
    /// whose backends all fail to answer keeps its stored status.
    #[instrument(skip(self))]
    pub async fn get_status(&self, scan_id: &str) -> AegisResult<ScanProgress> {
        let record = match self.store.get_scan(scan_id).await? {
            Some(record) => record,
            None => return Ok(ScanProgress::unknown()),
        };
        if record.status.is_terminal() {
            return Ok(ScanProgress::new(record.status, 100));
        }

        let mut tally = ProgressTally::new();
        for entry in &record.backend_handles {
            let Some(backend) = self.backend(&entry.backend) else {
                warn!("Scan {} references unregistered backend {}", scan_id, entry.backend);
                continue;
            };
            let query = backend.status(&entry.handle);
            if let Ok(progress) = self.call(backend.as_ref(), BackendOp::Status, query).await {
                tally.record(progress);
            }
        }

        let summary = tally.summary();
        if summary.status == ScanStatus::Unknown {
            return Ok(ScanProgress::new(record.status, 0));
        }
        let effective = self.mirror_status(scan_id, summary.status).await?;
        Ok(ScanProgress::new(effective, summary.percent))
    }

    async fn mirror_status(&self, scan_id: &str, status: ScanStatus) -> AegisResult<ScanStatus> {
        let guard = self.locks.acquire(scan_id).await;
        let Some(mut record) = self.store.get_scan(scan_id).await? else {
            return Ok(status);
        };
        if record.advance(status) {
            record.touch();
            self.store.update_scan(&record).await?;
            debug!("Scan {} is now {}", scan_id, record.status);
        }

        drop(guard);
        if record.status.is_terminal() {
            self.locks.release(scan_id);
        }
        Ok(record.status)
    }

    /// Query every backend in order, fold their findings into the record and
    /// persist it. Backends that error are skipped.
    #[instrument(skip(self))]
    pub async fn get_results(&self, scan_id: &str) -> AegisResult<ScanRecord> {
        let guard = self.locks.acquire(scan_id).await;
        let mut record = self
            .store
            .get_scan(scan_id)
            .await?
            .ok_or_else(|| AegisError::NotFound(format!("scan {scan_id}")))?;

        let mut fresh = Vec::new();
        let mut statuses = Vec::with_capacity(record.backend_handles.len());
        for entry in &record.backend_handles {
            let Some(backend) = self.backend(&entry.backend) else {
                warn!("Scan {} references unregistered backend {}", scan_id, entry.backend);
                continue;
            };
            let query = backend.results(&entry.handle);
            if let Ok(report) = self.call(backend.as_ref(), BackendOp::Results, query).await {
                statuses.push(report.status);
                fresh.extend(report.findings);
            }
        }

        let mut changed = record.merge_findings(fresh);
        let aggregate = ScanStatus::aggregate(statuses);
        if aggregate != ScanStatus::Unknown {
            changed |= record.advance(aggregate);
        }
        if changed {
            record.touch();
            self.store.update_scan(&record).await?;
        }

        telemetry::record_aggregation(record.findings.len());
        debug!(
            "Scan {} aggregated: status={} findings={}",
            scan_id,
            record.status,
            record.findings.len()
        );

        drop(guard);
        if record.status.is_terminal() {
            self.locks.release(scan_id);
        }
        Ok(record)
    }

    /// Every persisted scan, most recent first. Does not contact backends.
    pub async fn get_history(&self) -> AegisResult<Vec<ScanRecord>> {
        self.store.list_scans().await
    }

    /// Stop background work in every backend.
    pub async fn shutdown(&self) {
        for backend in &self.backends {
            backend.shutdown().await;
        }
        info!("Orchestrator shut down {} backend(s)", self.backends.len());
    }

    /// Run one backend call under the configured timeout, recording latency
    /// and failures. Errors are logged here and returned for the caller to skip.
    async fn call<T, F>(&self, backend: &dyn ScanBackend, op: BackendOp, fut: F) -> AegisResult<T>
    where
        F: Future<Output = AegisResult<T>>,
    {
        let started = Instant::now();
        let outcome = timeout(self.config.backend_timeout, fut).await;
        telemetry::record_backend_call(backend.name(), op, started.elapsed());

        let result = outcome.unwrap_or_else(|_| {
            Err(AegisError::Timeout(format!(
                "{} {} exceeded {:?}",
                backend.name(),
                op.as_str(),
                self.config.backend_timeout
            )))
        });
        if let Err(e) = &result {
            telemetry::record_backend_failure(backend.name(), op);
            warn!("Backend {} {} failed: {}", backend.name(), op.as_str(), e);
        }
        result
    }
}
