use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Barrier;
use uuid::Uuid;

use aegis_common::{
    now_millis, AegisError, AegisResult, BackendReport, Finding, ScanBackend, ScanKind,
    ScanProgress, ScanRecord, ScanStatus, ScanStore, Severity,
};
use aegis_orchestrator::{Orchestrator, OrchestratorConfig};
use aegis_storage::MemoryStore;

/// Scriptable backend; every knob can be changed while a scan is in flight.
struct MockBackend {
    name: String,
    kind: ScanKind,
    fail_start: bool,
    start_delay: Duration,
    start_barrier: Option<Arc<Barrier>>,
    status: Mutex<ScanStatus>,
    findings: Mutex<Vec<Finding>>,
    fail_results: AtomicBool,
    starts: AtomicUsize,
}

impl MockBackend {
    fn new(name: &str, kind: ScanKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            fail_start: false,
            start_delay: Duration::ZERO,
            start_barrier: None,
            status: Mutex::new(ScanStatus::Completed),
            findings: Mutex::new(Vec::new()),
            fail_results: AtomicBool::new(false),
            starts: AtomicUsize::new(0),
        }
    }

    fn with_findings(self, titles: &[&str]) -> Self {
        *self.findings.lock().unwrap() = titles
            .iter()
            .map(|t| Finding::new(self.kind, Severity::High, *t))
            .collect();
        self
    }

    fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.start_barrier = Some(barrier);
        self
    }

    fn set_status(&self, status: ScanStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn push_finding(&self, title: &str) {
        self.findings
            .lock()
            .unwrap()
            .push(Finding::new(self.kind, Severity::Medium, title));
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ScanKind {
        self.kind
    }

    async fn start(&self, _target: &str) -> AegisResult<String> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.start_barrier {
            barrier.wait().await;
        }
        if !self.start_delay.is_zero() {
            tokio::time::sleep(self.start_delay).await;
        }
        if self.fail_start {
            return Err(AegisError::BackendUnavailable("missing credentials".into()));
        }
        Ok(format!("{}-run", self.name))
    }

    async fn status(&self, _handle: &str) -> AegisResult<ScanProgress> {
        let status = *self.status.lock().unwrap();
        Ok(ScanProgress::new(status, 50))
    }

    async fn results(&self, handle: &str) -> AegisResult<BackendReport> {
        if self.fail_results.load(Ordering::SeqCst) {
            return Err(AegisError::BackendUnavailable("connection reset".into()));
        }
        Ok(BackendReport {
            handle: handle.to_string(),
            target: "example.com".to_string(),
            status: *self.status.lock().unwrap(),
            findings: self.findings.lock().unwrap().clone(),
            started_at: now_millis(),
        })
    }
}

/// Store whose writes always fail.
struct BrokenStore;

#[async_trait]
impl ScanStore for BrokenStore {
    async fn create_scan(&self, _record: &ScanRecord) -> AegisResult<()> {
        Err(AegisError::Storage("database is locked".into()))
    }

    async fn get_scan(&self, _scan_id: &str) -> AegisResult<Option<ScanRecord>> {
        Ok(None)
    }

    async fn update_scan(&self, _record: &ScanRecord) -> AegisResult<()> {
        Err(AegisError::Storage("database is locked".into()))
    }

    async fn list_scans(&self) -> AegisResult<Vec<ScanRecord>> {
        Err(AegisError::Storage("database is locked".into()))
    }
}

fn orchestrator(store: Arc<MemoryStore>, backends: Vec<Arc<MockBackend>>) -> Orchestrator {
    let mut builder = Orchestrator::builder(store);
    for backend in backends {
        builder = builder.with_backend(backend);
    }
    builder.build().unwrap()
}

fn titles(record: &ScanRecord) -> Vec<&str> {
    record.findings.iter().map(|f| f.title.as_str()).collect()
}

#[tokio::test]
async fn start_persists_one_queued_record() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud));
    let orch = orchestrator(store.clone(), vec![a.clone(), b.clone()]);

    let scan_id = orch.start("example.com").await.unwrap();
    assert!(Uuid::parse_str(&scan_id).is_ok());
    assert_eq!((a.starts(), b.starts()), (1, 1));

    let history = store.list_scans().await.unwrap();
    assert_eq!(history.len(), 1);
    let record = &history[0];
    assert_eq!(record.scan_id, scan_id);
    assert_eq!(record.status, ScanStatus::Queued);
    assert_eq!(record.target, "example.com");
    assert_eq!(record.handle_for("web"), Some("web-run"));
    assert_eq!(record.handle_for("cloud"), Some("cloud-run"));
}

#[tokio::test]
async fn scan_ids_are_unique() {
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(store, vec![Arc::new(MockBackend::new("web", ScanKind::Web))]);
    let first = orch.start("example.com").await.unwrap();
    let second = orch.start("example.com").await.unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn failed_start_persists_nothing() {
    let store = Arc::new(MemoryStore::new());
    let good = Arc::new(MockBackend::new("web", ScanKind::Web));
    let bad = Arc::new(MockBackend::new("cloud", ScanKind::Cloud).failing_start());
    let orch = orchestrator(store.clone(), vec![good.clone(), bad]);

    let err = orch.start("example.com").await.unwrap_err();
    match err {
        AegisError::BackendStart(failures) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].backend, "cloud");
            assert!(failures[0].reason.contains("missing credentials"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // the sibling still ran; the failure did not block it
    assert_eq!(good.starts(), 1);
    assert!(store.list_scans().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_target_is_rejected_before_fan_out() {
    let store = Arc::new(MemoryStore::new());
    let backend = Arc::new(MockBackend::new("web", ScanKind::Web));
    let orch = orchestrator(store.clone(), vec![backend.clone()]);

    let err = orch.start("   ").await.unwrap_err();
    assert!(matches!(err, AegisError::InvalidTarget(_)));
    assert!(err.is_validation());
    assert_eq!(backend.starts(), 0);
    assert!(store.list_scans().await.unwrap().is_empty());
}

#[tokio::test]
async fn backends_start_concurrently() {
    // each start waits for the other; a sequential fan-out would time out
    let barrier = Arc::new(Barrier::new(2));
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_barrier(barrier.clone()));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud).with_barrier(barrier));
    let orch = Orchestrator::builder(store)
        .with_backend(a)
        .with_backend(b)
        .with_config(OrchestratorConfig::default().with_backend_timeout(Duration::from_secs(2)))
        .build()
        .unwrap();

    assert!(orch.start("example.com").await.is_ok());
}

#[tokio::test]
async fn slow_backend_start_times_out() {
    let store = Arc::new(MemoryStore::new());
    let slow = Arc::new(MockBackend::new("web", ScanKind::Web).with_start_delay(Duration::from_secs(10)));
    let orch = Orchestrator::builder(store.clone())
        .with_backend(slow)
        .with_config(OrchestratorConfig::default().with_backend_timeout(Duration::from_millis(100)))
        .build()
        .unwrap();

    let err = orch.start("example.com").await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert!(store.list_scans().await.unwrap().is_empty());
}

#[tokio::test]
async fn store_failure_propagates_from_start() {
    let orch = Orchestrator::builder(Arc::new(BrokenStore))
        .with_backend(Arc::new(MockBackend::new("web", ScanKind::Web)))
        .build()
        .unwrap();
    let err = orch.start("example.com").await.unwrap_err();
    assert!(matches!(err, AegisError::Storage(_)));
}

#[tokio::test]
async fn results_union_across_backends() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS", "Missing header"]));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud).with_findings(&["Public bucket"]));
    let orch = orchestrator(store.clone(), vec![a, b]);

    let scan_id = orch.start("example.com").await.unwrap();
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(record.status, ScanStatus::Completed);
    assert_eq!(titles(&record), vec!["XSS", "Missing header", "Public bucket"]);

    let stored = store.get_scan(&scan_id).await.unwrap().unwrap();
    assert_eq!(stored.findings.len(), 3);
    assert_eq!(stored.status, ScanStatus::Completed);
}

#[tokio::test]
async fn results_while_running_are_partial_not_errors() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS"]));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud));
    b.set_status(ScanStatus::Running);
    let orch = orchestrator(store, vec![a, b.clone()]);

    let scan_id = orch.start("example.com").await.unwrap();
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(record.status, ScanStatus::Running);
    assert_eq!(titles(&record), vec!["XSS"]);

    b.push_finding("Root without MFA");
    b.set_status(ScanStatus::Completed);
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(record.status, ScanStatus::Completed);
    assert_eq!(titles(&record), vec!["XSS", "Root without MFA"]);
}

#[tokio::test]
async fn repeated_results_do_not_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS", "CSRF"]));
    let orch = orchestrator(store, vec![a]);

    let scan_id = orch.start("example.com").await.unwrap();
    let first = orch.get_results(&scan_id).await.unwrap();
    let second = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(first.findings, second.findings);
    assert_eq!(second.findings.len(), 2);
}

#[tokio::test]
async fn erroring_backend_is_skipped_and_its_findings_kept() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS"]));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud).with_findings(&["Public bucket"]));
    b.set_status(ScanStatus::Running);
    a.set_status(ScanStatus::Running);
    let orch = orchestrator(store, vec![a, b.clone()]);

    let scan_id = orch.start("example.com").await.unwrap();
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(record.findings.len(), 2);

    b.fail_results.store(true, Ordering::SeqCst);
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(titles(&record), vec!["XSS", "Public bucket"]);
    assert_eq!(record.status, ScanStatus::Running);
}

#[tokio::test]
async fn repeated_findings_survive_a_backend_error() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS"]));
    let b = Arc::new(
        MockBackend::new("sca", ScanKind::Dependency).with_findings(&["Unpinned rand", "Unpinned rand"]),
    );
    a.set_status(ScanStatus::Running);
    b.set_status(ScanStatus::Running);
    let orch = orchestrator(store.clone(), vec![a, b.clone()]);

    let scan_id = orch.start("example.com").await.unwrap();
    assert_eq!(orch.get_results(&scan_id).await.unwrap().findings.len(), 3);

    b.fail_results.store(true, Ordering::SeqCst);
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(titles(&record), vec!["XSS", "Unpinned rand", "Unpinned rand"]);
    let stored = store.get_scan(&scan_id).await.unwrap().unwrap();
    assert_eq!(stored.findings.len(), 3);
}

#[tokio::test]
async fn all_backends_erroring_leaves_status_untouched() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web));
    a.fail_results.store(true, Ordering::SeqCst);
    let orch = orchestrator(store, vec![a]);

    let scan_id = orch.start("example.com").await.unwrap();
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(record.status, ScanStatus::Queued);
    assert!(record.findings.is_empty());
}

#[tokio::test]
async fn failed_backend_fails_the_aggregate() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS"]));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud));
    b.set_status(ScanStatus::Failed);
    let orch = orchestrator(store, vec![a, b]);

    let scan_id = orch.start("example.com").await.unwrap();
    let record = orch.get_results(&scan_id).await.unwrap();
    assert_eq!(record.status, ScanStatus::Failed);
    assert_eq!(titles(&record), vec!["XSS"]);
}

#[tokio::test]
async fn terminal_record_does_not_regress() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web));
    let orch = orchestrator(store, vec![a.clone()]);

    let scan_id = orch.start("example.com").await.unwrap();
    assert_eq!(orch.get_results(&scan_id).await.unwrap().status, ScanStatus::Completed);

    a.set_status(ScanStatus::Running);
    assert_eq!(orch.get_results(&scan_id).await.unwrap().status, ScanStatus::Completed);
    assert_eq!(
        orch.get_status(&scan_id).await.unwrap(),
        ScanProgress::new(ScanStatus::Completed, 100)
    );
}

#[tokio::test]
async fn results_for_unknown_scan_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(store, vec![Arc::new(MockBackend::new("web", ScanKind::Web))]);
    let err = orch.get_results("no-such-scan").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn status_aggregates_and_mirrors() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud));
    a.set_status(ScanStatus::Running);
    let orch = orchestrator(store.clone(), vec![a.clone(), b]);

    let scan_id = orch.start("example.com").await.unwrap();
    let progress = orch.get_status(&scan_id).await.unwrap();
    assert_eq!(progress.status, ScanStatus::Running);
    // running backend at 50%, completed backend at 100%
    assert_eq!(progress.percent, 75);
    let stored = store.get_scan(&scan_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScanStatus::Running);

    a.set_status(ScanStatus::Completed);
    let progress = orch.get_status(&scan_id).await.unwrap();
    assert_eq!(progress, ScanProgress::new(ScanStatus::Completed, 100));
}

#[tokio::test]
async fn status_keeps_stored_state_when_no_backend_answers() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web));
    a.set_status(ScanStatus::Running);
    let orch = orchestrator(store.clone(), vec![a.clone()]);

    let scan_id = orch.start("example.com").await.unwrap();
    assert_eq!(orch.get_status(&scan_id).await.unwrap().status, ScanStatus::Running);

    // the backend no longer recognises its handle, e.g. after a restart
    a.set_status(ScanStatus::Unknown);
    let progress = orch.get_status(&scan_id).await.unwrap();
    assert_eq!(progress, ScanProgress::new(ScanStatus::Running, 0));
    let stored = store.get_scan(&scan_id).await.unwrap().unwrap();
    assert_eq!(stored.status, ScanStatus::Running);
}

#[tokio::test]
async fn status_of_unknown_scan_is_unknown() {
    let store = Arc::new(MemoryStore::new());
    let orch = orchestrator(store, vec![Arc::new(MockBackend::new("web", ScanKind::Web))]);
    let progress = orch.get_status("no-such-scan").await.unwrap();
    assert_eq!(progress, ScanProgress::unknown());
}

#[tokio::test]
async fn history_is_newest_first_with_findings() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS"]));
    let orch = orchestrator(store, vec![a]);

    let first = orch.start("one.example.com").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = orch.start("two.example.com").await.unwrap();
    orch.get_results(&first).await.unwrap();

    let history = orch.get_history().await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].scan_id, second);
    assert_eq!(history[1].scan_id, first);
    assert_eq!(history[1].findings.len(), 1);
    assert!(history.windows(2).all(|w| w[0].created_at >= w[1].created_at));
}

#[tokio::test]
async fn single_kind_scan_only_touches_matching_backends() {
    let store = Arc::new(MemoryStore::new());
    let web = Arc::new(MockBackend::new("web", ScanKind::Web));
    let cloud = Arc::new(MockBackend::new("cloud", ScanKind::Cloud));
    let orch = orchestrator(store.clone(), vec![web.clone(), cloud.clone()]);

    let scan_id = orch
        .start_with_kind("123456789012", Some(ScanKind::Cloud))
        .await
        .unwrap();
    assert_eq!((web.starts(), cloud.starts()), (0, 1));
    let record = store.get_scan(&scan_id).await.unwrap().unwrap();
    assert_eq!(record.kind, Some(ScanKind::Cloud));
    assert_eq!(record.backend_handles.len(), 1);

    let err = orch
        .start_with_kind("/srv/app", Some(ScanKind::Dependency))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn concurrent_pollers_do_not_lose_findings() {
    let store = Arc::new(MemoryStore::new());
    let a = Arc::new(MockBackend::new("web", ScanKind::Web).with_findings(&["XSS"]));
    let b = Arc::new(MockBackend::new("cloud", ScanKind::Cloud).with_findings(&["Public bucket"]));
    let orch = Arc::new(orchestrator(store.clone(), vec![a, b]));
    let scan_id = orch.start("example.com").await.unwrap();

    let mut pollers = Vec::new();
    for _ in 0..8 {
        let orch = Arc::clone(&orch);
        let scan_id = scan_id.clone();
        pollers.push(tokio::spawn(async move { orch.get_results(&scan_id).await }));
    }
    for poller in pollers {
        assert_eq!(poller.await.unwrap().unwrap().findings.len(), 2);
    }
    let stored = store.get_scan(&scan_id).await.unwrap().unwrap();
    assert_eq!(stored.findings.len(), 2);
}

#[tokio::test]
async fn duplicate_backend_names_are_rejected() {
    let store = Arc::new(MemoryStore::new());
    let res = Orchestrator::builder(store)
        .with_backend(Arc::new(MockBackend::new("web", ScanKind::Web)))
        .with_backend(Arc::new(MockBackend::new("web", ScanKind::Web)))
        .build();
    assert!(matches!(res, Err(AegisError::Config(_))));
}
