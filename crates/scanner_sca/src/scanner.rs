// crates/scanner_sca/src/scanner.rs
//! Dependency scanner

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use aegis_common::{
    AegisError, AegisResult, BackendReport, Finding, RunLedger, ScanBackend, ScanKind,
    ScanProgress, Severity,
};

use crate::manifests::Manifest;

pub const BACKEND_NAME: &str = "sca";

/// Analyses a project directory on a background task per run.
pub struct DependencyScanner {
    ledger: Arc<RunLedger>,
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl DependencyScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of analysis tasks still running.
    pub fn active_tasks(&self) -> usize {
        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, task)| !task.is_finished());
        tasks.len()
    }

    async fn resolve_target(target: &str) -> AegisResult<PathBuf> {
        let path = PathBuf::from(target.trim());
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => Ok(path),
            Ok(_) => Err(AegisError::InvalidTarget(format!(
                "{} is not a directory",
                path.display()
            ))),
            Err(e) => Err(AegisError::InvalidTarget(format!("{}: {e}", path.display()))),
        }
    }
}

impl Default for DependencyScanner {
    fn default() -> Self {
        Self {
            ledger: Arc::new(RunLedger::new(BACKEND_NAME)),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

/// Read every known manifest under `root`, reporting progress per manifest.
async fn analyze(root: &Path, ledger: &RunLedger, handle: &str) -> AegisResult<Vec<Finding>> {
    let mut findings = Vec::new();
    let mut found = 0;

    for (index, manifest) in Manifest::ALL.iter().enumerate() {
        let path = root.join(manifest.file_name());
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                found += 1;
                findings.extend(manifest.check(&contents)?);
                debug!("Checked {}", path.display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(AegisError::Validation(format!("{}: {e}", path.display())));
            }
        }
        let percent = ((index + 1) * 100 / Manifest::ALL.len()).min(99) as u8;
        ledger.mark_running(handle, percent);
    }

    if found == 0 {
        findings.push(
            Finding::new(ScanKind::Dependency, Severity::Info, "No Dependency Manifests")
                .with_description(format!(
                    "{} contains no Cargo.toml, package.json, requirements.txt or go.mod",
                    root.display()
                )),
        );
    }
    Ok(findings)
}

#[async_trait]
impl ScanBackend for DependencyScanner {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> ScanKind {
        ScanKind::Dependency
    }

    #[instrument(skip(self))]
    async fn start(&self, target: &str) -> AegisResult<String> {
        let root = Self::resolve_target(target).await?;
        let handle = self.ledger.open_tracked(&root.display().to_string());

        let ledger = Arc::clone(&self.ledger);
        let run = handle.clone();
        let task = tokio::spawn(async move {
            ledger.mark_running(&run, 0);
            match analyze(&root, &ledger, &run).await {
                Ok(findings) => {
                    info!("Dependency scan {} finished with {} finding(s)", run, findings.len());
                    ledger.finish(&run, findings);
                }
                Err(e) => {
                    warn!("Dependency scan {} failed: {}", run, e);
                    ledger.fail(&run);
                }
            }
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|(_, task)| !task.is_finished());
        tasks.push((handle.clone(), task));
        Ok(handle)
    }

    async fn status(&self, handle: &str) -> AegisResult<ScanProgress> {
        Ok(self.ledger.progress(handle))
    }

    async fn results(&self, handle: &str) -> AegisResult<BackendReport> {
        self.ledger
            .report(handle)
            .ok_or_else(|| AegisError::NotFound(format!("sca run {handle}")))
    }

    async fn history(&self) -> AegisResult<Vec<BackendReport>> {
        Ok(self.ledger.reports())
    }

    async fn shutdown(&self) {
        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        let mut abandoned = 0;
        for (handle, task) in &tasks {
            task.abort();
            if self.ledger.abandon(handle) {
                abandoned += 1;
            }
        }
        debug!(
            "Aborted {} dependency analysis task(s), {} left unfinished",
            tasks.len(),
            abandoned
        );
    }
}
