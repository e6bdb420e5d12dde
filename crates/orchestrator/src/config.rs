//! Orchestrator tuning

use std::time::Duration;

/// Limits applied to every backend call made by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Upper bound on a single backend `start`, `status` or `results` call.
    pub backend_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(30),
        }
    }
}

impl OrchestratorConfig {
    /// Interactive preset: fail fast on slow backends.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            backend_timeout: Duration::from_secs(5),
        }
    }

    /// Patient preset for slow or remote backends.
    #[must_use]
    pub fn patient() -> Self {
        Self {
            backend_timeout: Duration::from_secs(120),
        }
    }

    #[must_use]
    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }
}
