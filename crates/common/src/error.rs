//! Error types for Aegis
//!
//! One taxonomy shared by backends, stores, the orchestrator and the scheduler,
//! so an outer HTTP layer can map each condition to a status code.

use std::fmt;
use thiserror::Error;

/// A single backend that failed during a fan-out call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: String,
    pub reason: String,
}

impl BackendFailure {
    pub fn new(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

fn join_failures(failures: &[BackendFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Error, Debug)]
pub enum AegisError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Invalid schedule expression: {0}")]
    InvalidSchedule(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Scan backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{} backend(s) failed to start: {}", .0.len(), join_failures(.0))]
    BackendStart(Vec<BackendFailure>),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AegisError {
    /// Unknown scan or schedule identifier.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, AegisError::NotFound(_))
    }

    /// Rejected before anything was contacted or persisted.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AegisError::InvalidTarget(_) | AegisError::InvalidSchedule(_) | AegisError::Validation(_)
        )
    }
}

/// Result type alias for Aegis operations
pub type AegisResult<T> = Result<T, AegisError>;
