// crates/scanner_cloud/src/scanner.rs
//! Cloud posture scanner

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use aegis_common::{
    AegisError, AegisResult, BackendReport, Finding, RunLedger, ScanBackend, ScanKind,
    ScanProgress, Severity,
};

pub const BACKEND_NAME: &str = "cloud";

static ACCOUNT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{12}$").expect("valid regex"));
static ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:[a-z0-9-]+:[a-z0-9-]*:(\d{12})?:\S+$").expect("valid regex")
});

/// Credentials the scanner needs before it can start any run.
#[derive(Clone, Default)]
pub struct CloudCredentials {
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl CloudCredentials {
    pub fn new(
        region: impl Into<String>,
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
        }
    }

    fn missing(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.region.trim().is_empty() {
            missing.push("region");
        }
        if self.access_key_id.trim().is_empty() {
            missing.push("access key id");
        }
        if self.secret_access_key.trim().is_empty() {
            missing.push("secret access key");
        }
        missing
    }
}

// keep the secret out of logs
impl fmt::Debug for CloudCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudCredentials")
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Simulated cloud configuration review of one account.
pub struct CloudPostureScanner {
    credentials: CloudCredentials,
    scan_duration: Duration,
    ledger: RunLedger,
}

impl CloudPostureScanner {
    pub fn new(credentials: CloudCredentials) -> Self {
        Self {
            credentials,
            scan_duration: Duration::from_secs(8),
            ledger: RunLedger::new(BACKEND_NAME),
        }
    }

    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    pub fn region(&self) -> &str {
        &self.credentials.region
    }

    fn validate_target(target: &str) -> AegisResult<&str> {
        let target = target.trim();
        if ACCOUNT_ID.is_match(target) || ARN.is_match(target) {
            Ok(target)
        } else {
            Err(AegisError::InvalidTarget(format!(
                "'{target}' is neither a 12-digit account id nor an ARN"
            )))
        }
    }

    fn findings_for(&self, target: &str) -> Vec<Finding> {
        vec![
            Finding::new(ScanKind::Cloud, Severity::Critical, "S3 Bucket Publicly Accessible")
                .with_description(format!(
                    "A bucket in {target} ({}) grants read access to everyone",
                    self.credentials.region
                ))
                .with_remediation("Enable S3 Block Public Access at the account level"),
            Finding::new(ScanKind::Cloud, Severity::Critical, "Root Account Without MFA")
                .with_description("The root user has no multi-factor authentication device")
                .with_remediation("Attach a hardware MFA device to the root user"),
            Finding::new(ScanKind::Cloud, Severity::High, "Security Group Open To The World")
                .with_description("Inbound SSH (22/tcp) is allowed from 0.0.0.0/0")
                .with_remediation("Restrict SSH ingress to known administrative ranges"),
        ]
    }
}

#[async_trait]
impl ScanBackend for CloudPostureScanner {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> ScanKind {
        ScanKind::Cloud
    }

    #[instrument(skip(self))]
    async fn start(&self, target: &str) -> AegisResult<String> {
        let missing = self.credentials.missing();
        if !missing.is_empty() {
            warn!("Cloud scanner not configured: missing {}", missing.join(", "));
            return Err(AegisError::BackendUnavailable(format!(
                "cloud credentials incomplete: missing {}",
                missing.join(", ")
            )));
        }
        let target = Self::validate_target(target)?;

        let handle = self
            .ledger
            .open_timed(target, self.scan_duration, self.findings_for(target));
        debug!("Cloud scan {} started for {} in {}", handle, target, self.credentials.region);
        Ok(handle)
    }

    async fn status(&self, handle: &str) -> AegisResult<ScanProgress> {
        Ok(self.ledger.progress(handle))
    }

    async fn results(&self, handle: &str) -> AegisResult<BackendReport> {
        self.ledger
            .report(handle)
            .ok_or_else(|| AegisError::NotFound(format!("cloud run {handle}")))
    }

    async fn history(&self) -> AegisResult<Vec<BackendReport>> {
        Ok(self.ledger.reports())
    }
}
