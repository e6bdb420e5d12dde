// crates/scanner_web/src/scanner.rs
//! Web application scanner

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

use aegis_common::{
    AegisError, AegisResult, BackendReport, Finding, RunLedger, ScanBackend, ScanKind,
    ScanProgress, Severity,
};

pub const BACKEND_NAME: &str = "web";

/// Simulated DAST scanner. Runs progress over a fixed duration and reveal
/// their findings as they go.
pub struct WebAppScanner {
    scan_duration: Duration,
    ledger: RunLedger,
}

impl WebAppScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// How long a run takes to reach `completed`.
    pub fn with_scan_duration(mut self, duration: Duration) -> Self {
        self.scan_duration = duration;
        self
    }

    /// Accept `http(s)://` URLs or bare hostnames (treated as https).
    /// Filesystem paths are rejected.
    fn parse_target(target: &str) -> AegisResult<Url> {
        let target = target.trim();
        if target.is_empty() {
            return Err(AegisError::InvalidTarget("target must not be empty".into()));
        }
        if target.starts_with(['/', '.', '~']) || target.contains('\\') {
            return Err(AegisError::InvalidTarget(format!(
                "'{target}' is a path, not a web target"
            )));
        }
        let candidate = if target.contains("://") {
            target.to_string()
        } else {
            format!("https://{target}")
        };
        let url = Url::parse(&candidate)
            .map_err(|e| AegisError::InvalidTarget(format!("'{target}' is not a web target: {e}")))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(AegisError::InvalidTarget(format!(
                "unsupported scheme '{}' in '{target}'",
                url.scheme()
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(AegisError::InvalidTarget(format!("'{target}' has no host")));
        }
        Ok(url)
    }

    fn findings_for(url: &Url) -> Vec<Finding> {
        let mut findings = vec![
            Finding::new(ScanKind::Web, Severity::High, "Cross-Site Scripting (Reflected)")
                .with_description(format!(
                    "A request parameter on {url} is reflected into the response without encoding"
                ))
                .with_remediation("Encode user-controlled output and apply a Content-Security-Policy"),
            Finding::new(ScanKind::Web, Severity::Low, "Missing Security Headers")
                .with_description("X-Frame-Options header is not set")
                .with_remediation("Send X-Frame-Options: DENY or a frame-ancestors directive"),
        ];
        if url.scheme() == "http" {
            findings.push(
                Finding::new(ScanKind::Web, Severity::Medium, "Cleartext HTTP Transport")
                    .with_description(format!("{} is served without TLS", url.host_str().unwrap_or_default()))
                    .with_remediation("Serve the application over HTTPS and enable HSTS"),
            );
        }
        findings
    }
}

impl Default for WebAppScanner {
    fn default() -> Self {
        Self {
            scan_duration: Duration::from_secs(5),
            ledger: RunLedger::new(BACKEND_NAME),
        }
    }
}

#[async_trait]
impl ScanBackend for WebAppScanner {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    fn kind(&self) -> ScanKind {
        ScanKind::Web
    }

    #[instrument(skip(self))]
    async fn start(&self, target: &str) -> AegisResult<String> {
        let url = Self::parse_target(target)?;
        let handle = self
            .ledger
            .open_timed(url.as_str(), self.scan_duration, Self::findings_for(&url));
        debug!("Web scan {} started against {}", handle, url);
        Ok(handle)
    }

    async fn status(&self, handle: &str) -> AegisResult<ScanProgress> {
        Ok(self.ledger.progress(handle))
    }

    async fn results(&self, handle: &str) -> AegisResult<BackendReport> {
        self.ledger
            .report(handle)
            .ok_or_else(|| AegisError::NotFound(format!("web run {handle}")))
    }

    async fn history(&self) -> AegisResult<Vec<BackendReport>> {
        Ok(self.ledger.reports())
    }
}
