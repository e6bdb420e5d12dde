//! Application configuration: defaults, then an optional TOML file, then
//! `AEGIS_*` environment variables.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use aegis_orchestrator::OrchestratorConfig;
use aegis_storage::DEFAULT_DATABASE_URL;

pub const DEFAULT_CONFIG_FILE: &str = "aegis.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub backend_timeout_ms: u64,
    /// Serve Prometheus metrics here while the daemon runs.
    pub metrics_addr: Option<SocketAddr>,
    pub web: WebConfig,
    pub cloud: CloudConfig,
    pub sca: ScaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub enabled: bool,
    pub scan_duration_ms: u64,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub enabled: bool,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub scan_duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaConfig {
    pub enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            backend_timeout_ms: 30_000,
            metrics_addr: None,
            web: WebConfig::default(),
            cloud: CloudConfig::default(),
            sca: ScaConfig::default(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_duration_ms: 5_000,
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            scan_duration_ms: 8_000,
        }
    }
}

impl std::fmt::Debug for CloudConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudConfig")
            .field("enabled", &self.enabled)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("scan_duration_ms", &self.scan_duration_ms)
            .finish()
    }
}

impl AppConfig {
    /// Load from `path` (must exist if given) or `./aegis.toml` (if present),
    /// then apply process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    fn load_with_env(path: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(env)?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    fn apply_env_overrides(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = env("AEGIS_DATABASE_URL") {
            self.database_url = v.trim().to_string();
        }
        override_parsed(&env, "AEGIS_BACKEND_TIMEOUT_MS", &mut self.backend_timeout_ms)?;
        if let Some(v) = env("AEGIS_METRICS_ADDR") {
            let v = v.trim();
            self.metrics_addr = if v.is_empty() {
                None
            } else {
                Some(v.parse().with_context(|| "AEGIS_METRICS_ADDR")?)
            };
        }

        override_bool(&env, "AEGIS_WEB_ENABLED", &mut self.web.enabled)?;
        override_parsed(&env, "AEGIS_WEB_SCAN_DURATION_MS", &mut self.web.scan_duration_ms)?;

        override_bool(&env, "AEGIS_CLOUD_ENABLED", &mut self.cloud.enabled)?;
        if let Some(v) = env("AEGIS_CLOUD_REGION") {
            self.cloud.region = v.trim().to_string();
        }
        if let Some(v) = env("AEGIS_CLOUD_ACCESS_KEY_ID") {
            self.cloud.access_key_id = v.trim().to_string();
        }
        if let Some(v) = env("AEGIS_CLOUD_SECRET_ACCESS_KEY") {
            self.cloud.secret_access_key = v.trim().to_string();
        }
        override_parsed(&env, "AEGIS_CLOUD_SCAN_DURATION_MS", &mut self.cloud.scan_duration_ms)?;

        override_bool(&env, "AEGIS_SCA_ENABLED", &mut self.sca.enabled)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.backend_timeout_ms == 0 {
            bail!("backend_timeout_ms must be greater than zero");
        }
        if !(self.web.enabled || self.cloud.enabled || self.sca.enabled) {
            bail!("at least one scan backend must be enabled");
        }
        Ok(())
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_backend_timeout(Duration::from_millis(self.backend_timeout_ms))
    }
}

fn override_parsed<T>(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(v) = env(key) {
        *slot = v.trim().parse().with_context(|| key.to_string())?;
    }
    Ok(())
}

fn override_bool(env: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut bool) -> Result<()> {
    if let Some(v) = env(key) {
        *slot = parse_bool(&v).with_context(|| key.to_string())?;
    }
    Ok(())
}

fn parse_bool(s: &str) -> Result<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("'{other}' is not a boolean (true|false|1|0|yes|no|on|off)")),
    }
}
