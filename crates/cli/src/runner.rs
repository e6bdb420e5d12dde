// runner.rs
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use aegis_common::{ScanBackend, ScanKind};
use aegis_orchestrator::Orchestrator;
use aegis_scanner_cloud::{CloudCredentials, CloudPostureScanner};
use aegis_scanner_sca::DependencyScanner;
use aegis_scanner_web::WebAppScanner;
use aegis_scheduler::Scheduler;
use aegis_storage::SqliteStore;

use crate::args::{Commands, OutputFormat, ScheduleAction};
use crate::config::AppConfig;
use crate::output;

/// Wired-up services for one CLI invocation.
pub struct App {
    store: Arc<SqliteStore>,
    orchestrator: Arc<Orchestrator>,
    config: AppConfig,
}

impl App {
    pub async fn build(config: AppConfig) -> Result<Self> {
        let store = Arc::new(
            SqliteStore::connect(&config.database_url)
                .await
                .with_context(|| format!("Failed to open database {}", config.database_url))?,
        );

        let mut builder = Orchestrator::builder(store.clone()).with_config(config.orchestrator());
        for backend in backends(&config) {
            builder = builder.with_backend(backend);
        }
        let orchestrator = Arc::new(builder.build()?);
        info!("Backends: {}", orchestrator.backend_names().join(", "));

        Ok(Self {
            store,
            orchestrator,
            config,
        })
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.store.clone(), Arc::clone(&self.orchestrator))
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Scan {
                target,
                kind,
                wait,
                poll_interval,
                output_format,
            } => {
                self.scan(&target, kind, wait, Duration::from_millis(poll_interval.max(1)), output_format)
                    .await
            }
            Commands::Status {
                scan_id,
                output_format,
            } => {
                let progress = self.orchestrator.get_status(&scan_id).await?;
                println!("{}", output::progress(&scan_id, &progress, output_format)?);
                Ok(())
            }
            Commands::Results {
                scan_id,
                output_format,
            } => {
                let record = self.orchestrator.get_results(&scan_id).await?;
                println!("{}", output::record(&record, output_format)?);
                Ok(())
            }
            Commands::History { output_format } => {
                let records = self.orchestrator.get_history().await?;
                println!("{}", output::history(&records, output_format)?);
                Ok(())
            }
            Commands::Schedule { action } => self.schedule(action).await,
            Commands::Daemon => self.daemon().await,
        }
    }

    async fn scan(
        &self,
        target: &str,
        kind: Option<ScanKind>,
        wait: bool,
        poll_interval: Duration,
        format: OutputFormat,
    ) -> Result<()> {
        let scan_id = self.orchestrator.start_with_kind(target, kind).await?;
        if !wait {
            println!("{}", output::scan_started(&scan_id, format)?);
            return Ok(());
        }

        info!("Waiting for scan {}", scan_id);
        loop {
            let progress = self.orchestrator.get_status(&scan_id).await?;
            info!("Scan {}: {} {}%", scan_id, progress.status, progress.percent);
            if progress.status.is_terminal() {
                break;
            }
            tokio::time::sleep(poll_interval).await;
        }

        let record = self.orchestrator.get_results(&scan_id).await?;
        println!("{}", output::record(&record, format)?);
        Ok(())
    }

    async fn schedule(&self, action: ScheduleAction) -> Result<()> {
        let scheduler = self.scheduler();
        match action {
            ScheduleAction::Add { target, kind, cron } => {
                let schedule = scheduler.add_schedule_with_kind(&target, kind, &cron).await?;
                println!("Added schedule {} ({} -> {})", schedule.id, schedule.expression, schedule.target);
                println!("Run `aegis daemon` to execute it.");
            }
            ScheduleAction::List { output_format } => {
                let schedules = scheduler.get_schedules().await?;
                println!("{}", output::schedules(&schedules, output_format)?);
            }
            ScheduleAction::Remove { id } => {
                scheduler.remove_schedule(id).await?;
                println!("Removed schedule {id}");
            }
        }
        Ok(())
    }

    async fn daemon(&self) -> Result<()> {
        if let Some(addr) = self.config.metrics_addr {
            aegis_telemetry::install_prometheus(addr)?;
            info!("Serving metrics on http://{}/metrics", addr);
        }

        let scheduler = self.scheduler();
        let armed = scheduler.start().await?;
        info!("Daemon running with {} schedule(s); press Ctrl-C to stop", armed);

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        info!("Shutting down");
        scheduler.stop();
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.orchestrator.shutdown().await;
        self.store.close().await;
    }
}

/// Backends enabled in `config`, in registration order.
fn backends(config: &AppConfig) -> Vec<Arc<dyn ScanBackend>> {
    let mut backends: Vec<Arc<dyn ScanBackend>> = Vec::new();
    if config.web.enabled {
        backends.push(Arc::new(
            WebAppScanner::new().with_scan_duration(Duration::from_millis(config.web.scan_duration_ms)),
        ));
    }
    if config.cloud.enabled {
        let credentials = CloudCredentials::new(
            config.cloud.region.clone(),
            config.cloud.access_key_id.clone(),
            config.cloud.secret_access_key.clone(),
        );
        if config.cloud.access_key_id.is_empty() || config.cloud.secret_access_key.is_empty() {
            warn!("Cloud backend enabled without credentials; scans including it will fail to start");
        }
        backends.push(Arc::new(
            CloudPostureScanner::new(credentials)
                .with_scan_duration(Duration::from_millis(config.cloud.scan_duration_ms)),
        ));
    }
    if config.sca.enabled {
        backends.push(Arc::new(DependencyScanner::new()));
    }
    backends
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.database_url = "sqlite::memory:".to_string();
        config.web.scan_duration_ms = 0;
        config
    }

    #[test]
    fn backends_follow_config() {
        let mut config = memory_config();
        assert_eq!(backends(&config).len(), 1);

        config.cloud.enabled = true;
        config.sca.enabled = true;
        let names: Vec<String> = backends(&config).iter().map(|b| b.name().to_string()).collect();
        assert_eq!(names, vec!["web", "cloud", "sca"]);
    }

    #[tokio::test]
    async fn scan_and_wait_completes() {
        let app = App::build(memory_config()).await.unwrap();
        app.run(Commands::Scan {
            target: "example.com".to_string(),
            kind: None,
            wait: true,
            poll_interval: 10,
            output_format: OutputFormat::Json,
        })
        .await
        .unwrap();

        let history = app.orchestrator.get_history().await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].status.is_terminal());
        assert_eq!(history[0].findings.len(), 2);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn unconfigured_cloud_blocks_mixed_scans() {
        let mut config = memory_config();
        config.cloud.enabled = true;
        let app = App::build(config).await.unwrap();

        let err = app
            .run(Commands::Scan {
                target: "example.com".to_string(),
                kind: None,
                wait: false,
                poll_interval: 10,
                output_format: OutputFormat::Text,
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to start"));

        // a web-only scan still works
        app.run(Commands::Scan {
            target: "example.com".to_string(),
            kind: Some(ScanKind::Web),
            wait: false,
            poll_interval: 10,
            output_format: OutputFormat::Text,
        })
        .await
        .unwrap();
        assert_eq!(app.orchestrator.get_history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn mixed_backends_scope_scans_by_kind() {
        let mut config = memory_config();
        config.sca.enabled = true;
        let app = App::build(config).await.unwrap();
        let project = tempfile::tempdir().unwrap();
        let project_path = project.path().display().to_string();

        let scan = |target: &str, kind: Option<ScanKind>| Commands::Scan {
            target: target.to_string(),
            kind,
            wait: false,
            poll_interval: 10,
            output_format: OutputFormat::Text,
        };

        // a directory is not a web target, so a fan-out to both fails
        let err = app.run(scan(&project_path, None)).await.unwrap_err();
        assert!(err.to_string().contains("web"));

        app.run(scan(&project_path, Some(ScanKind::Dependency))).await.unwrap();
        app.run(scan("example.com", Some(ScanKind::Web))).await.unwrap();
        let kinds: Vec<_> = app
            .orchestrator
            .get_history()
            .await
            .unwrap()
            .iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&Some(ScanKind::Dependency)));
        assert!(kinds.contains(&Some(ScanKind::Web)));

        app.run(Commands::Schedule {
            action: ScheduleAction::Add {
                target: project_path.clone(),
                kind: Some(ScanKind::Dependency),
                cron: "@daily".to_string(),
            },
        })
        .await
        .unwrap();
        let schedules = app.scheduler().get_schedules().await.unwrap();
        assert_eq!(schedules[0].kind, Some(ScanKind::Dependency));

        let err = app
            .run(Commands::Schedule {
                action: ScheduleAction::Add {
                    target: "123456789012".to_string(),
                    kind: Some(ScanKind::Cloud),
                    cron: "@daily".to_string(),
                },
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no registered backend"));
        app.shutdown().await;
    }

    #[tokio::test]
    async fn schedule_commands() {
        let app = App::build(memory_config()).await.unwrap();
        app.run(Commands::Schedule {
            action: ScheduleAction::Add {
                target: "example.com".to_string(),
                kind: None,
                cron: "@daily".to_string(),
            },
        })
        .await
        .unwrap();

        let scheduler = app.scheduler();
        let schedules = scheduler.get_schedules().await.unwrap();
        assert_eq!(schedules.len(), 1);

        app.run(Commands::Schedule {
            action: ScheduleAction::Remove { id: schedules[0].id },
        })
        .await
        .unwrap();
        assert!(scheduler.get_schedules().await.unwrap().is_empty());

        let err = app
            .run(Commands::Schedule {
                action: ScheduleAction::Add {
                    target: "example.com".to_string(),
                    kind: None,
                    cron: "every day".to_string(),
                },
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid schedule expression"));
    }
}
