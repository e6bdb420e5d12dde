mod args;
mod config;
mod output;
mod runner;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use args::Cli;
use config::AppConfig;
use runner::App;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs);

    let config = AppConfig::load(cli.config.as_deref())?;
    let app = App::build(config).await?;
    let outcome = app.run(cli.command).await;
    app.shutdown().await;
    outcome
}

fn init_logging(verbose: u8, json: bool) {
    let log_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}
