//! healthyd — the healthy daemon.
//!
//! Loads HTTP check definitions, runs them with the checker and reports
//! failures through the log and, when configured, Twilio SMS.
//!
//! # Usage
//!
//! ```text
//! healthyd --config-file /etc/healthy/config.json
//! healthyd --format toml < config.toml
//! ```

mod config;
mod twilio;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use healthy::{Checker, CompositeNotifier, LogNotifier};

use crate::config::{ConfigFormat, HealthyConfig};
use crate::twilio::TwilioNotifier;

#[derive(Parser)]
#[command(name = "healthyd", about = "Periodic health checks with failure notifications")]
struct Cli {
    /// Configuration file path; read from stdin when omitted.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Configuration syntax; inferred from the file extension by default.
    #[arg(long, value_enum)]
    format: Option<ConfigFormat>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,healthy=debug,healthyd=debug")),
        )
        .init();

    let cli = Cli::parse();

    let config = HealthyConfig::load(cli.config_file.as_deref(), cli.format)
        .context("cannot load configuration")?;

    let mut notifier = CompositeNotifier::new().with(Arc::new(LogNotifier));
    if let Some(twilio) = config.twilio() {
        notifier.push(Arc::new(TwilioNotifier::new(twilio.clone())?));
        info!(to = %twilio.to, "twilio notifications enabled");
    }

    let mut checker = Checker::new()
        .with_notifier(Arc::new(notifier))
        .with_failure_options(config.failure_options());

    for check in &config.http_checks {
        let task = check.build()?;
        info!(
            task = %task.name(),
            period = ?check.period,
            flex = ?check.flex(),
            "setting up check"
        );
        checker.add_task_with_period(task, check.period, check.flex())?;
    }

    info!(checks = checker.len(), "starting all checks");
    checker.run(CancellationToken::new())?;

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("interrupt received, shutting down");

    checker.stop().await;
    info!("done");
    Ok(())
}
