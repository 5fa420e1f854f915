mod archive;
mod config;
mod delivery;
mod dingtalk;
mod format;
mod scheduler;
mod translate;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::delivery::{Relay, RunOutcome};
use crate::scheduler::Scheduler;

/// Exit code for a pass cut short by DingTalk (no token, or a send failed).
const EXIT_INCOMPLETE: u8 = 2;

#[derive(Debug, Default)]
struct Args {
    config_path: Option<PathBuf>,
    dry_run: bool,
    once: bool,
}

fn parse_args(args: impl Iterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    for arg in args {
        match arg.as_str() {
            "--dry-run" => parsed.dry_run = true,
            "--once" => parsed.once = true,
            flag if flag.starts_with("--") => anyhow::bail!("Unknown option: {}", flag),
            path if parsed.config_path.is_none() => parsed.config_path = Some(PathBuf::from(path)),
            extra => anyhow::bail!("Unexpected argument: {}", extra),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dingtalk_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!("Failed to load .env: {}", e);
        }
    }

    let args = parse_args(std::env::args().skip(1))?;
    let config_path = args
        .config_path
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    if args.dry_run {
        config.delivery.dry_run = true;
    }
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("  Archive: {}", config.archive.archive_path.display());
    info!("  Ledger: {}", config.archive.ledger_path.display());
    info!("  Window: {}", config.archive.window);
    info!("  Translation: {}", config.translator.enabled);
    if config.delivery.dry_run {
        info!("  Dry run: nothing will be sent or recorded");
    }

    let cron = if args.once {
        None
    } else {
        config.cron().map(str::to_string)
    };
    let relay = Arc::new(Relay::new(config));

    match cron {
        Some(cron) => {
            let mut scheduler = Scheduler::new().await?;
            scheduler.add_relay_job(&cron, relay).await?;
            scheduler.start().await?;

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested");
            scheduler.shutdown().await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            let outcome = relay.run_once().await?;
            log_outcome(&outcome);
            Ok(ExitCode::from(exit_code(&outcome)))
        }
    }
}

fn exit_code(outcome: &RunOutcome) -> u8 {
    if outcome.is_complete() {
        0
    } else {
        EXIT_INCOMPLETE
    }
}

fn log_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Delivered(report) if report.dry_run => info!(
            "Run finished (dry run): {} would be sent, {} skipped",
            report.previewed.len(),
            report.skipped.len()
        ),
        RunOutcome::Delivered(report) => info!(
            "Run finished: {} sent, {} skipped{}",
            report.sent.len(),
            report.skipped.len(),
            if report.aborted { ", stopped early" } else { "" }
        ),
        other => info!("Run finished: {:?}", other),
    }
}
