use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use relay_core::{load_config, Validate, ValidationIssue, ValidationLevel};
use relay_web::{run_web_server, WebState};
use relayd::{init_tracing, RelayService};

const DEFAULT_CONFIG: &str = "config/relay.toml";

/// Webhook-driven task relay: HTTP intake, task API and the task engine.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(name = "relay-web")]
struct CliArgs {
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Overrides `[server] bind`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run(CliArgs::parse()).await {
        eprintln!("relay-web failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config = load_config(&args.config)
        .with_context(|| format!("failed to load config at {}", args.config.display()))?;
    init_tracing(&config.logging);
    check_config(&config.validate())?;
    let bind = resolve_bind(args.bind, &config.server.bind)?;

    let service = RelayService::from_config(config)
        .await
        .context("failed to start task engine")?;
    let served = run_web_server(&bind, WebState::new(service.clone()), shutdown_signal()).await;
    service.shutdown().await;
    served.context("http server failed")?;
    Ok(())
}

fn resolve_bind(bind_override: Option<String>, config_bind: &str) -> Result<String> {
    let candidate = bind_override.unwrap_or_else(|| config_bind.to_string());
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        bail!("bind address must not be empty");
    }
    Ok(trimmed.to_string())
}

fn check_config(issues: &[ValidationIssue]) -> Result<()> {
    for issue in issues {
        if issue.level == ValidationLevel::Warning {
            tracing::warn!(code = issue.code, "{}", issue.message);
        }
    }
    let errors = issues
        .iter()
        .filter(|issue| issue.level == ValidationLevel::Error)
        .map(|issue| format!("{}: {}", issue.code, issue.message))
        .collect::<Vec<_>>();
    if errors.is_empty() {
        return Ok(());
    }
    bail!("config validation failed ({})", errors.join("; "))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown requested");
}
