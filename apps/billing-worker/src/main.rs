//! # MOVO Billing Worker
//!
//! Loads `billing.toml`, opens the billing database and runs the billing
//! cycle, either once or on an interval until SIGINT/SIGTERM.
//!
//! ```text
//! USAGE:
//!     billing-worker [--once] [--config <path>]
//!
//! ENVIRONMENT:
//!     RUST_LOG                 log filter (default: info)
//!     MOVO_DATABASE_PATH       SQLite file
//!     MOVO_MAIL_PROVIDER       log | resend
//!     MOVO_RESEND_API_KEY      required with resend
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use movo_billing::{
    mailer, BillingAgent, BillingConfig, BillingContext, BillingServices, RetryPolicy, SystemTime,
};
use movo_db::{Database, DbConfig, InstrumentedStore};

struct Args {
    once: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Option<Args>> {
    let mut args = Args {
        once: false,
        config: None,
    };

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--once" => args.once = true,
            "--config" => {
                let path = iter.next().context("--config requires a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                println!("Usage: billing-worker [--once] [--config <path>]");
                return Ok(None);
            }
            other => bail!("unknown argument: {}", other),
        }
    }

    Ok(Some(args))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    let Some(args) = parse_args()? else {
        return Ok(());
    };

    info!("Starting MOVO billing worker...");

    let config = BillingConfig::load(args.config).context("loading billing config")?;
    let db_path = config.database.resolved_path();
    info!(
        db = %db_path.display(),
        mailer = %config.mail.provider,
        interval_secs = config.cycle.interval_secs,
        "Configuration loaded"
    );

    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }

    let db_config = DbConfig::new(db_path.clone()).max_connections(config.database.max_connections);
    let db = Database::new(db_config)
        .await
        .context("opening billing database")?;
    info!("Billing database ready");

    let mail = mailer::from_settings(&config.mail)?;
    let ctx = BillingContext::new(
        Arc::new(InstrumentedStore::new(db)),
        Arc::new(SystemTime),
        config.policy.clone(),
    )
    .with_retry(RetryPolicy::from(&config.cycle));
    let services = BillingServices::new(ctx.clone(), mail, config.mail.clone(), &config.cycle);

    if args.once {
        let report = services.cycle.run_now().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (agent, handle) = BillingAgent::new(ctx, services.cycle.clone(), config.cycle.interval());
    let task = tokio::spawn(agent.run());

    shutdown_signal().await;
    handle.shutdown().await?;
    task.await.context("billing agent task panicked")?;

    info!("Billing worker stopped");
    Ok(())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping billing agent...");
}
