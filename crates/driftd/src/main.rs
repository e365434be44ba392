//! driftd — the driftwatch daemon.
//!
//! Single binary that assembles the scoring service:
//! - Settings (TOML file, env override)
//! - Anomaly model (lazy-loaded isolation forest)
//! - Metrics registry
//! - Serving pipeline + HTTP API
//!
//! and the offline trainer that produces the model artifact.
//!
//! # Usage
//!
//! ```text
//! driftd train --config config/settings.toml
//! driftd serve --config config/settings.toml --port 8000
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use drift_api::ServingPipeline;
use drift_core::Settings;
use drift_metrics::MetricsRegistry;
use drift_model::AnomalyModel;

#[derive(Parser)]
#[command(name = "driftd", about = "driftwatch anomaly scoring daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve /health, /predict and /metrics.
    Serve {
        /// Settings file (overridden by DRIFT_SETTINGS).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address; defaults to `service.host`.
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on; defaults to `service.port`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Train on synthetic data and write the model artifact.
    Train {
        /// Settings file (overridden by DRIFT_SETTINGS).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,driftd=debug,drift=debug"))?,
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, host, port } => {
            let mut settings = Settings::load(config.as_deref())?;
            if let Some(host) = host {
                settings.service.host = host;
            }
            if let Some(port) = port {
                settings.service.port = port;
            }
            serve(settings).await
        }
        Command::Train { config } => {
            let settings = Settings::load(config.as_deref())?;
            let report = tokio::task::spawn_blocking(move || drift_model::train_and_save(&settings))
                .await
                .context("training task panicked")??;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    info!(env = %settings.service.env, "driftwatch daemon starting");

    // ── Initialize subsystems ──────────────────────────────────────

    let metrics = Arc::new(MetricsRegistry::new(&settings.monitoring.latency_buckets));
    let model = Arc::new(AnomalyModel::new());
    let (host, port) = (settings.service.host.clone(), settings.service.port);
    let pipeline = Arc::new(ServingPipeline::new(Arc::new(settings), model, metrics));

    // A missing artifact is served lazily; a corrupt one aborts startup.
    match pipeline.ensure_loaded() {
        Ok(true) => info!("model ready"),
        Ok(false) => warn!(
            path = %pipeline.settings().model_path.display(),
            "no model artifact yet, will load on first request"
        ),
        Err(e) => return Err(anyhow::Error::new(e).context("loading model at startup")),
    }

    // ── Start API server ───────────────────────────────────────────

    let router = drift_api::build_router(pipeline).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("driftwatch daemon stopped");
    Ok(())
}
