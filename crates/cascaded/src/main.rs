//! cascaded — the Cascade autoscaler daemon.
//!
//! Loads a topology config, then runs the reconciliation loop against
//! Kubernetes deployments and SQS-compatible queues while serving status
//! and Prometheus metrics over HTTP.
//!
//! # Usage
//!
//! ```text
//! cascaded run --config cascade.toml --port 8080
//! cascaded check --config cascade.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use cascade_adapters::{KubernetesClient, SqsQueueDepths};
use cascade_autoscale::{Autoscaler, LoggingScaleSink, ScaleSink};
use cascade_core::CascadeConfig;
use cascade_metrics::GaugeCache;

const DEFAULT_LOG_FILTER: &str = "info,cascade=debug";

#[derive(Parser)]
#[command(name = "cascaded", about = "Queue-driven predictive autoscaler")]
struct Cli {
    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the autoscaler loop and the status server.
    Run {
        /// Path to the topology and strategy config.
        #[arg(long, short, default_value = "cascade.toml")]
        config: PathBuf,

        /// Port for /status, /healthz and /metrics.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Log scale commands instead of sending them.
        #[arg(long)]
        dry_run: bool,

        /// Override the `application` label on exported gauges.
        #[arg(long)]
        application: Option<String>,
    },
    /// Validate a config file and print the topology.
    Check {
        #[arg(long, short, default_value = "cascade.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            port,
            dry_run,
            application,
        } => run(&config, port, dry_run, application).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

fn load_config(path: &Path) -> anyhow::Result<CascadeConfig> {
    let config = CascadeConfig::from_file(path)
        .with_context(|| format!("loading config {}", path.display()))?;
    info!(
        path = %path.display(),
        queues = config.topology.len(),
        services = config.topology.services().len(),
        "config loaded"
    );
    Ok(config)
}

async fn run(
    config_path: &Path,
    port: u16,
    dry_run: bool,
    application: Option<String>,
) -> anyhow::Result<()> {
    info!("cascade daemon starting");

    let config = load_config(config_path)?;
    let call_timeout = config.control_loop.call_timeout();
    let interval = config.control_loop.interval();
    let export_metrics = config.strategy.export_metrics;
    let application = application.unwrap_or(config.application);

    // ── Collaborators ──────────────────────────────────────────

    let sqs = config
        .sqs
        .as_ref()
        .context("config has no [sqs] section; queue depths cannot be read")?;
    let queues = Arc::new(SqsQueueDepths::new(sqs, call_timeout));

    let kubernetes = config
        .kubernetes
        .as_ref()
        .context("config has no [kubernetes] section; replica counts cannot be read")?;
    let cluster = Arc::new(KubernetesClient::new(kubernetes, call_timeout));
    info!(api_url = %kubernetes.api_url, namespace = %kubernetes.namespace, "kubernetes client ready");

    let sink: Arc<dyn ScaleSink> = if dry_run {
        warn!("dry run: scale commands will only be logged");
        Arc::new(LoggingScaleSink)
    } else {
        cluster.clone()
    };

    if !config.strategy.scaling_enabled {
        warn!("scaling is disabled, only queue depths will be sampled");
    }

    let autoscaler = Autoscaler::new(config.topology, config.strategy, queues, cluster, sink)
        .with_gauges(GaugeCache::new(application))
        .with_call_timeout(call_timeout);
    let status = autoscaler.status();

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Autoscaler loop ────────────────────────────────────────

    let autoscale_handle = tokio::spawn(async move {
        autoscaler.run(interval, shutdown_rx).await;
    });

    // ── Status server ──────────────────────────────────────────

    let router = cascade_api::build_router(status, export_metrics);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, export_metrics, "status server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    // Let an in-flight tick finish.
    if let Err(e) = autoscale_handle.await {
        error!(error = %e, "autoscaler task failed");
    }

    info!("cascade daemon stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
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
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let topology = &config.topology;

    println!("config {} is valid", config_path.display());
    println!(
        "  strategy: scaling={} follow_up={} decrease/min={} max_pods={} stabilization={}s",
        config.strategy.scaling_enabled,
        config.strategy.follow_up_scaling_enabled,
        config.strategy.queue_decrease_per_minute,
        config.strategy.max_number_of_pods,
        config.strategy.down_scale_stabilization_seconds,
    );
    println!("  queues:");
    for (queue, binding) in topology.bindings() {
        if binding.has_consumer() {
            println!(
                "    {queue} -> {} ({} msg/min per replica)",
                binding.service, binding.consumption_rate
            );
        } else {
            println!("    {queue} (terminal)");
        }
        for (target, rate) in &binding.produces {
            println!("      produces {target} x{rate}");
        }
    }
    Ok(())
}
