#![forbid(unsafe_code)]

//! `approver-policy`: certificate request approval controller binary.
//!
//! Loads configuration, syncs manifests into the store, and runs the
//! controller, the manifest watcher, and the HTTP API until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use approver_policy::api::{self, ApiState};
use approver_policy::approver::registry::Registry;
use approver_policy::approver::webhook::WebhookApprover;
use approver_policy::authz::rbac::RbacAuthorizer;
use approver_policy::config::GlobalConfig;
use approver_policy::controller::Controller;
use approver_policy::engine::combiner::DecisionCombiner;
use approver_policy::persistence::memory::MemoryStore;
use approver_policy::persistence::sqlite_store::SqliteStore;
use approver_policy::persistence::{db, Store};
use approver_policy::policy::watcher::ManifestWatcher;
use approver_policy::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "approver-policy",
    about = "Certificate request approval controller",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the manifest directory from the config file.
    #[arg(long)]
    manifests: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("approver-policy bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(dir) = args.manifests {
        config.manifests_dir = dir;
    }
    info!(manifests = %config.manifests_dir.display(), "configuration loaded");

    // ── Initialize store ────────────────────────────────
    let store: Arc<dyn Store> = match config.db_path.as_deref() {
        Some(path) => {
            let pool = db::connect(path).await?;
            info!(path = %path.display(), "database connected");
            Arc::new(SqliteStore::new(Arc::new(pool)))
        }
        None => {
            info!("no db_path configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // ── Build approvers and authorizer ──────────────────
    let mut registry = Registry::with_builtins();
    for plugin in &config.plugins {
        let approver = WebhookApprover::new(&plugin.name, &plugin.endpoint, plugin.timeout())?;
        registry = registry.with_plugin(Arc::new(approver));
        info!(plugin = %plugin.name, endpoint = %plugin.endpoint, "registered plugin approver");
    }
    let authorizer = Arc::new(RbacAuthorizer::new());
    let combiner = DecisionCombiner::new(Arc::new(registry), authorizer.clone());

    let ct = CancellationToken::new();
    let controller = Controller::new(
        Arc::clone(&store),
        combiner,
        config.controller.clone(),
        ct.clone(),
    );

    // ── Start controller, then load manifests ──────────
    // The dispatcher must be draining events before the initial sync
    // publishes them.
    let api_state = ApiState::new(Arc::clone(&store), controller.events());
    let watcher = ManifestWatcher::new(
        config.manifests_dir.clone(),
        Arc::clone(&store),
        authorizer,
        controller.events(),
    );
    let controller = controller.start().await?;
    let watcher_handle = match load_and_watch(watcher, ct.clone()).await {
        Ok(handle) => handle,
        Err(err) => {
            controller.shutdown().await;
            return Err(err);
        }
    };

    // ── Start API ───────────────────────────────────────
    let api_ct = ct.clone();
    let http_port = config.http_port;
    let api_handle = tokio::spawn(async move {
        if let Err(err) = api::serve_http(http_port, api_state, api_ct).await {
            error!(%err, "HTTP API failed");
        }
    });

    info!("approver-policy ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    controller.shutdown().await;
    let _ = tokio::join!(watcher_handle, api_handle);
    info!("approver-policy shut down");

    Ok(())
}

/// Initial manifest sync, then hot reload until `ct` fires.
async fn load_and_watch(watcher: ManifestWatcher, ct: CancellationToken) -> Result<JoinHandle<()>> {
    let report = watcher.sync().await?;
    info!(
        policies = report.policies_changed.len(),
        namespaces = report.namespaces_changed.len(),
        "initial manifests loaded"
    );
    watcher.spawn(ct)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
