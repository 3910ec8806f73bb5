//! # Initialization
//!
//! Controller initialization logic including rustls setup, tracing, metrics,
//! server startup, and Kubernetes client setup.

use crate::config::ControllerConfig;
use crate::controller::events::KubeEventPublisher;
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::controller::store::KubeRepositoryStore;
use crate::crd::Repository;
use crate::github::GithubClient;
use crate::observability;
use crate::tekton::TektonPipelineRunner;
use anyhow::{anyhow, Context, Result};
use kube::{api::Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Initialization result containing all necessary components for the controller
pub struct InitializationResult {
    /// API for the Repository CRD, scoped to the watch namespace
    pub repositories: Api<Repository>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub server_handle: JoinHandle<()>,
    /// Cancelled on SIGINT or SIGTERM
    pub shutdown: CancellationToken,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field(
                "server_ready",
                &self
                    .server_state
                    .is_ready
                    .load(std::sync::atomic::Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation
/// - Reconciler setup
pub async fn initialize(config: ControllerConfig) -> Result<InitializationResult> {
    // Must happen before any TLS connection is opened
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    init_tracing(&config);

    info!("Starting Release Pipeline Controller");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
    info!(?config, "Loaded configuration");

    observability::metrics::register_metrics()?;

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let server_state = Arc::new(ServerState::default());
    let server_handle = {
        let state = Arc::clone(&server_state);
        let shutdown = shutdown.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let repositories: Api<Repository> = match &config.watch_namespace {
        Some(namespace) => {
            info!(namespace = %namespace, "Watching Repositories in a single namespace");
            Api::namespaced(client.clone(), namespace)
        }
        None => Api::all(client.clone()),
    };

    let github = GithubClient::new(config.github_client_config())
        .context("Failed to build GitHub client")?;
    let requeue_policy = config
        .requeue_policy()
        .context("Invalid requeue window")?;

    let reconciler = Reconciler::new(
        Arc::new(github),
        Arc::new(TektonPipelineRunner::new(client.clone())),
        Arc::new(KubeRepositoryStore::new(client.clone())),
        Arc::new(KubeEventPublisher::new(client)),
    )
    .with_requeue_policy(requeue_policy)
    .with_interval(config.requeue_interval(), config.jitter_percent)
    .with_cancellation(shutdown.child_token());

    info!("Controller initialized, starting watch loop...");

    Ok(InitializationResult {
        repositories,
        reconciler: Arc::new(reconciler),
        server_state,
        server_handle,
        shutdown,
    })
}

fn init_tracing(config: &ControllerConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "release_pipeline_controller=info".into());

    if config.json_logs() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

/// Cancel `shutdown` on SIGINT or SIGTERM
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for SIGINT: {}", e);
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
                    error!("Failed to listen for SIGTERM: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => {}
            () = terminate => {}
        }

        info!("Received shutdown signal, initiating graceful shutdown...");
        shutdown.cancel();
    });
}
