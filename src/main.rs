//! # Release Pipeline Controller
//!
//! A Kubernetes controller that watches GitHub releases and schedules Tekton
//! PipelineRuns for releases whose artifacts are missing.
//!
//! ## Overview
//!
//! For every `Repository` resource the controller:
//!
//! 1. **Lists releases** - Fetches the releases of the GitHub repository, skipping those already built
//! 2. **Filters versions** - Applies the optional semver constraint and deny-list
//! 3. **Checks artifacts** - Looks for release assets and container package versions per release
//! 4. **Schedules builds** - Creates a PipelineRun per missing artifact type
//!
//! ## Usage
//!
//! Configuration comes from environment variables (`GITHUB_TOKEN`,
//! `REQUEUE_ON_HOURS_FROM`, ...) and can be overridden with flags, see `--help`.

use anyhow::Result;
use clap::Parser;
use release_pipeline_controller::config::{Cli, ControllerConfig};
use release_pipeline_controller::runtime::{initialize, run_watch_loop};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().apply(ControllerConfig::from_env());
    let init = initialize(config).await?;

    run_watch_loop(
        init.repositories,
        init.reconciler,
        init.server_state,
        init.shutdown.clone(),
    )
    .await;

    init.shutdown.cancel();
    if let Err(e) = init.server_handle.await {
        warn!("HTTP server task ended abnormally: {}", e);
    }

    info!("Controller stopped");
    Ok(())
}
