//! # Watch Loop
//!
//! Controller watch loop that monitors Repository resources and triggers
//! reconciliation when their spec changes.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::crd::Repository;
use crate::runtime::error_policy::handle_reconciliation_error;
use futures::StreamExt;
use kube::api::Api;
use kube_runtime::predicates;
use kube_runtime::{reflector, watcher, Controller, WatchStreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

/// Run the controller until a shutdown signal arrives
///
/// Status writes do not bump the generation, so the generation predicate keeps
/// them from retriggering reconciliation.
pub async fn run_watch_loop(
    repositories: Api<Repository>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    let (reader, writer) = reflector::store();
    let stream = watcher(repositories, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(predicates::generation);

    server_state.is_ready.store(true, Ordering::Relaxed);
    info!("Starting controller watch loop...");

    Controller::for_stream(stream, reader)
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(resource = %object.name, "watch.event.success"),
                Err(err) => warn!(error = %err, "Reconciliation dispatch failed"),
            }
        })
        .instrument(watch_span)
        .await;

    server_state.is_ready.store(false, Ordering::Relaxed);
    info!("Controller watch loop stopped");
}
