//! # Error Policy
//!
//! Requeue decision for reconciliations that returned an error.

use crate::constants::DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS;
use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::Repository;
use crate::observability;
use crate::requeue::jitter;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Handle reconciliation errors
///
/// Reconcile only fails when the resource could not be loaded, which is
/// usually a transient API server problem, so retry soon with some jitter.
pub fn handle_reconciliation_error(
    obj: Arc<Repository>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        resource.kind = "Repository",
    );
    let _guard = error_span.enter();

    observability::metrics::increment_reconciliation_errors();

    let requeue_after = jitter::percentage_additive(
        Duration::from_secs(DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS),
        ctx.jitter_percent(),
    );
    error!(
        error = %error,
        requeue_after = ?requeue_after,
        "Reconciliation error for {}/{}",
        namespace,
        name
    );
    Action::requeue(requeue_after)
}
