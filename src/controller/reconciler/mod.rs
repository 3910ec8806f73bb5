//! # Reconciler
//!
//! Core reconciliation logic for `Repository` resources.
//!
//! ## Reconciliation Flow
//!
//! 1. Load the resource and reset the status for a new cycle
//! 2. Verify that every referenced Tekton Pipeline exists
//! 3. Drop run records of PipelineRuns that are gone or expired
//! 4. Fetch unseen releases from GitHub and apply the version filter
//! 5. Fetch release artifacts and flag missing artifact types
//! 6. Schedule PipelineRuns for releases with missing artifacts
//! 7. Persist the status and requeue
//!
//! Every step that fails ends the cycle with a condition and a requeue delay.
//! Only a failure to load the resource is returned as an error.

mod artifacts;
mod releases;
mod runs;

pub use artifacts::{has_valid_artifacts, mark_missing_artifacts, ArtifactFetch, ReleaseArtifacts};
pub use runs::{RunOutcome, RunSummary};

use crate::clock::{Clock, SystemClock};
use crate::constants::{
    ARTIFACTS_RATE_LIMIT_JITTER_MINUTES, DEFAULT_JITTER_PERCENT, DEFAULT_REQUEUE_INTERVAL_SECS,
    FALLBACK_REQUEUE_SECS, MIN_REQUEUE_SECS, RUN_CREATION_JITTER_MINUTES,
    RUN_CREATION_MIN_BACKOFF_MINUTES,
};
use crate::controller::events::{reasons, EventKind, EventPublisher};
use crate::controller::store::{RepositoryStore, StoreError};
use crate::crd::{
    condition_reasons, condition_types, Condition, Repository, RepositorySpec, RepositoryStatus,
};
use crate::error::ErrorList;
use crate::github::{GithubError, ReleaseSource};
use crate::observability::metrics;
use crate::requeue::{jitter, DefaultRequeue, RequeuePolicy};
use crate::tekton::{PipelineRunner, TektonError};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("failed to load repository {namespace}/{name}: {source}")]
    Load {
        namespace: String,
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("repository '{0}' has no namespace")]
    MissingNamespace(String),
}

/// Per-cycle view of the resource being reconciled
pub(crate) struct Cycle<'a> {
    pub namespace: &'a str,
    pub spec: &'a RepositorySpec,
    pub reference: ObjectReference,
    /// Start of the previous check
    pub since: Option<DateTime<Utc>>,
}

/// Shared state of the controller, handed to every reconciliation
pub struct Reconciler {
    source: Arc<dyn ReleaseSource>,
    pipelines: Arc<dyn PipelineRunner>,
    store: Arc<dyn RepositoryStore>,
    events: Arc<dyn EventPublisher>,
    requeue: Arc<dyn RequeuePolicy>,
    clock: Arc<dyn Clock>,
    default_requeue_interval: Duration,
    jitter_percent: f64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("requeue", &self.requeue)
            .field("default_requeue_interval", &self.default_requeue_interval)
            .field("jitter_percent", &self.jitter_percent)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    #[must_use]
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        pipelines: Arc<dyn PipelineRunner>,
        store: Arc<dyn RepositoryStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            source,
            pipelines,
            store,
            events,
            requeue: Arc::new(DefaultRequeue),
            clock: Arc::new(SystemClock),
            default_requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECS),
            jitter_percent: DEFAULT_JITTER_PERCENT,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_requeue_policy(mut self, requeue: Arc<dyn RequeuePolicy>) -> Self {
        self.requeue = requeue;
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_interval(mut self, interval: Duration, jitter_percent: f64) -> Self {
        self.default_requeue_interval = interval;
        self.jitter_percent = jitter_percent;
        self
    }

    #[must_use]
    pub fn jitter_percent(&self) -> f64 {
        self.jitter_percent
    }

    /// Token cancelling in-flight GitHub requests on shutdown
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run one reconciliation cycle for `namespace/name`
    ///
    /// Returns the delay until the next cycle, or `None` when the resource is
    /// gone. The delay is never shorter than [`MIN_REQUEUE_SECS`].
    ///
    /// # Errors
    ///
    /// Returns an error only when the resource cannot be loaded.
    pub async fn reconcile_repository(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Duration>, ReconcilerError> {
        let Some(mut repository) =
            self.store
                .get(namespace, name)
                .await
                .map_err(|source| ReconcilerError::Load {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                    source,
                })?
        else {
            debug!(namespace, name, "Repository no longer exists");
            return Ok(None);
        };

        let reference = repository.object_ref(&());
        let mut status = repository.status.take().unwrap_or_default();
        let since = self.init_status(&mut status);

        let cycle = Cycle {
            namespace,
            spec: &repository.spec,
            reference,
            since,
        };
        let requeue_after = with_floor(self.run_cycle(&cycle, &mut status).await);
        metrics::set_requeue_after(&repository.spec.owner, &repository.spec.repo, requeue_after);
        info!(
            owner = %repository.spec.owner,
            repo = %repository.spec.repo,
            requeue_after = ?requeue_after,
            ready = status.ready,
            "Finished processing repository"
        );

        repository.status = Some(status);
        if let Err(err) = self.store.save_status(&repository).await {
            error!(namespace, name, error = %err, "Could not update status");
        }

        Ok(Some(requeue_after))
    }

    /// Reset the status for a new cycle, returning the previous check time
    fn init_status(&self, status: &mut RepositoryStatus) -> Option<DateTime<Utc>> {
        status.ready = false;
        status.conditions.clear();
        status.last_check.replace(self.clock.now())
    }

    async fn run_cycle(&self, cycle: &Cycle<'_>, status: &mut RepositoryStatus) -> Duration {
        let spec = cycle.spec;

        if let Err(errors) = self.check_pipelines(cycle, status).await {
            let requeue_after = jitter::percentage_additive(
                self.requeue.requeue(self.default_requeue_interval),
                self.jitter_percent,
            );
            error!(
                owner = %spec.owner,
                repo = %spec.repo,
                requeue_after = ?requeue_after,
                "Could not find desired pipeline, make sure to install it first: {errors}"
            );
            return requeue_after;
        }

        self.cleanup_runs(cycle, status).await;

        let releases = match self.fetch_releases(cycle, status).await {
            Ok(releases) => releases,
            Err(requeue_after) => return requeue_after,
        };
        let releases = self.filter_releases(cycle, status, releases).await;

        let fetch = self.fetch_artifacts(cycle, releases).await;
        let rate_limit_requeue = self.handle_artifact_errors(cycle, status, &fetch.errors).await;

        let missing = mark_missing_artifacts(spec, status, &fetch.artifacts);
        if missing.is_empty() {
            status.set_condition(Condition::new(
                self.clock.now(),
                condition_types::NO_RUNS_NEEDED,
                true,
                condition_reasons::NO_MISSING_RELEASES,
                "No PipelineRun needs to be scheduled",
            ));
            status.ready = true;
            info!(owner = %spec.owner, repo = %spec.repo, "No releases with missing artifacts available");
            return rate_limit_requeue.unwrap_or_else(|| self.default_requeue());
        }

        let summary = self.create_runs(cycle, status, &missing).await;

        if summary.created > 0 {
            let mut message = "Created PipelineRuns".to_string();
            if !summary.errors.is_empty() {
                message.push_str(", produced error(s)");
                warn!(owner = %spec.owner, repo = %spec.repo, "Errors while creating PipelineRuns: {}", summary.errors);
            }
            status.set_condition(Condition::new(
                self.clock.now(),
                condition_types::PIPELINE_RUNS_CREATED,
                true,
                condition_reasons::MISSING_RELEASES_FOUND,
                message,
            ));
            status.ready = true;
            return rate_limit_requeue.unwrap_or_else(|| self.default_requeue());
        }

        if summary.errors.is_empty() {
            status.set_condition(Condition::new(
                self.clock.now(),
                condition_types::PIPELINE_RUNS_PENDING,
                true,
                condition_reasons::RUNS_IN_FLIGHT,
                format!("{} PipelineRun(s) still in flight", summary.in_flight),
            ));
            return rate_limit_requeue.unwrap_or_else(|| self.default_requeue());
        }

        status.set_condition(Condition::new(
            self.clock.now(),
            condition_types::PIPELINE_RUNS_CREATION_FAILED,
            false,
            condition_reasons::UNKNOWN,
            "No PipelineRun(s) could be created",
        ));
        let backoff = jitter::fix_additive(
            self.requeue.requeue(jitter::exponential_backoff(
                summary.max_attempts,
                RUN_CREATION_MIN_BACKOFF_MINUTES,
            )),
            RUN_CREATION_JITTER_MINUTES,
        );
        let requeue_after = max_or_fallback(rate_limit_requeue.unwrap_or_default(), backoff);
        error!(
            owner = %spec.owner,
            repo = %spec.repo,
            requeue_after = ?requeue_after,
            "Errors while creating pipelines for releases: {}",
            summary.errors
        );
        requeue_after
    }

    /// Verify that every referenced Pipeline exists
    async fn check_pipelines(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
    ) -> Result<(), ErrorList<TektonError>> {
        let mut errors = ErrorList::new();
        for pipeline in cycle.spec.pipeline_names.values() {
            if let Err(err) = self.pipelines.get_pipeline(cycle.namespace, pipeline).await {
                errors.push(err);
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        let reason = if errors.iter().any(TektonError::is_not_found) {
            condition_reasons::PIPELINE_NOT_FOUND
        } else if errors.iter().any(TektonError::is_forbidden) {
            condition_reasons::FORBIDDEN
        } else {
            condition_reasons::UNKNOWN
        };
        status.set_condition(Condition::new(
            self.clock.now(),
            condition_types::TEKTON_PIPELINE_UNAVAILABLE,
            false,
            reason,
            "Requested Tekton Pipeline not available",
        ));
        Err(errors)
    }

    /// Report artifact lookup failures; returns the requeue forced by a rate limit
    async fn handle_artifact_errors(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
        errors: &ErrorList<GithubError>,
    ) -> Option<Duration> {
        if errors.is_empty() {
            return None;
        }

        status.set_condition(Condition::new(
            self.clock.now(),
            condition_types::FETCH_RELEASE_ARTIFACTS_FAILED,
            false,
            condition_reasons::API_ERRORS,
            "Fetching release artifacts from GitHub failed",
        ));

        if errors.iter().any(GithubError::is_unauthorized) {
            self.publish(
                cycle,
                EventKind::Warning,
                reasons::UNAUTHORIZED_REQUESTS,
                "Could not fetch data from GitHub Packages API".to_string(),
            )
            .await;
        }

        let rate_limit = errors.iter().find_map(GithubError::rate_limit);
        let requeue_after = rate_limit.map(|info| {
            jitter::fix_additive(
                self.requeue.requeue(info.until_reset(self.clock.now())),
                ARTIFACTS_RATE_LIMIT_JITTER_MINUTES,
            )
        });
        if requeue_after.is_some() {
            self.publish(
                cycle,
                EventKind::Warning,
                reasons::RATE_LIMIT_EXCEEDED,
                "Could not fetch artifacts from GitHub API".to_string(),
            )
            .await;
        }

        let other_errors = errors
            .iter()
            .any(|err| !err.is_unauthorized() && err.rate_limit().is_none());
        if other_errors {
            warn!(
                owner = %cycle.spec.owner,
                repo = %cycle.spec.repo,
                "Fetching artifact data produced error(s): {errors}"
            );
            self.publish(
                cycle,
                EventKind::Warning,
                reasons::FETCH_ARTIFACTS_ERROR,
                "Received non-fatal errors while fetching artifact data".to_string(),
            )
            .await;
        }

        requeue_after
    }

    /// Regular interval with distributed jitter
    fn default_requeue(&self) -> Duration {
        jitter::percentage_distributed(
            self.requeue.requeue(self.default_requeue_interval),
            self.jitter_percent,
        )
    }

    async fn publish(&self, cycle: &Cycle<'_>, kind: EventKind, reason: &str, note: String) {
        self.events
            .publish(&cycle.reference, kind, reason, note)
            .await;
    }
}

/// Raise `requeue_after` to the minimum delay
///
/// A reset time that already passed or an unlucky jitter draw can compute a
/// zero delay.
fn with_floor(requeue_after: Duration) -> Duration {
    requeue_after.max(Duration::from_secs(MIN_REQUEUE_SECS))
}

/// The larger of two delays, or the fallback when both are zero
fn max_or_fallback(a: Duration, b: Duration) -> Duration {
    if a.is_zero() && b.is_zero() {
        return Duration::from_secs(FALLBACK_REQUEUE_SECS);
    }
    a.max(b)
}

/// Entry point for the kube-runtime `Controller`
///
/// # Errors
///
/// Returns an error when the resource cannot be loaded.
pub async fn reconcile(
    repository: Arc<Repository>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let start = Instant::now();
    let name = repository.name_any();
    let namespace = repository
        .namespace()
        .ok_or_else(|| ReconcilerError::MissingNamespace(name.clone()))?;

    let span = tracing::info_span!(
        "reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
        resource.kind = "Repository",
        owner = %repository.spec.owner,
        repo = %repository.spec.repo,
    );

    metrics::increment_reconciliations();
    let result = ctx
        .reconcile_repository(&namespace, &name)
        .instrument(span)
        .await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    Ok(result?.map_or_else(Action::await_change, Action::requeue))
}
