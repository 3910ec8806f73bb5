//! # Pipeline Runs
//!
//! Schedules PipelineRuns for releases with missing artifacts and keeps the
//! run records in the status tidy.
//!
//! A (release, artifact type) pair gets a new run unless its previous run is
//! still in flight. A previous run counts as in flight when it started less
//! than an hour ago and has not completed, or when it has not started yet and
//! was recorded less than an hour ago.

use super::{Cycle, Reconciler};
use crate::constants::{PIPELINE_RUN_EXPIRY_DAYS, PIPELINE_RUN_IN_FLIGHT_MINUTES};
use crate::controller::events::{reasons, EventKind};
use crate::crd::{ArtifactType, RepositoryStatus};
use crate::error::ErrorList;
use crate::observability::metrics;
use crate::tekton::{PipelineRunRequest, TektonError};
use chrono::TimeDelta;
use tracing::{debug, info, warn};

/// What happened to a single (release, artifact type) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Created,
    InFlight,
    NotConfigured,
}

/// Aggregated result of scheduling runs for several releases
#[derive(Debug, Default)]
pub struct RunSummary {
    pub created: u32,
    pub in_flight: u32,
    /// Highest `runsCreated` among the pairs that were attempted
    pub max_attempts: u32,
    pub errors: ErrorList<TektonError>,
}

impl Reconciler {
    /// Drop run records whose PipelineRun is gone or expired
    pub(super) async fn cleanup_runs(&self, cycle: &Cycle<'_>, status: &mut RepositoryStatus) {
        let expiry = self.clock.now() - TimeDelta::days(PIPELINE_RUN_EXPIRY_DAYS);
        let mut stale = Vec::new();

        for (tag, release) in &status.releases {
            for (artifact_type, record) in release.pipeline_runs.iter().flatten() {
                match self
                    .pipelines
                    .get_pipeline_run(cycle.namespace, &record.name)
                    .await
                {
                    Ok(run) if run.created_at.is_some_and(|created| created < expiry) => {
                        stale.push((tag.clone(), *artifact_type));
                    }
                    Ok(_) => {}
                    Err(err) if err.is_not_found() => stale.push((tag.clone(), *artifact_type)),
                    Err(err) => {
                        debug!(pipeline_run = %record.name, error = %err, "Could not get PipelineRun");
                    }
                }
            }
        }

        for (tag, artifact_type) in stale {
            if let Some(release) = status.releases.get_mut(&tag) {
                if let Some(removed) = release.remove_run(artifact_type) {
                    debug!(release = %tag, pipeline_run = %removed.name, "Removed outdated PipelineRun record");
                }
            }
        }
    }

    /// Schedule runs for every release in `tags`
    pub(super) async fn create_runs(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
        tags: &[String],
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for tag in tags {
            let release = self.create_runs_for_release(cycle, status, tag).await;
            summary.created += release.created;
            summary.in_flight += release.in_flight;
            summary.errors.extend(release.errors);
        }

        summary.max_attempts = tags
            .iter()
            .filter_map(|tag| status.releases.get(tag))
            .flat_map(|release| release.pipeline_runs.iter().flatten())
            .map(|(_, record)| record.runs_created)
            .max()
            .unwrap_or(0);

        summary
    }

    /// Create runs for the missing artifact types of one release
    ///
    /// A failure for one artifact type does not stop the others.
    async fn create_runs_for_release(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
        tag: &str,
    ) -> RunSummary {
        let mut summary = RunSummary::default();

        for artifact_type in ArtifactType::ALL {
            let missing = status
                .releases
                .get(tag)
                .is_some_and(|release| release.is_missing(artifact_type));
            if !missing {
                continue;
            }

            match self.create_run(cycle, status, tag, artifact_type).await {
                Ok(RunOutcome::Created) => summary.created += 1,
                Ok(RunOutcome::InFlight) => summary.in_flight += 1,
                Ok(RunOutcome::NotConfigured) => {}
                Err(err) => {
                    warn!(release = %tag, artifact_type = %artifact_type, error = %err, "Could not create PipelineRun");
                    summary.errors.push(err);
                }
            }
        }

        summary
    }

    async fn create_run(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
        tag: &str,
        artifact_type: ArtifactType,
    ) -> Result<RunOutcome, TektonError> {
        let spec = cycle.spec;
        let Some(request) = PipelineRunRequest::build(spec, cycle.namespace, tag, artifact_type)
        else {
            return Ok(RunOutcome::NotConfigured);
        };

        let now = self.clock.now();
        let in_flight_window = TimeDelta::minutes(PIPELINE_RUN_IN_FLIGHT_MINUTES);
        let previous = status
            .releases
            .get(tag)
            .and_then(|release| release.run(artifact_type))
            .cloned();

        if let Some(record) = previous {
            match self
                .pipelines
                .get_pipeline_run(cycle.namespace, &record.name)
                .await
            {
                Ok(run) => {
                    let started_recently = run
                        .start_time
                        .is_some_and(|started| now - started < in_flight_window);
                    let pending = !run.has_started() && now - record.timestamp < in_flight_window;

                    if (started_recently && !run.has_completed()) || pending {
                        info!(release = %tag, pipeline_run = %record.name, "Found previous PipelineRun that is not completed, yet");
                        return Ok(RunOutcome::InFlight);
                    }
                    if run.has_completed() {
                        info!(
                            release = %tag,
                            pipeline_run = %record.name,
                            success = run.succeeded.unwrap_or(false),
                            "Previous PipelineRun completed without producing artifacts, starting a new one"
                        );
                    }
                }
                Err(err) => {
                    info!(pipeline_run = %record.name, error = %err, "Could not get PipelineRun");
                }
            }
        }

        info!(release = %tag, artifact_type = %artifact_type, "Creating a PipelineRun for release");
        let run = self
            .pipelines
            .create_pipeline_run(&request)
            .await
            .inspect_err(|_| {
                metrics::increment_pipeline_run_creation_errors(&spec.owner, &spec.repo, tag);
            })?;

        metrics::increment_pipeline_runs_created(&spec.owner, &spec.repo, tag);
        let release = status.releases.entry(tag.to_string()).or_default();
        release.record_run(artifact_type, run.name.clone(), run.created_at.unwrap_or(now));
        let runs_created = release.run(artifact_type).map_or(1, |record| record.runs_created);

        self.publish(
            cycle,
            EventKind::Normal,
            reasons::PIPELINE_RUN_SCHEDULED,
            format!(
                "Scheduled PipelineRun {} (#{runs_created}) for tag {tag}",
                run.name
            ),
        )
        .await;

        Ok(RunOutcome::Created)
    }
}
