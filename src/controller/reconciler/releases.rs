//! # Releases
//!
//! Fetches unseen releases and narrows them down with the version filter.

use super::{Cycle, Reconciler};
use crate::constants::RELEASES_RATE_LIMIT_JITTER_MINUTES;
use crate::controller::events::{reasons, EventKind};
use crate::crd::{condition_reasons, condition_types, Condition, RepositoryStatus};
use crate::error::ErrorList;
use crate::github::{GithubError, Release, ReleaseQuery};
use crate::observability::metrics;
use crate::requeue::jitter;
use crate::version_filter::{self, NoFilter, VersionFilter};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{error, info, warn};

impl Reconciler {
    /// Releases that still need attention
    ///
    /// With `memorizeReleases` the satisfied tags of the status are excluded.
    /// On failure the returned error carries the requeue delay.
    pub(super) async fn fetch_releases(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
    ) -> Result<Vec<Release>, Duration> {
        let spec = cycle.spec;
        let ignore_releases: BTreeSet<String> = if spec.memorize_releases {
            status
                .satisfied_tags(&spec.pipeline_names)
                .map(ToString::to_string)
                .collect()
        } else {
            BTreeSet::new()
        };

        let query = ReleaseQuery {
            owner: spec.owner.clone(),
            repo: spec.repo.clone(),
            since: cycle.since,
            ignore_releases,
        };

        metrics::set_last_release_check_to_now(&spec.owner, &spec.repo);
        let err = match self.source.get_releases(&query, &self.cancel).await {
            Ok(releases) => return Ok(releases),
            Err(err) => err,
        };

        error!(
            owner = %spec.owner,
            repo = %spec.repo,
            error = %err,
            "Could not fetch release info from GitHub"
        );

        let requeue_after = if let GithubError::RateLimited(info) = &err {
            status.set_condition(Condition::new(
                self.clock.now(),
                condition_types::FETCH_RELEASE_INFORMATION_FAILED,
                false,
                condition_reasons::RATE_LIMIT_EXCEEDED,
                "Fetching release information from GitHub failed",
            ));
            self.publish(
                cycle,
                EventKind::Warning,
                reasons::RATE_LIMIT_EXCEEDED,
                "Could not fetch missing releases".to_string(),
            )
            .await;
            jitter::fix_additive(
                self.requeue
                    .requeue(info.until_reset(self.clock.now())),
                RELEASES_RATE_LIMIT_JITTER_MINUTES,
            )
        } else {
            status.set_condition(Condition::new(
                self.clock.now(),
                condition_types::FETCH_RELEASE_INFORMATION_FAILED,
                false,
                condition_reasons::UNKNOWN,
                "Fetching release information from GitHub failed",
            ));
            self.publish(
                cycle,
                EventKind::Warning,
                reasons::FETCHING_RELEASES_FAILED,
                "Could not fetch missing releases".to_string(),
            )
            .await;
            self.default_requeue()
        };

        Err(requeue_after)
    }

    /// Apply the version filter and the deny-list
    ///
    /// A filter that cannot be built is replaced by [`NoFilter`], which lets no
    /// release through, and flagged with the `VersionFilterInvalid` condition.
    pub(super) async fn filter_releases(
        &self,
        cycle: &Cycle<'_>,
        status: &mut RepositoryStatus,
        releases: Vec<Release>,
    ) -> Vec<Release> {
        let spec = cycle.spec;
        let unseen = releases.len();

        let filter: Option<Box<dyn VersionFilter>> = match &spec.version_filter {
            None => None,
            Some(filter_spec) => match version_filter::from_spec(filter_spec) {
                Ok(filter) => Some(filter),
                Err(err) => {
                    error!(
                        owner = %spec.owner,
                        repo = %spec.repo,
                        error = %err,
                        "Invalid version filter, no release will be built"
                    );
                    status.set_condition(Condition::new(
                        self.clock.now(),
                        condition_types::VERSION_FILTER_INVALID,
                        false,
                        condition_reasons::INVALID_FILTER,
                        err.to_string(),
                    ));
                    self.publish(
                        cycle,
                        EventKind::Warning,
                        reasons::INVALID_VERSION_FILTER,
                        format!("Version filter is invalid: {err}"),
                    )
                    .await;
                    Some(Box::new(NoFilter) as Box<dyn VersionFilter>)
                }
            },
        };

        let filtered = version_filter::apply(
            filter.as_deref(),
            &spec.omit_versions,
            releases,
            |release| release.tag_name.as_str(),
        );

        if !filtered.errors.is_empty() {
            let errors = ErrorList::from(filtered.errors);
            warn!(
                owner = %spec.owner,
                repo = %spec.repo,
                "Filtering releases produced errors: {errors}"
            );
        }

        let kept = filtered.kept.len();
        metrics::set_unseen_releases(&spec.owner, &spec.repo, unseen);
        metrics::set_filtered_releases(&spec.owner, &spec.repo, kept);

        if kept != unseen {
            info!(
                owner = %spec.owner,
                repo = %spec.repo,
                filtered = unseen - kept,
                "Filtered releases"
            );
            self.publish(
                cycle,
                EventKind::Normal,
                reasons::RELEASES_FILTERED,
                format!(
                    "Got {unseen} releases, {} releases do not match the release filter",
                    unseen - kept
                ),
            )
            .await;
        }

        info!(
            owner = %spec.owner,
            repo = %spec.repo,
            unseen,
            filtered = kept,
            "Found unseen release(s)"
        );
        filtered.kept
    }
}
