//! # Artifacts
//!
//! Fetches the published artifacts of releases and decides which artifact
//! types are still missing.

use super::{Cycle, Reconciler};
use crate::constants::MAX_CONCURRENT_ARTIFACT_FETCHES;
use crate::controller::task_group::FailFast;
use crate::crd::{ArtifactType, RepositorySpec, RepositoryStatus};
use crate::error::ErrorList;
use crate::github::{ArtifactQuery, GithubError, Package, Release, ReleaseAsset};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

/// A release together with the artifacts found for it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseArtifacts {
    pub release: Release,
    pub assets: Vec<ReleaseAsset>,
    pub packages: Vec<Package>,
}

/// Outcome of fetching artifacts for many releases
#[derive(Debug, Default)]
pub struct ArtifactFetch {
    /// Releases whose lookups all succeeded
    pub artifacts: Vec<ReleaseArtifacts>,
    pub errors: ErrorList<GithubError>,
}

/// Whether `artifacts` contains a published artifact of `artifact_type`
#[must_use]
pub fn has_valid_artifacts(artifacts: &ReleaseArtifacts, artifact_type: ArtifactType) -> bool {
    match artifact_type {
        ArtifactType::Assets => !artifacts.assets.is_empty(),
        ArtifactType::Container => !artifacts.packages.is_empty(),
    }
}

/// Update `missingArtifacts` for every fetched release
///
/// Types without a configured pipeline are removed instead of evaluated.
/// Returns the tags that still miss at least one artifact type.
pub fn mark_missing_artifacts(
    spec: &RepositorySpec,
    status: &mut RepositoryStatus,
    artifacts: &[ReleaseArtifacts],
) -> Vec<String> {
    let mut missing = Vec::new();

    for fetched in artifacts {
        let tag = &fetched.release.tag_name;
        let release = status.releases.entry(tag.clone()).or_default();

        for artifact_type in ArtifactType::ALL {
            if spec.is_configured(artifact_type) {
                release
                    .missing_artifacts
                    .insert(artifact_type, !has_valid_artifacts(fetched, artifact_type));
            } else {
                release.missing_artifacts.remove(&artifact_type);
            }
        }

        if ArtifactType::ALL.iter().any(|t| release.is_missing(*t)) {
            missing.push(tag.clone());
        }
    }

    missing
}

impl Reconciler {
    /// Look up artifacts for `releases`, a bounded number of releases at a time
    ///
    /// A release with a failed lookup is dropped from the result and its error
    /// is collected.
    pub(super) async fn fetch_artifacts(
        &self,
        cycle: &Cycle<'_>,
        releases: Vec<Release>,
    ) -> ArtifactFetch {
        let results: Vec<Result<ReleaseArtifacts, GithubError>> = stream::iter(releases)
            .map(|release| self.fetch_release_artifacts(cycle.spec, release))
            .buffer_unordered(MAX_CONCURRENT_ARTIFACT_FETCHES)
            .collect()
            .await;

        let mut fetch = ArtifactFetch::default();
        for result in results {
            match result {
                Ok(artifacts) => fetch.artifacts.push(artifacts),
                Err(err) => {
                    warn!(
                        owner = %cycle.spec.owner,
                        repo = %cycle.spec.repo,
                        error = %err,
                        "Could not fetch artifacts for release"
                    );
                    fetch.errors.push(err);
                }
            }
        }
        fetch
    }

    /// Assets and packages of one release, fetched concurrently
    ///
    /// Only the lookups for configured artifact types run. The first failure
    /// cancels the other lookup and discards the release.
    async fn fetch_release_artifacts(
        &self,
        spec: &RepositorySpec,
        release: Release,
    ) -> Result<ReleaseArtifacts, GithubError> {
        let query = ArtifactQuery {
            owner: spec.owner.clone(),
            repo: spec.repo.clone(),
            release,
        };

        let group = FailFast::new(&self.cancel);
        let fetch_assets = async {
            if !spec.is_configured(ArtifactType::Assets) {
                return Some(Vec::new());
            }
            group
                .run(self.source.get_assets(&query, group.token()))
                .await
        };
        let fetch_packages = async {
            if !spec.is_configured(ArtifactType::Container) {
                return Some(Vec::new());
            }
            group
                .run(self.source.get_packages(&query, group.token()))
                .await
        };

        let (assets, packages) = futures::join!(fetch_assets, fetch_packages);
        group.finish()?;

        debug!(release = %query.release.tag_name, "Fetched release artifacts");
        Ok(ReleaseArtifacts {
            release: query.release,
            assets: assets.unwrap_or_default(),
            packages: packages.unwrap_or_default(),
        })
    }
}
