//! # GitHub
//!
//! Release and artifact lookups against the GitHub REST API.
//!
//! The reconciler only depends on the [`ReleaseSource`] trait; [`GithubClient`]
//! is the HTTP implementation used in production.

mod client;
mod error;
mod model;

pub use client::{GithubClient, GithubClientConfig};
pub use error::GithubError;
pub use model::{
    ArtifactQuery, ContainerMetadata, Package, PackageMetadata, RateLimitInfo, Release,
    ReleaseAsset, ReleaseQuery,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Source of releases and their published artifacts
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// All releases of a repository, minus the tags in `query.ignore_releases`
    ///
    /// A repository without any release yields [`GithubError::NoReleases`].
    async fn get_releases(
        &self,
        query: &ReleaseQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Release>, GithubError>;

    /// Files attached to a release
    async fn get_assets(
        &self,
        query: &ArtifactQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReleaseAsset>, GithubError>;

    /// Container package versions tagged with the release tag
    async fn get_packages(
        &self,
        query: &ArtifactQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>, GithubError>;
}
