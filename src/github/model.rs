//! GitHub REST API payloads and query types.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A GitHub release as returned by `GET /repos/{owner}/{repo}/releases`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub has_assets: Option<bool>,
}

/// A file attached to a release
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub download_count: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub browser_download_url: Option<String>,
}

/// A version of a container package
///
/// The tag is read from the flat `tag` field or from `metadata.container.tags`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Package {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub metadata: Option<PackageMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct PackageMetadata {
    #[serde(default)]
    pub container: Option<ContainerMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct ContainerMetadata {
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Package {
    /// Whether this package version is published under `tag`
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        if self.tag.as_deref() == Some(tag) {
            return true;
        }
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.container.as_ref())
            .is_some_and(|container| container.tags.iter().any(|t| t == tag))
    }
}

/// Snapshot of the `X-RateLimit-*` response headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u64,
    pub remaining: i64,
    pub reset: DateTime<Utc>,
}

impl RateLimitInfo {
    pub const LIMIT_HEADER: &'static str = "x-ratelimit-limit";
    pub const REMAINING_HEADER: &'static str = "x-ratelimit-remaining";
    pub const RESET_HEADER: &'static str = "x-ratelimit-reset";

    /// Parse the rate limit headers; `None` when any of them is missing or malformed
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        fn header<T: std::str::FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }

        let limit = header::<u64>(headers, Self::LIMIT_HEADER)?;
        let remaining = header::<i64>(headers, Self::REMAINING_HEADER)?;
        let reset_unix = header::<i64>(headers, Self::RESET_HEADER)?;
        let reset = Utc.timestamp_opt(reset_unix, 0).single()?;

        Some(Self {
            limit,
            remaining,
            reset,
        })
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }

    /// Time left until the quota resets, zero once the reset has passed
    #[must_use]
    pub fn until_reset(&self, now: DateTime<Utc>) -> std::time::Duration {
        (self.reset - now).to_std().unwrap_or_default()
    }
}

/// Parameters of a releases fetch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseQuery {
    pub owner: String,
    pub repo: String,
    /// Start of the previous check
    pub since: Option<DateTime<Utc>>,
    /// Tags dropped from the result
    pub ignore_releases: BTreeSet<String>,
}

/// Parameters of an artifact fetch for a single release
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactQuery {
    pub owner: String,
    pub repo: String,
    pub release: Release,
}
