//! GitHub REST client
//!
//! Uses reqwest for HTTP requests. One client instance is shared by all
//! reconciliations, so quota exhaustion seen by one repository immediately
//! pauses the calls of every other repository until the quota resets.

use crate::clock::{Clock, SystemClock};
use crate::constants::{DEFAULT_GITHUB_API_URL, DEFAULT_GITHUB_TIMEOUT_SECS, GITHUB_PAGE_SIZE};
use crate::github::{
    ArtifactQuery, GithubError, Package, RateLimitInfo, Release, ReleaseAsset, ReleaseQuery,
    ReleaseSource,
};
use crate::observability::metrics;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, ACCEPT, LINK};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const RELEASES_ENDPOINT: &str = "releases";
const ASSETS_ENDPOINT: &str = "assets";
const PACKAGES_ENDPOINT: &str = "packages";

/// Settings for [`GithubClient`]
#[derive(Clone)]
pub struct GithubClientConfig {
    /// API base URL without trailing slash
    pub base_url: String,
    /// Bearer token, anonymous requests when unset
    pub token: Option<String>,
    /// Timeout of a single HTTP request
    pub timeout: Duration,
}

impl std::fmt::Debug for GithubClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClientConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl Default for GithubClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GITHUB_API_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_GITHUB_TIMEOUT_SECS),
        }
    }
}

/// GitHub release client with shared rate limit state
pub struct GithubClient {
    http_client: Client,
    base_url: String,
    token: Option<String>,
    clock: Arc<dyn Clock>,
    /// Set when the quota ran out, cleared implicitly once `reset` has passed
    rate_limited_until: RwLock<Option<RateLimitInfo>>,
    /// Set once the packages API answered 401; further package calls are skipped
    packages_unauthorized: AtomicBool,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .field(
                "packages_unauthorized",
                &self.packages_unauthorized.load(Ordering::Relaxed),
            )
            .finish_non_exhaustive()
    }
}

impl GithubClient {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: GithubClientConfig) -> Result<Self, reqwest::Error> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_clock(
        config: GithubClientConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, reqwest::Error> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.filter(|token| !token.is_empty()),
            clock,
            rate_limited_until: RwLock::new(None),
            packages_unauthorized: AtomicBool::new(false),
        })
    }

    /// Remembered quota exhaustion, if its reset lies in the future
    fn check_rate_limit(&self) -> Result<(), GithubError> {
        let guard = self
            .rate_limited_until
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match guard.as_ref() {
            Some(info) if self.clock.now() < info.reset => {
                Err(GithubError::RateLimited(info.clone()))
            }
            _ => Ok(()),
        }
    }

    fn remember_rate_limit(&self, info: &RateLimitInfo) {
        let mut guard = self
            .rate_limited_until
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *guard = Some(info.clone());
    }

    /// Map a non-success response onto the error taxonomy, recording quota exhaustion
    fn evaluate_error(&self, status: StatusCode, headers: &HeaderMap, url: &str) -> GithubError {
        match status {
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                match RateLimitInfo::from_headers(headers) {
                    Some(info) if info.is_exhausted() => {
                        warn!(
                            limit = info.limit,
                            reset = %info.reset,
                            "GitHub rate limit exhausted"
                        );
                        self.remember_rate_limit(&info);
                        GithubError::RateLimited(info)
                    }
                    _ => GithubError::Status {
                        status: status.as_u16(),
                        url: url.to_string(),
                    },
                }
            }
            StatusCode::UNAUTHORIZED => GithubError::Unauthorized,
            _ => GithubError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            },
        }
    }

    /// Fetch a single page; returns the items and whether a next page exists
    async fn get_page<T: DeserializeOwned>(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<(Vec<T>, bool), GithubError> {
        self.check_rate_limit()?;

        let mut request = self
            .http_client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .query(&[("per_page", GITHUB_PAGE_SIZE), ("page", page)]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        metrics::increment_github_requests(owner, repo);
        debug!(url, page, "GitHub request");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GithubError::Cancelled),
            response = request.send() => response.map_err(|source| GithubError::Request {
                url: url.to_string(),
                source,
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(self.evaluate_error(status, response.headers(), url));
        }

        let has_next_page = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|link| link.contains("rel=\"next\""));

        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(GithubError::Cancelled),
            body = response.bytes() => body.map_err(|source| GithubError::Request {
                url: url.to_string(),
                source,
            })?,
        };

        let items = serde_json::from_slice(&body).map_err(|source| GithubError::Decode {
            url: url.to_string(),
            source,
        })?;

        Ok((items, has_next_page))
    }

    /// Follow `Link: rel="next"` until the last page; any failure discards everything
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        owner: &str,
        repo: &str,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<T>, GithubError> {
        let mut items = Vec::new();
        let mut page = 1;
        loop {
            if cancel.is_cancelled() {
                return Err(GithubError::Cancelled);
            }
            let (mut batch, has_next_page) = self.get_page(owner, repo, url, page, cancel).await?;
            items.append(&mut batch);
            if !has_next_page {
                return Ok(items);
            }
            page += 1;
        }
    }
}

#[async_trait]
impl ReleaseSource for GithubClient {
    async fn get_releases(
        &self,
        query: &ReleaseQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Release>, GithubError> {
        let url = format!("{}/repos/{}/{}/releases", self.base_url, query.owner, query.repo);
        debug!(owner = %query.owner, repo = %query.repo, since = ?query.since, "Fetching releases");

        let releases: Vec<Release> = self
            .get_paginated(&query.owner, &query.repo, &url, cancel)
            .await
            .and_then(|releases| {
                if releases.is_empty() {
                    Err(GithubError::NoReleases {
                        owner: query.owner.clone(),
                        repo: query.repo.clone(),
                    })
                } else {
                    Ok(releases)
                }
            })
            .inspect_err(|_| {
                metrics::increment_github_request_errors(
                    &query.owner,
                    &query.repo,
                    RELEASES_ENDPOINT,
                );
            })?;

        Ok(releases
            .into_iter()
            .filter(|release| !query.ignore_releases.contains(&release.tag_name))
            .collect())
    }

    async fn get_assets(
        &self,
        query: &ArtifactQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<ReleaseAsset>, GithubError> {
        let url = format!(
            "{}/repos/{}/{}/releases/{}/assets",
            self.base_url, query.owner, query.repo, query.release.id
        );

        // A single page is enough to tell whether any asset exists
        self.get_page(&query.owner, &query.repo, &url, 1, cancel)
            .await
            .map(|(assets, _)| assets)
            .inspect_err(|_| {
                metrics::increment_github_request_errors(
                    &query.owner,
                    &query.repo,
                    ASSETS_ENDPOINT,
                );
            })
    }

    async fn get_packages(
        &self,
        query: &ArtifactQuery,
        cancel: &CancellationToken,
    ) -> Result<Vec<Package>, GithubError> {
        if self.packages_unauthorized.load(Ordering::Acquire) {
            return Err(GithubError::Unauthorized);
        }

        let url = format!(
            "{}/users/{}/packages/container/{}/versions",
            self.base_url, query.owner, query.repo
        );

        let packages: Vec<Package> = self
            .get_paginated(&query.owner, &query.repo, &url, cancel)
            .await
            .inspect_err(|err| {
                metrics::increment_github_request_errors(
                    &query.owner,
                    &query.repo,
                    PACKAGES_ENDPOINT,
                );
                if err.is_unauthorized() {
                    warn!(
                        owner = %query.owner,
                        "Packages API denied access, skipping package lookups from now on"
                    );
                    self.packages_unauthorized.store(true, Ordering::Release);
                }
            })?;

        Ok(packages
            .into_iter()
            .filter(|package| package.has_tag(&query.release.tag_name))
            .collect())
    }
}
