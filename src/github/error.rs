use crate::github::RateLimitInfo;
use thiserror::Error;

/// Errors returned by the GitHub release client
#[derive(Debug, Error)]
pub enum GithubError {
    #[error(
        "rate limit exceeded. limit: {}, remaining: {}, reset at: {}",
        .0.limit, .0.remaining, .0.reset
    )]
    RateLimited(RateLimitInfo),

    #[error("unauthorized. either token is invalid, expired or missing the correct scope")]
    Unauthorized,

    #[error("got status code {status} from {url}")]
    Status { status: u16, url: String },

    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to parse response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no releases found for {owner}/{repo}")]
    NoReleases { owner: String, repo: String },

    #[error("request cancelled")]
    Cancelled,
}

impl GithubError {
    /// Rate limit snapshot when this is a quota error
    #[must_use]
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        match self {
            GithubError::RateLimited(info) => Some(info),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, GithubError::Unauthorized)
    }
}
