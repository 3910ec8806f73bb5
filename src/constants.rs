//! # Constants
//!
//! Shared constants used throughout the controller.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for metrics and health checks
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default requeue interval between two release checks of a repository (seconds)
pub const DEFAULT_REQUEUE_INTERVAL_SECS: u64 = 3600;

/// Default jitter applied to the requeue interval (percent)
pub const DEFAULT_JITTER_PERCENT: f64 = 20.0;

/// Default requeue interval for reconciliation errors (seconds)
pub const DEFAULT_RECONCILIATION_ERROR_REQUEUE_SECS: u64 = 60;

/// Default GitHub REST API base URL
pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Default timeout for a single GitHub HTTP request (seconds)
pub const DEFAULT_GITHUB_TIMEOUT_SECS: u64 = 5;

/// Page size used for all paginated GitHub requests
pub const GITHUB_PAGE_SIZE: u32 = 100;

/// Maximum number of releases whose artifacts are fetched concurrently
pub const MAX_CONCURRENT_ARTIFACT_FETCHES: usize = 3;

/// Run records older than this are dropped from the status (days)
pub const PIPELINE_RUN_EXPIRY_DAYS: i64 = 14;

/// A started, unfinished PipelineRun younger than this is considered in flight (minutes)
pub const PIPELINE_RUN_IN_FLIGHT_MINUTES: i64 = 60;

/// Lower bound for the exponential backoff after failed PipelineRun creation (minutes)
pub const RUN_CREATION_MIN_BACKOFF_MINUTES: u64 = 5;

/// Maximum fixed jitter added after failed PipelineRun creation (minutes)
pub const RUN_CREATION_JITTER_MINUTES: u64 = 120;

/// Maximum fixed jitter added when the releases fetch hit the rate limit (minutes)
pub const RELEASES_RATE_LIMIT_JITTER_MINUTES: u64 = 10;

/// Maximum fixed jitter added when an artifact fetch hit the rate limit (minutes)
pub const ARTIFACTS_RATE_LIMIT_JITTER_MINUTES: u64 = 60;

/// Requeue used when neither a backoff nor a rate limit reset is known (seconds)
pub const FALLBACK_REQUEUE_SECS: u64 = 3600;

/// Lower bound of every computed requeue delay (seconds)
pub const MIN_REQUEUE_SECS: u64 = 60;

/// Field manager used for server-side apply of the status subresource
pub const FIELD_MANAGER: &str = "release-pipeline-controller";

/// Reporter name used for Kubernetes events
pub const EVENT_REPORTER: &str = "repository-controller";
