//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `release_pipeline_reconciliations_total` - Total number of reconciliations
//! - `release_pipeline_reconciliation_errors_total` - Total number of reconciliation errors
//! - `release_pipeline_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `release_pipeline_requeue_after_seconds` - Requeue delay chosen for a repository
//! - `release_pipeline_github_last_check_timestamp_seconds` - Time of the last release check
//! - `release_pipeline_github_unseen_releases_total` - Releases returned before filtering
//! - `release_pipeline_github_filtered_releases_available_total` - Releases left after filtering
//! - `release_pipeline_github_requests_total` - GitHub API calls
//! - `release_pipeline_github_request_errors_total` - Failed GitHub API calls by endpoint
//! - `release_pipeline_tekton_pipelineruns_created_total` - PipelineRuns created per release
//! - `release_pipeline_tekton_pipelineruns_creation_errors_total` - Failed PipelineRun creations per release
//!
//! Repository scoped metrics carry the `owner` and `repo` labels, PipelineRun
//! metrics additionally carry the release tag as `ref`.

use anyhow::Result;
use prometheus::{GaugeVec, Histogram, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry};
use std::sync::LazyLock;
use std::time::Duration;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

const REPOSITORY_LABELS: &[&str] = &["owner", "repo"];
const RELEASE_LABELS: &[&str] = &["owner", "repo", "ref"];

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "release_pipeline_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "release_pipeline_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "release_pipeline_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static REQUEUE_AFTER: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "release_pipeline_requeue_after_seconds",
            "Seconds after which a repository gets requeued",
        ),
        REPOSITORY_LABELS,
    )
    .expect("Failed to create REQUEUE_AFTER metric - this should never happen")
});

static LAST_RELEASE_CHECK: LazyLock<GaugeVec> = LazyLock::new(|| {
    GaugeVec::new(
        Opts::new(
            "release_pipeline_github_last_check_timestamp_seconds",
            "Timestamp of the last release check",
        ),
        REPOSITORY_LABELS,
    )
    .expect("Failed to create LAST_RELEASE_CHECK metric - this should never happen")
});

static UNSEEN_RELEASES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "release_pipeline_github_unseen_releases_total",
            "The total amount of unseen releases for a repository",
        ),
        REPOSITORY_LABELS,
    )
    .expect("Failed to create UNSEEN_RELEASES metric - this should never happen")
});

static FILTERED_RELEASES: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    IntGaugeVec::new(
        Opts::new(
            "release_pipeline_github_filtered_releases_available_total",
            "The total amount of releases after filtering",
        ),
        REPOSITORY_LABELS,
    )
    .expect("Failed to create FILTERED_RELEASES metric - this should never happen")
});

static GITHUB_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "release_pipeline_github_requests_total",
            "The total amount of GitHub requests",
        ),
        REPOSITORY_LABELS,
    )
    .expect("Failed to create GITHUB_REQUESTS_TOTAL metric - this should never happen")
});

static GITHUB_REQUEST_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "release_pipeline_github_request_errors_total",
            "The total amount of failed GitHub requests",
        ),
        &["owner", "repo", "endpoint"],
    )
    .expect("Failed to create GITHUB_REQUEST_ERRORS_TOTAL metric - this should never happen")
});

static PIPELINE_RUNS_CREATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "release_pipeline_tekton_pipelineruns_created_total",
            "The total amount of pipeline runs created",
        ),
        RELEASE_LABELS,
    )
    .expect("Failed to create PIPELINE_RUNS_CREATED_TOTAL metric - this should never happen")
});

static PIPELINE_RUN_CREATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "release_pipeline_tekton_pipelineruns_creation_errors_total",
            "The total amount of errors while trying to create pipeline runs",
        ),
        RELEASE_LABELS,
    )
    .expect(
        "Failed to create PIPELINE_RUN_CREATION_ERRORS_TOTAL metric - this should never happen",
    )
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUE_AFTER.clone()))?;
    REGISTRY.register(Box::new(LAST_RELEASE_CHECK.clone()))?;
    REGISTRY.register(Box::new(UNSEEN_RELEASES.clone()))?;
    REGISTRY.register(Box::new(FILTERED_RELEASES.clone()))?;
    REGISTRY.register(Box::new(GITHUB_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GITHUB_REQUEST_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PIPELINE_RUNS_CREATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PIPELINE_RUN_CREATION_ERRORS_TOTAL.clone()))?;

    Ok(())
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> Result<String> {
    let encoder = prometheus::TextEncoder::new();
    Ok(encoder.encode_to_string(&REGISTRY.gather())?)
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn set_requeue_after(owner: &str, repo: &str, requeue_after: Duration) {
    REQUEUE_AFTER
        .with_label_values(&[owner, repo])
        .set(requeue_after.as_secs_f64());
}

pub fn set_last_release_check_to_now(owner: &str, repo: &str) {
    LAST_RELEASE_CHECK
        .with_label_values(&[owner, repo])
        .set(chrono::Utc::now().timestamp_millis() as f64 / 1000.0);
}

pub fn set_unseen_releases(owner: &str, repo: &str, count: usize) {
    UNSEEN_RELEASES
        .with_label_values(&[owner, repo])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn set_filtered_releases(owner: &str, repo: &str, count: usize) {
    FILTERED_RELEASES
        .with_label_values(&[owner, repo])
        .set(i64::try_from(count).unwrap_or(i64::MAX));
}

pub fn increment_github_requests(owner: &str, repo: &str) {
    GITHUB_REQUESTS_TOTAL.with_label_values(&[owner, repo]).inc();
}

pub fn increment_github_request_errors(owner: &str, repo: &str, endpoint: &str) {
    GITHUB_REQUEST_ERRORS_TOTAL
        .with_label_values(&[owner, repo, endpoint])
        .inc();
}

pub fn increment_pipeline_runs_created(owner: &str, repo: &str, tag: &str) {
    PIPELINE_RUNS_CREATED_TOTAL
        .with_label_values(&[owner, repo, tag])
        .inc();
}

pub fn increment_pipeline_run_creation_errors(owner: &str, repo: &str, tag: &str) {
    PIPELINE_RUN_CREATION_ERRORS_TOTAL
        .with_label_values(&[owner, repo, tag])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics() {
        // This should not panic - metrics should register successfully
        assert!(register_metrics().is_ok());
        let text = gather_text().unwrap();
        assert!(text.contains("release_pipeline_reconciliations_total"));
    }

    #[test]
    fn test_increment_reconciliations() {
        let before = RECONCILIATIONS_TOTAL.get();
        increment_reconciliations();
        let after = RECONCILIATIONS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_increment_reconciliation_errors() {
        let before = RECONCILIATION_ERRORS_TOTAL.get();
        increment_reconciliation_errors();
        let after = RECONCILIATION_ERRORS_TOTAL.get();
        assert_eq!(after, before + 1u64);
    }

    #[test]
    fn test_set_requeue_after() {
        set_requeue_after("metrics-test", "requeue", Duration::from_secs(90));
        assert!(
            (REQUEUE_AFTER
                .with_label_values(&["metrics-test", "requeue"])
                .get()
                - 90.0)
                .abs()
                < f64::EPSILON
        );
    }

    #[test]
    fn test_release_gauges() {
        set_unseen_releases("metrics-test", "gauges", 7);
        set_filtered_releases("metrics-test", "gauges", 3);
        assert_eq!(
            UNSEEN_RELEASES
                .with_label_values(&["metrics-test", "gauges"])
                .get(),
            7
        );
        assert_eq!(
            FILTERED_RELEASES
                .with_label_values(&["metrics-test", "gauges"])
                .get(),
            3
        );
    }

    #[test]
    fn test_pipeline_run_counters_are_labelled_by_ref() {
        let counter = PIPELINE_RUNS_CREATED_TOTAL.with_label_values(&["metrics-test", "runs", "v1.0.0"]);
        let before = counter.get();
        increment_pipeline_runs_created("metrics-test", "runs", "v1.0.0");
        assert_eq!(counter.get(), before + 1);
        assert_eq!(
            PIPELINE_RUNS_CREATED_TOTAL
                .with_label_values(&["metrics-test", "runs", "v2.0.0"])
                .get(),
            0
        );
    }

    #[test]
    fn test_github_request_errors_by_endpoint() {
        let counter =
            GITHUB_REQUEST_ERRORS_TOTAL.with_label_values(&["metrics-test", "errors", "assets"]);
        let before = counter.get();
        increment_github_request_errors("metrics-test", "errors", "assets");
        assert_eq!(counter.get(), before + 1);
    }
}
