//! Reconciliation cycles against in-memory GitHub, Tekton and status fakes

mod common;

use chrono::TimeDelta;
use common::{now, release, Failure, Harness, CONTAINER_PIPELINE};
use kube::runtime::controller::Action;
use release_pipeline_controller::constants::MIN_REQUEUE_SECS;
use release_pipeline_controller::controller::events::{reasons, EventKind};
use release_pipeline_controller::controller::reconciler::reconcile;
use release_pipeline_controller::crd::{
    condition_reasons, condition_types, ArtifactType, PipelineRunRecord, ReleaseStatus,
    VersionFilterSpec,
};
use release_pipeline_controller::github::ReleaseAsset;
use release_pipeline_controller::tekton::PipelineRunState;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

fn container_harness(tags: &[&str]) -> Harness {
    let releases = tags
        .iter()
        .enumerate()
        .map(|(id, tag)| release(id as u64 + 1, tag))
        .collect();
    Harness::new(common::spec(&[ArtifactType::Container]), releases)
}

fn record(name: &str, runs_created: u32) -> PipelineRunRecord {
    PipelineRunRecord {
        name: name.to_string(),
        timestamp: now() - TimeDelta::days(1),
        runs_created,
    }
}

fn tracked_release(name: &str, runs_created: u32) -> ReleaseStatus {
    ReleaseStatus {
        missing_artifacts: BTreeMap::from([(ArtifactType::Container, true)]),
        pipeline_runs: Some(BTreeMap::from([(
            ArtifactType::Container,
            record(name, runs_created),
        )])),
    }
}

#[tokio::test]
async fn test_missing_pipeline_stops_the_cycle() {
    let harness = container_harness(&["v1.0.0"]);
    harness.pipelines.pipelines.lock().unwrap().clear();

    let requeue_after = harness.reconcile().await;

    assert_eq!(requeue_after, HOUR);
    let status = harness.store.status();
    assert!(!status.ready);
    assert_eq!(status.last_check, Some(now()));
    let condition = status
        .condition(condition_types::TEKTON_PIPELINE_UNAVAILABLE)
        .expect("pipeline condition");
    assert!(!condition.is_true());
    assert_eq!(
        condition.reason.as_deref(),
        Some(condition_reasons::PIPELINE_NOT_FOUND)
    );
    assert!(harness.source.last_query().is_none());
    assert_eq!(harness.pipelines.created_count(), 0);
}

#[tokio::test]
async fn test_forbidden_pipeline_lookup() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.pipelines.forbidden.lock().unwrap() = true;

    harness.reconcile().await;

    let status = harness.store.status();
    let condition = status
        .condition(condition_types::TEKTON_PIPELINE_UNAVAILABLE)
        .unwrap();
    assert_eq!(condition.reason.as_deref(), Some(condition_reasons::FORBIDDEN));
}

#[tokio::test]
async fn test_no_runs_needed_when_artifacts_exist() {
    let harness = container_harness(&["v1.0.0"]);
    harness.source.publish_package("v1.0.0");

    let requeue_after = harness.reconcile().await;

    assert_eq!(requeue_after, HOUR);
    let status = harness.store.status();
    assert!(status.ready);
    assert!(status.condition(condition_types::NO_RUNS_NEEDED).unwrap().is_true());
    assert_eq!(
        status.releases["v1.0.0"].missing_artifacts,
        BTreeMap::from([(ArtifactType::Container, false)])
    );
    assert_eq!(harness.pipelines.created_count(), 0);
}

#[tokio::test]
async fn test_satisfied_releases_are_not_fetched_again() {
    let harness = container_harness(&["v1.0.0", "v1.1.0"]);
    harness.source.publish_package("v1.0.0");

    harness.reconcile().await;
    harness.reconcile().await;

    let query = harness.source.last_query().unwrap();
    assert!(query.ignore_releases.contains("v1.0.0"));
    assert!(!query.ignore_releases.contains("v1.1.0"));
    assert_eq!(query.since, Some(now()));
}

#[tokio::test]
async fn test_releases_are_refetched_without_memorizing() {
    let harness = container_harness(&["v1.0.0"]);
    harness.store.update_spec(|spec| spec.memorize_releases = false);
    harness.source.publish_package("v1.0.0");

    harness.reconcile().await;
    harness.reconcile().await;

    assert!(harness.source.last_query().unwrap().ignore_releases.is_empty());
}

#[tokio::test]
async fn test_creates_run_for_missing_artifact() {
    let harness = container_harness(&["v1.0.0"]);

    let requeue_after = harness.reconcile().await;

    assert_eq!(requeue_after, HOUR);
    assert_eq!(harness.pipelines.created_count(), 1);
    let request = harness.pipelines.created.lock().unwrap()[0].clone();
    assert_eq!(request.pipeline_name, CONTAINER_PIPELINE);
    assert_eq!(request.namespace, common::NAMESPACE);

    let status = harness.store.status();
    assert!(status.ready);
    let condition = status.condition(condition_types::PIPELINE_RUNS_CREATED).unwrap();
    assert_eq!(condition.message.as_deref(), Some("Created PipelineRuns"));

    let run = status.releases["v1.0.0"].run(ArtifactType::Container).unwrap();
    assert_eq!(run.runs_created, 1);
    assert_eq!(run.timestamp, now());

    let events = harness.events.events.lock().unwrap().clone();
    let scheduled = events
        .iter()
        .find(|event| event.reason == reasons::PIPELINE_RUN_SCHEDULED)
        .expect("scheduled event");
    assert_eq!(scheduled.kind, EventKind::Normal);
    assert!(scheduled.note.contains("v1.0.0"));
}

#[tokio::test]
async fn test_pending_run_is_not_duplicated() {
    let harness = container_harness(&["v1.0.0"]);

    harness.reconcile().await;
    harness.reconcile().await;

    assert_eq!(harness.pipelines.created_count(), 1);
    let status = harness.store.status();
    assert!(!status.ready);
    assert!(status.condition(condition_types::PIPELINE_RUNS_PENDING).is_some());
}

#[tokio::test]
async fn test_running_run_is_not_duplicated() {
    let harness = container_harness(&["v1.0.0"]);
    harness.reconcile().await;
    let name = harness.store.status().releases["v1.0.0"]
        .run(ArtifactType::Container)
        .unwrap()
        .name
        .clone();

    harness.clock.set(now() + TimeDelta::hours(3));
    harness.pipelines.insert_run(PipelineRunState {
        name,
        created_at: Some(now()),
        start_time: Some(now() + TimeDelta::minutes(150)),
        ..PipelineRunState::default()
    });
    harness.reconcile().await;

    assert_eq!(harness.pipelines.created_count(), 1);
}

#[tokio::test]
async fn test_stale_unstarted_run_is_replaced() {
    let harness = container_harness(&["v1.0.0"]);
    harness.reconcile().await;

    harness.clock.set(now() + TimeDelta::hours(2));
    harness.reconcile().await;

    assert_eq!(harness.pipelines.created_count(), 2);
    let status = harness.store.status();
    let run = status.releases["v1.0.0"].run(ArtifactType::Container).unwrap();
    assert_eq!(run.runs_created, 2);
    assert_eq!(run.timestamp, now() + TimeDelta::hours(2));
}

#[tokio::test]
async fn test_completed_run_without_artifacts_is_retried() {
    let harness = container_harness(&["v1.0.0"]);
    harness.store.update_status(|status| {
        status
            .releases
            .insert("v1.0.0".to_string(), tracked_release("finished", 1));
    });
    harness.pipelines.insert_run(PipelineRunState {
        name: "finished".to_string(),
        created_at: Some(now() - TimeDelta::days(1)),
        start_time: Some(now() - TimeDelta::minutes(50)),
        completion_time: Some(now() - TimeDelta::minutes(10)),
        succeeded: Some(false),
    });

    harness.reconcile().await;

    assert_eq!(harness.pipelines.created_count(), 1);
    let status = harness.store.status();
    assert_eq!(
        status.releases["v1.0.0"]
            .run(ArtifactType::Container)
            .unwrap()
            .runs_created,
        2
    );
}

#[tokio::test]
async fn test_creation_failure_backs_off() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.pipelines.fail_creation.lock().unwrap() = true;
    harness.store.update_status(|status| {
        status
            .releases
            .insert("v1.0.0".to_string(), tracked_release("finished", 3));
    });
    harness.pipelines.insert_run(PipelineRunState {
        name: "finished".to_string(),
        created_at: Some(now() - TimeDelta::days(1)),
        start_time: Some(now() - TimeDelta::hours(3)),
        completion_time: Some(now() - TimeDelta::hours(2)),
        succeeded: Some(false),
    });

    let requeue_after = harness.reconcile().await;

    // 2 minutes * 2^3 plus up to two hours of jitter
    assert!(requeue_after >= Duration::from_secs(16 * 60));
    assert!(requeue_after < Duration::from_secs((16 + 120) * 60));

    let status = harness.store.status();
    assert!(!status.ready);
    let condition = status
        .condition(condition_types::PIPELINE_RUNS_CREATION_FAILED)
        .unwrap();
    assert!(!condition.is_true());
    assert_eq!(
        status.releases["v1.0.0"]
            .run(ArtifactType::Container)
            .unwrap()
            .runs_created,
        3
    );
}

#[tokio::test]
async fn test_first_creation_failure_uses_minimum_backoff() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.pipelines.fail_creation.lock().unwrap() = true;

    let requeue_after = harness.reconcile().await;

    assert!(requeue_after >= Duration::from_secs(5 * 60));
    assert!(requeue_after < Duration::from_secs((5 + 120) * 60));
}

#[tokio::test]
async fn test_cleanup_drops_gone_and_expired_runs() {
    let harness = container_harness(&[]);
    harness.store.update_status(|status| {
        status
            .releases
            .insert("v0.7.0".to_string(), tracked_release("fresh", 1));
        status
            .releases
            .insert("v0.8.0".to_string(), tracked_release("gone", 1));
        status
            .releases
            .insert("v0.9.0".to_string(), tracked_release("expired", 1));
    });
    harness.pipelines.insert_run(PipelineRunState {
        name: "fresh".to_string(),
        created_at: Some(now() - TimeDelta::days(1)),
        ..PipelineRunState::default()
    });
    harness.pipelines.insert_run(PipelineRunState {
        name: "expired".to_string(),
        created_at: Some(now() - TimeDelta::days(15)),
        ..PipelineRunState::default()
    });

    harness.reconcile().await;

    let status = harness.store.status();
    assert!(status.releases["v0.7.0"].run(ArtifactType::Container).is_some());
    assert!(status.releases["v0.8.0"].pipeline_runs.is_none());
    assert!(status.releases["v0.9.0"].pipeline_runs.is_none());
}

#[tokio::test]
async fn test_rate_limited_releases_wait_for_reset() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.releases_failure.lock().unwrap() =
        Some(Failure::RateLimited(now() + TimeDelta::minutes(30)));

    let requeue_after = harness.reconcile().await;

    assert!(requeue_after >= Duration::from_secs(30 * 60));
    assert!(requeue_after < Duration::from_secs(40 * 60));

    let status = harness.store.status();
    let condition = status
        .condition(condition_types::FETCH_RELEASE_INFORMATION_FAILED)
        .unwrap();
    assert_eq!(
        condition.reason.as_deref(),
        Some(condition_reasons::RATE_LIMIT_EXCEEDED)
    );
    assert!(harness.events.has(reasons::RATE_LIMIT_EXCEEDED));
    assert_eq!(harness.pipelines.created_count(), 0);
}

#[tokio::test]
async fn test_failed_release_fetch_uses_regular_interval() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.releases_failure.lock().unwrap() = Some(Failure::Status(502));

    let requeue_after = harness.reconcile().await;

    assert_eq!(requeue_after, HOUR);
    let status = harness.store.status();
    let condition = status
        .condition(condition_types::FETCH_RELEASE_INFORMATION_FAILED)
        .unwrap();
    assert_eq!(condition.reason.as_deref(), Some(condition_reasons::UNKNOWN));
    assert!(harness.events.has(reasons::FETCHING_RELEASES_FAILED));
}

#[tokio::test]
async fn test_unauthorized_packages_are_reported() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.packages_failure.lock().unwrap() = Some(Failure::Unauthorized);

    let requeue_after = harness.reconcile().await;

    assert_eq!(requeue_after, HOUR);
    let status = harness.store.status();
    let condition = status
        .condition(condition_types::FETCH_RELEASE_ARTIFACTS_FAILED)
        .unwrap();
    assert_eq!(condition.reason.as_deref(), Some(condition_reasons::API_ERRORS));
    assert!(harness.events.has(reasons::UNAUTHORIZED_REQUESTS));
    assert!(!status.releases.contains_key("v1.0.0"));
    assert_eq!(harness.pipelines.created_count(), 0);
}

#[tokio::test]
async fn test_rate_limited_artifacts_requeue_after_reset() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.packages_failure.lock().unwrap() =
        Some(Failure::RateLimited(now() + TimeDelta::hours(2)));

    let requeue_after = harness.reconcile().await;

    assert!(requeue_after >= Duration::from_secs(2 * 3600));
    assert!(requeue_after < Duration::from_secs(3 * 3600));
    assert!(harness.events.has(reasons::RATE_LIMIT_EXCEEDED));
}

#[tokio::test]
async fn test_unconfigured_artifact_types_are_cleared() {
    let harness = Harness::new(
        common::spec(&[ArtifactType::Assets]),
        vec![release(1, "v1.0.0")],
    );
    harness.source.assets.lock().unwrap().insert(
        "v1.0.0".to_string(),
        vec![ReleaseAsset {
            id: 7,
            name: "gadget-linux-amd64.tar.gz".to_string(),
            ..ReleaseAsset::default()
        }],
    );
    harness.store.update_status(|status| {
        status.releases.insert(
            "v1.0.0".to_string(),
            ReleaseStatus {
                missing_artifacts: BTreeMap::from([
                    (ArtifactType::Assets, true),
                    (ArtifactType::Container, true),
                ]),
                pipeline_runs: None,
            },
        );
    });

    harness.reconcile().await;

    let status = harness.store.status();
    assert_eq!(
        status.releases["v1.0.0"].missing_artifacts,
        BTreeMap::from([(ArtifactType::Assets, false)])
    );
    assert!(status.ready);
    assert_eq!(harness.pipelines.created_count(), 0);
}

#[tokio::test]
async fn test_version_filter_and_omitted_versions() {
    let harness = container_harness(&["v0.9.0", "v1.0.0", "v1.1.0"]);
    harness.store.update_spec(|spec| {
        spec.version_filter = Some(VersionFilterSpec {
            implementation: "semver".to_string(),
            arg: ">= 1.0.0".to_string(),
        });
        spec.omit_versions = vec!["v1.1.0".to_string()];
    });

    harness.reconcile().await;

    let status = harness.store.status();
    assert_eq!(status.releases.keys().collect::<Vec<_>>(), vec!["v1.0.0"]);
    assert_eq!(harness.pipelines.created_count(), 1);
    assert!(harness.events.has(reasons::RELEASES_FILTERED));
}

#[tokio::test]
async fn test_invalid_version_filter_builds_nothing() {
    let harness = container_harness(&["v1.0.0"]);
    harness.store.update_spec(|spec| {
        spec.version_filter = Some(VersionFilterSpec {
            implementation: "calver".to_string(),
            arg: String::new(),
        });
    });

    harness.reconcile().await;

    let status = harness.store.status();
    let condition = status
        .condition(condition_types::VERSION_FILTER_INVALID)
        .unwrap();
    assert_eq!(
        condition.reason.as_deref(),
        Some(condition_reasons::INVALID_FILTER)
    );
    assert!(harness.events.has(reasons::INVALID_VERSION_FILTER));
    assert!(status.releases.is_empty());
    assert_eq!(harness.pipelines.created_count(), 0);
}

#[tokio::test]
async fn test_conditions_are_rebuilt_every_cycle() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.releases_failure.lock().unwrap() = Some(Failure::Status(500));
    harness.reconcile().await;

    *harness.source.releases_failure.lock().unwrap() = None;
    harness.source.publish_package("v1.0.0");
    harness.reconcile().await;

    let status = harness.store.status();
    assert!(status
        .condition(condition_types::FETCH_RELEASE_INFORMATION_FAILED)
        .is_none());
    assert!(status.condition(condition_types::NO_RUNS_NEEDED).is_some());
}

#[tokio::test]
async fn test_deleted_repository_is_not_requeued() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.store.repository.lock().unwrap() = None;

    assert_eq!(harness.reconcile_outcome().await, None);
    assert_eq!(*harness.store.saves.lock().unwrap(), 0);

    let action = reconcile(
        Arc::new(common::repository(common::spec(&[ArtifactType::Container]))),
        Arc::clone(&harness.reconciler),
    )
    .await
    .unwrap();
    assert_eq!(action, Action::await_change());
}

#[tokio::test]
async fn test_release_rate_limit_with_past_reset_still_requeues() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.releases_failure.lock().unwrap() =
        Some(Failure::RateLimited(now() - TimeDelta::seconds(1)));
    let minimum = Duration::from_secs(MIN_REQUEUE_SECS);

    // Covers every draw of the minute jitter, including zero
    for _ in 0..200 {
        assert!(harness.reconcile().await >= minimum);
    }

    let repository = Arc::new(common::repository(common::spec(&[ArtifactType::Container])));
    for _ in 0..50 {
        let action = reconcile(Arc::clone(&repository), Arc::clone(&harness.reconciler))
            .await
            .unwrap();
        assert_ne!(action, Action::await_change());
    }
}

#[tokio::test]
async fn test_artifact_rate_limit_with_past_reset_still_requeues() {
    let harness = container_harness(&["v1.0.0"]);
    *harness.source.packages_failure.lock().unwrap() =
        Some(Failure::RateLimited(now() - TimeDelta::minutes(5)));

    for _ in 0..100 {
        assert!(harness.reconcile().await >= Duration::from_secs(MIN_REQUEUE_SECS));
    }
}
