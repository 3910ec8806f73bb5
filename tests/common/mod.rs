//! Common test utilities
//!
//! In-memory implementations of the reconciler seams plus builders for
//! `Repository` resources.

#![allow(dead_code, reason = "each test binary uses a subset of the helpers")]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::core::v1::ObjectReference;
use release_pipeline_controller::clock::FixedClock;
use release_pipeline_controller::controller::events::{EventKind, EventPublisher};
use release_pipeline_controller::controller::reconciler::Reconciler;
use release_pipeline_controller::controller::store::{RepositoryStore, StoreError};
use release_pipeline_controller::crd::{ArtifactType, Repository, RepositorySpec, RepositoryStatus};
use release_pipeline_controller::github::{
    ArtifactQuery, GithubError, Package, RateLimitInfo, Release, ReleaseAsset, ReleaseQuery,
    ReleaseSource,
};
use release_pipeline_controller::tekton::{PipelineRunRequest, PipelineRunState, PipelineRunner, TektonError};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAMESPACE: &str = "builds";
pub const NAME: &str = "gadget";
pub const CONTAINER_PIPELINE: &str = "build-image";
pub const ASSETS_PIPELINE: &str = "build-assets";

static RUSTLS_INIT: Once = Once::new();

/// Install the ring crypto provider once per test binary
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

pub fn spec(types: &[ArtifactType]) -> RepositorySpec {
    RepositorySpec {
        owner: "microscaler".to_string(),
        repo: "gadget".to_string(),
        pipeline_names: types
            .iter()
            .map(|t| {
                let pipeline = match t {
                    ArtifactType::Assets => ASSETS_PIPELINE,
                    ArtifactType::Container => CONTAINER_PIPELINE,
                };
                (*t, pipeline.to_string())
            })
            .collect(),
        memorize_releases: true,
        version_filter: None,
        omit_versions: Vec::new(),
        workspaces: BTreeMap::new(),
        clone_using_ssh: false,
        pipeline_run_name: None,
    }
}

pub fn repository(spec: RepositorySpec) -> Repository {
    let mut repository = Repository::new(NAME, spec);
    repository.metadata.namespace = Some(NAMESPACE.to_string());
    repository.metadata.uid = Some("5f1c7c2e-0000-0000-0000-000000000001".to_string());
    repository
}

pub fn release(id: u64, tag: &str) -> Release {
    Release {
        id,
        tag_name: tag.to_string(),
        has_assets: None,
    }
}

pub fn package(tag: &str) -> Package {
    Package {
        name: "sha256:0123".to_string(),
        tag: Some(tag.to_string()),
        ..Package::default()
    }
}

/// Failure a fake returns instead of data
#[derive(Debug, Clone)]
pub enum Failure {
    RateLimited(DateTime<Utc>),
    Unauthorized,
    Status(u16),
}

impl Failure {
    fn to_error(&self) -> GithubError {
        match self {
            Failure::RateLimited(reset) => GithubError::RateLimited(RateLimitInfo {
                limit: 60,
                remaining: 0,
                reset: *reset,
            }),
            Failure::Unauthorized => GithubError::Unauthorized,
            Failure::Status(status) => GithubError::Status {
                status: *status,
                url: "https://api.github.test".to_string(),
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeSource {
    pub releases: Mutex<Vec<Release>>,
    pub releases_failure: Mutex<Option<Failure>>,
    pub assets: Mutex<HashMap<String, Vec<ReleaseAsset>>>,
    pub packages: Mutex<HashMap<String, Vec<Package>>>,
    pub packages_failure: Mutex<Option<Failure>>,
    pub queries: Mutex<Vec<ReleaseQuery>>,
}

impl FakeSource {
    pub fn with_releases(releases: Vec<Release>) -> Self {
        Self {
            releases: Mutex::new(releases),
            ..Self::default()
        }
    }

    pub fn publish_package(&self, tag: &str) {
        self.packages
            .lock()
            .unwrap()
            .insert(tag.to_string(), vec![package(tag)]);
    }

    pub fn last_query(&self) -> Option<ReleaseQuery> {
        self.queries.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl ReleaseSource for FakeSource {
    async fn get_releases(
        &self,
        query: &ReleaseQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Release>, GithubError> {
        self.queries.lock().unwrap().push(query.clone());
        if let Some(failure) = self.releases_failure.lock().unwrap().as_ref() {
            return Err(failure.to_error());
        }
        Ok(self
            .releases
            .lock()
            .unwrap()
            .iter()
            .filter(|release| !query.ignore_releases.contains(&release.tag_name))
            .cloned()
            .collect())
    }

    async fn get_assets(
        &self,
        query: &ArtifactQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ReleaseAsset>, GithubError> {
        Ok(self
            .assets
            .lock()
            .unwrap()
            .get(&query.release.tag_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_packages(
        &self,
        query: &ArtifactQuery,
        _cancel: &CancellationToken,
    ) -> Result<Vec<Package>, GithubError> {
        if let Some(failure) = self.packages_failure.lock().unwrap().as_ref() {
            return Err(failure.to_error());
        }
        Ok(self
            .packages
            .lock()
            .unwrap()
            .get(&query.release.tag_name)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Default)]
pub struct FakePipelines {
    pub pipelines: Mutex<HashSet<String>>,
    pub forbidden: Mutex<bool>,
    pub runs: Mutex<HashMap<String, PipelineRunState>>,
    pub fail_creation: Mutex<bool>,
    pub created: Mutex<Vec<PipelineRunRequest>>,
}

impl FakePipelines {
    pub fn with_pipelines(names: &[&str]) -> Self {
        Self {
            pipelines: Mutex::new(names.iter().map(ToString::to_string).collect()),
            ..Self::default()
        }
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn insert_run(&self, run: PipelineRunState) {
        self.runs.lock().unwrap().insert(run.name.clone(), run);
    }

    pub fn delete_run(&self, name: &str) {
        self.runs.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl PipelineRunner for FakePipelines {
    async fn get_pipeline(&self, _namespace: &str, name: &str) -> Result<(), TektonError> {
        if *self.forbidden.lock().unwrap() {
            return Err(TektonError::Forbidden {
                name: name.to_string(),
            });
        }
        if self.pipelines.lock().unwrap().contains(name) {
            Ok(())
        } else {
            Err(TektonError::NotFound {
                name: name.to_string(),
            })
        }
    }

    async fn get_pipeline_run(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<PipelineRunState, TektonError> {
        self.runs
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| TektonError::NotFound {
                name: name.to_string(),
            })
    }

    async fn create_pipeline_run(
        &self,
        request: &PipelineRunRequest,
    ) -> Result<PipelineRunState, TektonError> {
        if *self.fail_creation.lock().unwrap() {
            return Err(TektonError::CreateUnauthorized);
        }
        let mut created = self.created.lock().unwrap();
        created.push(request.clone());
        let run = PipelineRunState {
            name: format!("{}-{}", request.pipeline_run_name, created.len()),
            ..PipelineRunState::default()
        };
        self.runs
            .lock()
            .unwrap()
            .insert(run.name.clone(), run.clone());
        Ok(run)
    }
}

/// Store holding a single resource; saved statuses are written back
#[derive(Debug, Default)]
pub struct FakeStore {
    pub repository: Mutex<Option<Repository>>,
    pub saves: Mutex<u32>,
}

impl FakeStore {
    pub fn with_repository(repository: Repository) -> Self {
        Self {
            repository: Mutex::new(Some(repository)),
            saves: Mutex::new(0),
        }
    }

    pub fn status(&self) -> RepositoryStatus {
        self.repository
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|repository| repository.status.clone())
            .unwrap_or_default()
    }

    pub fn update_spec(&self, update: impl FnOnce(&mut RepositorySpec)) {
        if let Some(repository) = self.repository.lock().unwrap().as_mut() {
            update(&mut repository.spec);
        }
    }

    pub fn update_status(&self, update: impl FnOnce(&mut RepositoryStatus)) {
        if let Some(repository) = self.repository.lock().unwrap().as_mut() {
            update(repository.status.get_or_insert_with(RepositoryStatus::default));
        }
    }
}

#[async_trait]
impl RepositoryStore for FakeStore {
    async fn get(&self, _namespace: &str, _name: &str) -> Result<Option<Repository>, StoreError> {
        Ok(self.repository.lock().unwrap().clone())
    }

    async fn save_status(&self, repository: &Repository) -> Result<(), StoreError> {
        *self.saves.lock().unwrap() += 1;
        if let Some(stored) = self.repository.lock().unwrap().as_mut() {
            stored.status.clone_from(&repository.status);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: EventKind,
    pub reason: String,
    pub note: String,
}

#[derive(Debug, Default)]
pub struct FakeEvents {
    pub events: Mutex<Vec<RecordedEvent>>,
}

impl FakeEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.reason.clone())
            .collect()
    }

    pub fn has(&self, reason: &str) -> bool {
        self.reasons().iter().any(|r| r == reason)
    }
}

#[async_trait]
impl EventPublisher for FakeEvents {
    async fn publish(&self, _target: &ObjectReference, kind: EventKind, reason: &str, note: String) {
        self.events.lock().unwrap().push(RecordedEvent {
            kind,
            reason: reason.to_string(),
            note,
        });
    }
}

/// All fakes wired into one reconciler
#[derive(Debug)]
pub struct Harness {
    pub source: Arc<FakeSource>,
    pub pipelines: Arc<FakePipelines>,
    pub store: Arc<FakeStore>,
    pub events: Arc<FakeEvents>,
    pub clock: Arc<FixedClock>,
    pub reconciler: Arc<Reconciler>,
}

impl Harness {
    pub fn new(spec: RepositorySpec, releases: Vec<Release>) -> Self {
        let pipeline_names: Vec<&str> = spec.pipeline_names.values().map(String::as_str).collect();
        let pipelines = Arc::new(FakePipelines::with_pipelines(&pipeline_names));
        let source = Arc::new(FakeSource::with_releases(releases));
        let store = Arc::new(FakeStore::with_repository(repository(spec)));
        let events = Arc::new(FakeEvents::default());
        let clock = Arc::new(FixedClock::new(now()));

        let reconciler = Reconciler::new(
            Arc::clone(&source) as Arc<dyn ReleaseSource>,
            Arc::clone(&pipelines) as Arc<dyn PipelineRunner>,
            Arc::clone(&store) as Arc<dyn RepositoryStore>,
            Arc::clone(&events) as Arc<dyn EventPublisher>,
        )
        .with_clock(Arc::clone(&clock) as Arc<dyn release_pipeline_controller::clock::Clock>)
        .with_interval(Duration::from_secs(3600), 0.0);

        Self {
            source,
            pipelines,
            store,
            events,
            clock,
            reconciler: Arc::new(reconciler),
        }
    }

    pub async fn reconcile(&self) -> Duration {
        self.reconcile_outcome()
            .await
            .expect("repository should exist")
    }

    /// Delay until the next cycle, `None` once the repository is gone
    pub async fn reconcile_outcome(&self) -> Option<Duration> {
        self.reconciler
            .reconcile_repository(NAMESPACE, NAME)
            .await
            .expect("reconciliation should not fail")
    }
}
