//! # Pipeline Runner
//!
//! Looks up Tekton Pipelines and PipelineRuns and submits new PipelineRuns
//! through the Kubernetes API.

use crate::error::ErrorList;
use crate::tekton::crd::{Pipeline, PipelineRun};
use crate::tekton::request::{PipelineRunRequest, WorkspaceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum TektonError {
    #[error("tekton resource '{name}' not found")]
    NotFound { name: String },

    #[error("forbidden to get tekton resource '{name}'")]
    Forbidden { name: String },

    #[error("unauthorized to create tekton pipelinerun resource")]
    CreateUnauthorized,

    #[error("can not build PipelineRun from repository spec: {0}")]
    InvalidSpec(ErrorList<WorkspaceError>),

    #[error("created PipelineRun has no name")]
    MissingName,

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl TektonError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, TektonError::NotFound { .. })
    }

    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, TektonError::Forbidden { .. })
    }

    fn from_get(name: &str, error: kube::Error) -> Self {
        Self::classify_get(name, api_code(&error)).unwrap_or(TektonError::Kube(error))
    }

    fn classify_get(name: &str, code: Option<u16>) -> Option<Self> {
        match code? {
            404 => Some(TektonError::NotFound {
                name: name.to_string(),
            }),
            403 => Some(TektonError::Forbidden {
                name: name.to_string(),
            }),
            _ => None,
        }
    }
}

fn api_code(error: &kube::Error) -> Option<u16> {
    match error {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// What the reconciler needs to know about an existing PipelineRun
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PipelineRunState {
    pub name: String,
    pub created_at: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    /// Value of the `Succeeded` condition, `None` while unknown
    pub succeeded: Option<bool>,
}

impl PipelineRunState {
    #[must_use]
    pub fn has_started(&self) -> bool {
        self.start_time.is_some()
    }

    #[must_use]
    pub fn has_completed(&self) -> bool {
        self.has_started() && self.completion_time.is_some()
    }
}

impl From<&PipelineRun> for PipelineRunState {
    fn from(run: &PipelineRun) -> Self {
        let status = run.status.as_ref();
        Self {
            name: run.name_any(),
            created_at: run
                .metadata
                .creation_timestamp
                .as_ref()
                .and_then(meta_time_to_utc),
            start_time: status.and_then(|s| s.start_time),
            completion_time: status.and_then(|s| s.completion_time),
            succeeded: status.and_then(crate::tekton::crd::PipelineRunStatus::succeeded),
        }
    }
}

/// Read an apimachinery timestamp through its RFC 3339 wire form
fn meta_time_to_utc(
    time: &k8s_openapi::apimachinery::pkg::apis::meta::v1::Time,
) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(time).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Execution backend for release builds
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    /// Verify that a Pipeline exists
    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<(), TektonError>;

    async fn get_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PipelineRunState, TektonError>;

    async fn create_pipeline_run(
        &self,
        request: &PipelineRunRequest,
    ) -> Result<PipelineRunState, TektonError>;
}

/// [`PipelineRunner`] backed by the Tekton CRDs in the cluster
#[derive(Clone)]
pub struct TektonPipelineRunner {
    client: Client,
}

impl std::fmt::Debug for TektonPipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TektonPipelineRunner").finish_non_exhaustive()
    }
}

impl TektonPipelineRunner {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PipelineRunner for TektonPipelineRunner {
    async fn get_pipeline(&self, namespace: &str, name: &str) -> Result<(), TektonError> {
        let api: Api<Pipeline> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map(|_| ())
            .map_err(|err| TektonError::from_get(name, err))
    }

    async fn get_pipeline_run(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PipelineRunState, TektonError> {
        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map(|run| PipelineRunState::from(&run))
            .map_err(|err| TektonError::from_get(name, err))
    }

    async fn create_pipeline_run(
        &self,
        request: &PipelineRunRequest,
    ) -> Result<PipelineRunState, TektonError> {
        let pipeline_run = request
            .to_pipeline_run()
            .map_err(TektonError::InvalidSpec)?;

        let api: Api<PipelineRun> = Api::namespaced(self.client.clone(), &request.namespace);
        let created = api
            .create(&PostParams::default(), &pipeline_run)
            .await
            .map_err(|err| match api_code(&err) {
                Some(403) => TektonError::CreateUnauthorized,
                _ => TektonError::Kube(err),
            })?;

        if created.metadata.name.is_none() {
            return Err(TektonError::MissingName);
        }
        debug!(
            pipeline_run = %created.name_any(),
            pipeline = %request.pipeline_name,
            "Created PipelineRun"
        );
        Ok(PipelineRunState::from(&created))
    }
}
