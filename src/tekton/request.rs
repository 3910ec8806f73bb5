//! # PipelineRun Requests
//!
//! Turns a `Repository` and a release tag into the PipelineRun that builds a
//! given artifact type.

use crate::crd::{ArtifactType, RepositorySpec};
use crate::error::ErrorList;
use crate::tekton::crd::{Param, PipelineRef, PipelineRun, PipelineRunSpec, WorkspaceBinding};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, SecretVolumeSource,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::ObjectMeta;
use std::collections::BTreeMap;
use thiserror::Error;

pub const PARAM_CLONE_URL: &str = "clone-url";
pub const PARAM_REVISION: &str = "revision";
pub const PARAM_OWNER: &str = "owner";
pub const PARAM_REPOSITORY: &str = "repository";

const KEY_TYPE: &str = "type";
const KEY_SECRET_NAME: &str = "secretName";
const KEY_STORAGE_CLASS_NAME: &str = "storageClassName";
const TYPE_SECRET: &str = "secret";
const TYPE_VOLUME: &str = "volume";

/// Length of the owner and repo slices in generated run names
const NAME_SLICE_LEN: usize = 5;

/// Invalid workspace configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceError {
    #[error("workspace '{workspace}': type secret is missing 'secretName'")]
    MissingSecretName { workspace: String },
    #[error("workspace '{workspace}': unknown type '{value}'")]
    UnknownType { workspace: String, value: String },
}

/// Everything needed to create one PipelineRun
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineRunRequest {
    pub namespace: String,
    /// Prefix for `generateName`
    pub pipeline_run_name: String,
    pub pipeline_name: String,
    pub params: BTreeMap<String, String>,
    pub workspaces: BTreeMap<String, BTreeMap<String, String>>,
}

impl PipelineRunRequest {
    /// Build the request for `artifact_type` of release `tag`
    ///
    /// Returns `None` when no pipeline is configured for the artifact type.
    #[must_use]
    pub fn build(
        spec: &RepositorySpec,
        namespace: &str,
        tag: &str,
        artifact_type: ArtifactType,
    ) -> Option<Self> {
        let pipeline_name = spec
            .pipeline_names
            .get(&artifact_type)
            .filter(|name| !name.is_empty())?;

        let pipeline_run_name = spec
            .pipeline_run_name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| default_run_name(&spec.owner, &spec.repo, tag));

        let params = BTreeMap::from([
            (PARAM_CLONE_URL.to_string(), spec.clone_url()),
            (PARAM_REVISION.to_string(), tag.to_string()),
            (PARAM_OWNER.to_string(), spec.owner.clone()),
            (PARAM_REPOSITORY.to_string(), spec.repo.clone()),
        ]);

        Some(Self {
            namespace: namespace.to_string(),
            pipeline_run_name,
            pipeline_name: pipeline_name.clone(),
            params,
            workspaces: spec.workspaces.clone(),
        })
    }

    /// Render the PipelineRun object
    ///
    /// # Errors
    ///
    /// Returns every invalid workspace binding at once.
    pub fn to_pipeline_run(&self) -> Result<PipelineRun, ErrorList<WorkspaceError>> {
        let workspaces = workspace_bindings(&self.workspaces)?;
        let params = self
            .params
            .iter()
            .map(|(name, value)| Param {
                name: name.clone(),
                value: value.clone(),
            })
            .collect();

        Ok(PipelineRun {
            metadata: ObjectMeta {
                namespace: Some(self.namespace.clone()),
                generate_name: Some(format!("{}-", self.pipeline_run_name)),
                ..ObjectMeta::default()
            },
            spec: PipelineRunSpec {
                pipeline_ref: Some(PipelineRef {
                    name: self.pipeline_name.clone(),
                }),
                params,
                workspaces,
            },
            status: None,
        })
    }
}

/// `build-{owner[..5]}-{repo[..5]}-{tag}`
fn default_run_name(owner: &str, repo: &str, tag: &str) -> String {
    format!(
        "build-{}-{}-{tag}",
        prefix(owner, NAME_SLICE_LEN),
        prefix(repo, NAME_SLICE_LEN)
    )
}

/// First `n` characters of `value`
fn prefix(value: &str, n: usize) -> &str {
    value
        .char_indices()
        .nth(n)
        .map_or(value, |(index, _)| &value[..index])
}

fn setting<'a>(settings: &'a BTreeMap<String, String>, key: &str) -> &'a str {
    settings.get(key).map_or("", String::as_str)
}

fn workspace_bindings(
    workspaces: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<Vec<WorkspaceBinding>, ErrorList<WorkspaceError>> {
    let mut errors = ErrorList::new();
    let mut bindings = Vec::with_capacity(workspaces.len());

    for (name, settings) in workspaces {
        let mut binding = WorkspaceBinding {
            name: name.clone(),
            ..WorkspaceBinding::default()
        };

        match setting(settings, KEY_TYPE) {
            TYPE_SECRET => {
                let secret_name = setting(settings, KEY_SECRET_NAME).trim();
                if secret_name.is_empty() {
                    errors.push(WorkspaceError::MissingSecretName {
                        workspace: name.clone(),
                    });
                    continue;
                }
                binding.secret = Some(SecretVolumeSource {
                    secret_name: Some(secret_name.to_string()),
                    ..SecretVolumeSource::default()
                });
            }
            TYPE_VOLUME => {
                let storage_class_name = Some(setting(settings, KEY_STORAGE_CLASS_NAME))
                    .filter(|class| !class.is_empty())
                    .map(ToString::to_string);
                binding.volume_claim_template = Some(PersistentVolumeClaim {
                    spec: Some(PersistentVolumeClaimSpec {
                        access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                        storage_class_name,
                        resources: Some(VolumeResourceRequirements {
                            requests: Some(BTreeMap::from([(
                                "storage".to_string(),
                                Quantity("1".to_string()),
                            )])),
                            ..VolumeResourceRequirements::default()
                        }),
                        ..PersistentVolumeClaimSpec::default()
                    }),
                    ..PersistentVolumeClaim::default()
                });
            }
            other => {
                errors.push(WorkspaceError::UnknownType {
                    workspace: name.clone(),
                    value: other.to_string(),
                });
                continue;
            }
        }

        bindings.push(binding);
    }

    errors.into_result().map(|()| bindings)
}
