//! # Repository Store
//!
//! Loads `Repository` resources and persists their status.
//!
//! Status is written with server-side apply so the controller owns the
//! status fields without racing spec updates from users.

use crate::constants::FIELD_MANAGER;
use crate::crd::Repository;
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("failed to serialize status: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("repository '{0}' has no namespace")]
    MissingNamespace(String),
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    /// Current state of the resource, `None` once it is gone
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Repository>, StoreError>;

    /// Persist `repository.status`
    async fn save_status(&self, repository: &Repository) -> Result<(), StoreError>;
}

/// [`RepositoryStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeRepositoryStore {
    client: Client,
}

impl std::fmt::Debug for KubeRepositoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeRepositoryStore").finish_non_exhaustive()
    }
}

impl KubeRepositoryStore {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl RepositoryStore for KubeRepositoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Repository>, StoreError> {
        let api: Api<Repository> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn save_status(&self, repository: &Repository) -> Result<(), StoreError> {
        let name = repository.name_any();
        let namespace = repository
            .namespace()
            .ok_or_else(|| StoreError::MissingNamespace(name.clone()))?;

        let api: Api<Repository> = Api::namespaced(self.client.clone(), &namespace);
        let patch = json!({
            "apiVersion": "release-builds.microscaler.io/v1alpha1",
            "kind": "Repository",
            "status": serde_json::to_value(&repository.status)?,
        });

        api.patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(patch),
        )
        .await?;

        debug!(repository = %name, namespace = %namespace, "Status persisted");
        Ok(())
    }
}
