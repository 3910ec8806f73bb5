//! # Repository Spec
//!
//! Main CRD specification types and default values.

use crate::crd::ArtifactType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Repository Custom Resource Definition
///
/// Declares a GitHub repository whose releases should be turned into build
/// artifacts by Tekton pipelines.
///
/// # Example
///
/// ```yaml
/// apiVersion: release-builds.microscaler.io/v1alpha1
/// kind: Repository
/// metadata:
///   name: my-service
///   namespace: builds
/// spec:
///   owner: microscaler
///   repo: my-service
///   pipelineNames:
///     assets: build-release-assets
///     container: build-container-image
///   versionFilter:
///     impl: semver
///     arg: ">= 1.0.0"
///   workspaces:
///     source:
///       type: volume
///       storageClassName: standard
///     ssh-creds:
///       type: secret
///       secretName: github-deploy-key
///   cloneUsingSsh: true
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Repository",
    group = "release-builds.microscaler.io",
    version = "v1alpha1",
    namespaced,
    status = "crate::crd::RepositoryStatus",
    shortname = "repo",
    printcolumn = r#"{"name":"Owner", "type":"string", "jsonPath":".spec.owner"}, {"name":"Repo", "type":"string", "jsonPath":".spec.repo"}, {"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RepositorySpec {
    /// GitHub user or organisation owning the repository
    pub owner: String,
    /// Repository name
    pub repo: String,
    /// Tekton pipeline to run for each artifact type
    /// Artifact types without an entry are not tracked
    #[serde(default)]
    pub pipeline_names: BTreeMap<ArtifactType, String>,
    /// Skip releases whose artifacts are all present on subsequent checks
    /// Default: true
    #[serde(default = "default_true")]
    pub memorize_releases: bool,
    /// Optional release tag filter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_filter: Option<VersionFilterSpec>,
    /// Release tags that are never built, applied after the version filter
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub omit_versions: Vec<String>,
    /// Workspace bindings passed to every PipelineRun
    /// Keyed by workspace name, each value carries a `type` (`secret` or `volume`)
    /// and the type specific settings (`secretName`, `storageClassName`)
    #[serde(default)]
    pub workspaces: BTreeMap<String, BTreeMap<String, String>>,
    /// Pass an SSH clone URL instead of HTTPS to the pipelines
    #[serde(default)]
    pub clone_using_ssh: bool,
    /// Overrides the generated PipelineRun name prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_run_name: Option<String>,
}

/// Release tag filter selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub struct VersionFilterSpec {
    /// Filter implementation, currently only `semver`
    #[serde(rename = "impl")]
    pub implementation: String,
    /// Implementation specific argument, a version requirement for `semver`
    #[serde(default)]
    pub arg: String,
}

impl RepositorySpec {
    #[must_use]
    pub fn is_configured(&self, artifact_type: ArtifactType) -> bool {
        self.pipeline_names.contains_key(&artifact_type)
    }

    /// Clone URL handed to the pipelines as the `clone-url` param
    #[must_use]
    pub fn clone_url(&self) -> String {
        if self.clone_using_ssh {
            format!("git@github.com:{}/{}.git", self.owner, self.repo)
        } else {
            format!("https://github.com/{}/{}.git", self.owner, self.repo)
        }
    }
}

/// Default value for boolean true
pub fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(clone_using_ssh: bool) -> RepositorySpec {
        RepositorySpec {
            owner: "microscaler".to_string(),
            repo: "gadget".to_string(),
            pipeline_names: BTreeMap::new(),
            memorize_releases: true,
            version_filter: None,
            omit_versions: Vec::new(),
            workspaces: BTreeMap::new(),
            clone_using_ssh,
            pipeline_run_name: None,
        }
    }

    #[test]
    fn test_clone_url_https_and_ssh() {
        assert_eq!(
            spec(false).clone_url(),
            "https://github.com/microscaler/gadget.git"
        );
        assert_eq!(spec(true).clone_url(), "git@github.com:microscaler/gadget.git");
    }

    #[test]
    fn test_spec_defaults_from_minimal_yaml() {
        let spec: RepositorySpec = serde_json::from_value(serde_json::json!({
            "owner": "microscaler",
            "repo": "gadget",
            "pipelineNames": { "container": "build-image" },
            "versionFilter": { "impl": "semver", "arg": ">= 1.0.0" }
        }))
        .unwrap();

        assert!(spec.memorize_releases);
        assert!(!spec.clone_using_ssh);
        assert!(spec.is_configured(ArtifactType::Container));
        assert!(!spec.is_configured(ArtifactType::Assets));
        assert_eq!(
            spec.version_filter,
            Some(VersionFilterSpec {
                implementation: "semver".to_string(),
                arg: ">= 1.0.0".to_string(),
            })
        );
    }
}
