//! # Repository Status
//!
//! Status types for tracking releases, their artifacts and the PipelineRuns
//! scheduled to build them.

use crate::crd::ArtifactType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Condition types written by the reconciler
pub mod condition_types {
    pub const TEKTON_PIPELINE_UNAVAILABLE: &str = "TektonPipelineUnavailable";
    pub const FETCH_RELEASE_INFORMATION_FAILED: &str = "FetchReleaseInformationFailed";
    pub const FETCH_RELEASE_ARTIFACTS_FAILED: &str = "FetchReleaseArtifactsFailed";
    pub const NO_RUNS_NEEDED: &str = "NoRunsNeeded";
    pub const PIPELINE_RUNS_CREATED: &str = "PipelineRunsCreated";
    pub const PIPELINE_RUNS_PENDING: &str = "PipelineRunsPending";
    pub const PIPELINE_RUNS_CREATION_FAILED: &str = "PipelineRunsCreationFailed";
    pub const VERSION_FILTER_INVALID: &str = "VersionFilterInvalid";
}

/// Condition reasons written by the reconciler
pub mod condition_reasons {
    pub const PIPELINE_NOT_FOUND: &str = "PipelineNotFound";
    pub const FORBIDDEN: &str = "Forbidden";
    pub const UNKNOWN: &str = "Unknown";
    pub const RATE_LIMIT_EXCEEDED: &str = "RateLimitExceeded";
    pub const API_ERRORS: &str = "ApiErrors";
    pub const NO_MISSING_RELEASES: &str = "NoMissingReleases";
    pub const MISSING_RELEASES_FOUND: &str = "MissingReleasesFound";
    pub const RUNS_IN_FLIGHT: &str = "RunsInFlight";
    pub const INVALID_FILTER: &str = "InvalidFilter";
}

/// Status of the Repository resource
///
/// Owned by the reconciler. Conditions are rebuilt on every cycle so they
/// only carry the latest verdict per type.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStatus {
    /// True when the last cycle ended with every release accounted for
    #[serde(default)]
    pub ready: bool,
    /// Start of the last release check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Known releases keyed by tag
    #[serde(default)]
    pub releases: BTreeMap<String, ReleaseStatus>,
}

/// Artifact and run bookkeeping for a single release
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseStatus {
    /// Whether each configured artifact type is still missing
    #[serde(default)]
    pub missing_artifacts: BTreeMap<ArtifactType, bool>,
    /// Most recent PipelineRun per artifact type
    /// Absent when no runs are tracked, never an empty map
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline_runs: Option<BTreeMap<ArtifactType, PipelineRunRecord>>,
}

/// Record of the most recent PipelineRun created for a (release, artifact type) pair
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRunRecord {
    /// Name of the PipelineRun as assigned by the API server
    pub name: String,
    /// Creation timestamp of the PipelineRun
    pub timestamp: DateTime<Utc>,
    /// Number of PipelineRuns created for this pair so far
    #[serde(default)]
    pub runs_created: u32,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    #[must_use]
    pub fn new(
        now: DateTime<Utc>,
        r#type: &str,
        status: bool,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: r#type.to_string(),
            status: if status { "True" } else { "False" }.to_string(),
            last_transition_time: Some(now.to_rfc3339()),
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    #[must_use]
    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

impl RepositoryStatus {
    /// Upsert a condition by type
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|existing| existing.r#type == condition.r#type)
        {
            Some(existing) => *existing = condition,
            None => self.conditions.push(condition),
        }
    }

    #[must_use]
    pub fn condition(&self, r#type: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.r#type == r#type)
    }

    /// Tags of releases for which every artifact type in `configured` is present
    pub fn satisfied_tags<'a>(
        &'a self,
        configured: &'a BTreeMap<ArtifactType, String>,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.releases
            .iter()
            .filter(move |(_, release)| release.is_satisfied(configured))
            .map(|(tag, _)| tag.as_str())
    }
}

impl ReleaseStatus {
    /// A release is satisfied when no configured artifact type is flagged missing.
    ///
    /// Types that were never checked count as missing.
    #[must_use]
    pub fn is_satisfied(&self, configured: &BTreeMap<ArtifactType, String>) -> bool {
        configured
            .keys()
            .all(|artifact_type| self.missing_artifacts.get(artifact_type) == Some(&false))
    }

    #[must_use]
    pub fn is_missing(&self, artifact_type: ArtifactType) -> bool {
        self.missing_artifacts
            .get(&artifact_type)
            .copied()
            .unwrap_or(false)
    }

    #[must_use]
    pub fn run(&self, artifact_type: ArtifactType) -> Option<&PipelineRunRecord> {
        self.pipeline_runs.as_ref()?.get(&artifact_type)
    }

    /// Record a newly created PipelineRun, bumping the creation counter
    pub fn record_run(&mut self, artifact_type: ArtifactType, name: String, timestamp: DateTime<Utc>) {
        let runs = self.pipeline_runs.get_or_insert_with(BTreeMap::new);
        let runs_created = runs
            .get(&artifact_type)
            .map_or(0, |record| record.runs_created)
            .saturating_add(1);
        runs.insert(
            artifact_type,
            PipelineRunRecord {
                name,
                timestamp,
                runs_created,
            },
        );
    }

    /// Drop the run record for `artifact_type`; the map collapses to `None` once empty
    pub fn remove_run(&mut self, artifact_type: ArtifactType) -> Option<PipelineRunRecord> {
        let runs = self.pipeline_runs.as_mut()?;
        let removed = runs.remove(&artifact_type);
        if runs.is_empty() {
            self.pipeline_runs = None;
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn configured(types: &[ArtifactType]) -> BTreeMap<ArtifactType, String> {
        types
            .iter()
            .map(|t| (*t, format!("build-{t}")))
            .collect()
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let first_check = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let second_check = first_check + chrono::TimeDelta::hours(1);
        let mut status = RepositoryStatus::default();
        status.set_condition(Condition::new(
            first_check,
            condition_types::NO_RUNS_NEEDED,
            true,
            condition_reasons::NO_MISSING_RELEASES,
            "first",
        ));
        status.set_condition(Condition::new(
            second_check,
            condition_types::NO_RUNS_NEEDED,
            false,
            condition_reasons::UNKNOWN,
            "second",
        ));

        assert_eq!(status.conditions.len(), 1);
        let condition = status.condition(condition_types::NO_RUNS_NEEDED).unwrap();
        assert!(!condition.is_true());
        assert_eq!(condition.message.as_deref(), Some("second"));
        assert_eq!(
            condition.last_transition_time,
            Some(second_check.to_rfc3339())
        );
    }

    #[test]
    fn test_record_run_increments_counter() {
        let mut release = ReleaseStatus::default();
        let now = Utc::now();
        release.record_run(ArtifactType::Assets, "run-a".to_string(), now);
        release.record_run(ArtifactType::Assets, "run-b".to_string(), now);

        let record = release.run(ArtifactType::Assets).unwrap();
        assert_eq!(record.name, "run-b");
        assert_eq!(record.runs_created, 2);
    }

    #[test]
    fn test_remove_last_run_collapses_map() {
        let mut release = ReleaseStatus::default();
        let now = Utc::now();
        release.record_run(ArtifactType::Assets, "a".to_string(), now);
        release.record_run(ArtifactType::Container, "c".to_string(), now);

        assert!(release.remove_run(ArtifactType::Assets).is_some());
        assert!(release.pipeline_runs.is_some());
        assert!(release.remove_run(ArtifactType::Container).is_some());
        assert!(release.pipeline_runs.is_none());
        assert!(release.remove_run(ArtifactType::Container).is_none());
    }

    #[test]
    fn test_satisfied_requires_every_configured_type_present() {
        let both = configured(&ArtifactType::ALL);
        let assets_only = configured(&[ArtifactType::Assets]);

        let mut release = ReleaseStatus::default();
        release.missing_artifacts.insert(ArtifactType::Assets, false);
        assert!(release.is_satisfied(&assets_only));
        assert!(!release.is_satisfied(&both));

        release.missing_artifacts.insert(ArtifactType::Container, true);
        assert!(!release.is_satisfied(&both));

        release.missing_artifacts.insert(ArtifactType::Container, false);
        assert!(release.is_satisfied(&both));
    }

    #[test]
    fn test_empty_run_map_is_not_serialized() {
        let release = ReleaseStatus::default();
        let json = serde_json::to_value(&release).unwrap();
        assert!(json.get("pipelineRuns").is_none());
        assert_eq!(json["missingArtifacts"], serde_json::json!({}));
    }
}
