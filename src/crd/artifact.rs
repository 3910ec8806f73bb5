//! # Artifact Types
//!
//! The fixed set of build outputs tracked per release.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of artifact a release is expected to carry.
///
/// Every variant maps to its own Tekton pipeline and its own completeness check.
/// Adding a variant forces every `match` over this enum to handle it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactType {
    /// Files attached to the GitHub release
    Assets,
    /// Container image published to the GitHub container registry
    Container,
}

impl ArtifactType {
    /// All artifact types in a stable order
    pub const ALL: [ArtifactType; 2] = [ArtifactType::Assets, ArtifactType::Container];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Assets => "assets",
            ArtifactType::Container => "container",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
