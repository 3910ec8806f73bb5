//! # Custom Resource Definitions
//!
//! CRD types for the Release Pipeline Controller.
//!
//! ## Module Structure
//!
//! - `artifact.rs` - Closed set of artifact types tracked per release
//! - `spec.rs` - `Repository` CRD specification and default values
//! - `status.rs` - Status types for tracking releases and PipelineRuns

mod artifact;
mod spec;
mod status;

pub use artifact::ArtifactType;
pub use spec::{default_true, Repository, RepositorySpec, VersionFilterSpec};
pub use status::{
    condition_reasons, condition_types, Condition, PipelineRunRecord, ReleaseStatus,
    RepositoryStatus,
};
