//! # Tekton
//!
//! Execution backend for release builds.
//!
//! - `crd` - `Pipeline` and `PipelineRun` resource types
//! - `request` - PipelineRun construction from a `Repository`
//! - `runner` - [`PipelineRunner`] trait and its Kubernetes implementation

pub mod crd;
pub mod request;
pub mod runner;

pub use request::{PipelineRunRequest, WorkspaceError};
pub use runner::{PipelineRunState, PipelineRunner, TektonError, TektonPipelineRunner};
