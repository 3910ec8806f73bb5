//! Release Pipeline Controller Library
//!
//! Watches GitHub releases of the repositories described by `Repository`
//! resources and schedules Tekton PipelineRuns for releases whose artifacts
//! are missing.
//!
//! Tests are included in the module files and under `tests/`.

pub mod clock;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod github;
pub mod observability;
pub mod requeue;
pub mod runtime;
pub mod tekton;
pub mod version_filter;
