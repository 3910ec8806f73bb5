//! # Controller
//!
//! Core controller modules for the Release Pipeline Controller.
//!
//! - `events`: Kubernetes Events about Repository resources
//! - `reconciler`: Core reconciliation logic
//! - `server`: HTTP server for metrics and health checks
//! - `store`: Loading Repositories and persisting their status
//! - `task_group`: Fail-fast grouping of concurrent lookups

pub mod events;
pub mod reconciler;
pub mod server;
pub mod store;
pub mod task_group;
