//! # Requeue
//!
//! Delay computation for the next reconciliation of a `Repository`.
//!
//! - `jitter` - Jitter and exponential backoff primitives
//! - `on_hours` - Policy restricting requeues to a daily UTC window

pub mod jitter;
pub mod on_hours;

pub use on_hours::{OnHoursError, OnHoursRequeue};

use std::time::Duration;

/// Adjusts a proposed requeue delay before it is handed to the runtime
pub trait RequeuePolicy: Send + Sync + std::fmt::Debug {
    fn requeue(&self, duration: Duration) -> Duration;
}

/// Policy that keeps the proposed delay unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRequeue;

impl RequeuePolicy for DefaultRequeue {
    fn requeue(&self, duration: Duration) -> Duration {
        duration
    }
}
