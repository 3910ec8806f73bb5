//! # Events
//!
//! Kubernetes Events attached to `Repository` resources.

use crate::constants::EVENT_REPORTER;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

pub mod reasons {
    pub const RATE_LIMIT_EXCEEDED: &str = "RateLimitExceeded";
    pub const FETCHING_RELEASES_FAILED: &str = "FetchingReleasesFailed";
    pub const RELEASES_FILTERED: &str = "ReleasesFiltered";
    pub const INVALID_VERSION_FILTER: &str = "InvalidVersionFilter";
    pub const PIPELINE_RUN_SCHEDULED: &str = "PipelineRunScheduled";
    pub const UNAUTHORIZED_REQUESTS: &str = "UnauthorizedRequests";
    pub const FETCH_ARTIFACTS_ERROR: &str = "FetchArtifactsError";
}

/// Severity of a published event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Normal,
    Warning,
}

impl From<EventKind> for EventType {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Normal => EventType::Normal,
            EventKind::Warning => EventType::Warning,
        }
    }
}

/// Sink for events about a resource
///
/// Publishing is best effort; failures are logged by the implementation.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, target: &ObjectReference, kind: EventKind, reason: &str, note: String);
}

/// [`EventPublisher`] backed by the `events.k8s.io` API
#[derive(Clone)]
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    #[must_use]
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: EVENT_REPORTER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, target: &ObjectReference, kind: EventKind, reason: &str, note: String) {
        let event = Event {
            type_: kind.into(),
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(err) = self.recorder.publish(&event, target).await {
            warn!(
                reason,
                object = target.name.as_deref().unwrap_or("unknown"),
                error = %err,
                "Failed to publish event"
            );
        }
    }
}
