//! Kubernetes event publishing.
//!
//! Events are best effort: a failure to publish is logged and never fails
//! the reconcile pass that produced it.

use crds::Build;
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Publishes events about Builds
#[async_trait::async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish one event regarding `build`
    async fn publish(&self, build: &Build, event_type: EventType, reason: &str, note: String);
}

/// Publishes through the Kubernetes events API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller`
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, build: &Build, event_type: EventType, reason: &str, note: String) {
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &build.object_ref(&())).await {
            warn!("Failed to publish {} event for Build {}: {}", reason, build.key(), e);
        }
    }
}
