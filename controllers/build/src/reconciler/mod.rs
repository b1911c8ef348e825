//! Reconciliation logic for Build resources.
//!
//! - `build`: entry point, forward pipeline and the per-pass write
//! - `external`: generic linkage to referenced, schema-unknown objects
//! - `infrastructure`, `phases`: the four forward phases
//! - `phase`: phase and Ready summary projection
//! - `deletion`: descendant discovery and finalizer-gated teardown
//! - `provisioner`: shell provisioner Job create/poll
//! - `job_observer`: reports finished Jobs back onto their Build

pub mod build;
pub mod deletion;
pub mod external;
pub mod infrastructure;
pub mod job_observer;
#[cfg(test)]
mod job_observer_test;
pub mod phase;
pub mod phases;
pub mod provisioner;

use crate::backoff::RetryTracker;
use crate::events::EventPublisher;
use crate::job::ShellSettings;
use crate::tracker::{KindWatcher, WatchTracker};
use crds::{Build, BuildStatus};
use kube_store::ObjectStore;
use std::sync::Arc;
use std::time::Duration;

/// Requeue interval while a referenced object does not exist yet
pub const MISSING_REFERENCE_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue interval while descendants are being deleted
pub const DELETION_REQUEUE: Duration = Duration::from_secs(5);

/// Requeue interval while a provisioner Job runs
pub const PROVISIONER_REQUEUE: Duration = Duration::from_secs(2);

/// Reconciles Builds and their provisioner Jobs.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) tracker: WatchTracker,
    pub(crate) retry: RetryTracker,
    pub(crate) shell: ShellSettings,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        events: Arc<dyn EventPublisher>,
        kinds: Arc<dyn KindWatcher>,
        retry: RetryTracker,
        shell: ShellSettings,
    ) -> Self {
        Self {
            store,
            events,
            tracker: WatchTracker::new(kinds),
            retry,
            shell,
        }
    }
}

/// Mutable status, created empty on first use.
pub(crate) fn status_mut(build: &mut Build) -> &mut BuildStatus {
    build.status.get_or_insert_with(BuildStatus::default)
}

/// Keeps the smallest non-zero requeue interval.
pub(crate) fn lowest_non_zero(current: Option<Duration>, next: Option<Duration>) -> Option<Duration> {
    match (current.filter(|d| !d.is_zero()), next.filter(|d| !d.is_zero())) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
