//! Process-wide registry of dynamic watches on referenced kinds.
//!
//! A Build can reference any provider kind, so the set of watched kinds is
//! only known at runtime. Each kind is watched at most once, no matter how
//! many Builds reference it or which version they resolve to.

use crate::error::ControllerError;
use kube::api::GroupVersionKind;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

/// Starts a watch on one kind that re-triggers owning Builds
pub trait KindWatcher: Send + Sync {
    /// Begin watching `gvk`. Called at most once per kind.
    fn start(&self, gvk: &GroupVersionKind) -> Result<(), ControllerError>;
}

/// De-duplicating front for a `KindWatcher`
pub struct WatchTracker {
    watcher: Arc<dyn KindWatcher>,
    watched: Mutex<BTreeSet<String>>,
}

fn kind_identity(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.kind.clone()
    } else {
        format!("{}.{}", gvk.kind, gvk.group)
    }
}

impl WatchTracker {
    /// Create a tracker delegating to `watcher`
    pub fn new(watcher: Arc<dyn KindWatcher>) -> Self {
        Self {
            watcher,
            watched: Mutex::new(BTreeSet::new()),
        }
    }

    /// Ensures `gvk`'s kind is watched. Idempotent.
    pub fn watch(&self, gvk: &GroupVersionKind) -> Result<(), ControllerError> {
        let identity = kind_identity(gvk);
        let mut watched = self.watched.lock().unwrap_or_else(PoisonError::into_inner);
        if watched.contains(&identity) {
            return Ok(());
        }
        self.watcher.start(gvk)?;
        info!("Watching {} for changes to Build-owned objects", identity);
        watched.insert(identity);
        Ok(())
    }

    /// Kinds currently watched, as `Kind.group`
    pub fn watched_kinds(&self) -> Vec<String> {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for WatchTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchTracker")
            .field("watched", &self.watched_kinds())
            .finish_non_exhaustive()
    }
}
