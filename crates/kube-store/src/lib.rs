//! Object Store Client
//!
//! Thin, mockable access layer over the Kubernetes API used by the Build
//! controller: typed Builds, untyped referenced objects addressed by
//! group-version-kind, CRD metadata, provisioner Jobs and their Pods.
//!
//! # Example
//!
//! ```no_run
//! use kube_store::{KubeObjectStore, ObjectStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = kube::Client::try_default().await?;
//! let store = KubeObjectStore::new(client);
//!
//! if let Some(build) = store.get_build("default", "ubuntu-image").await? {
//!     println!("phase: {:?}", build.status.and_then(|s| s.phase));
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod patch;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::KubeObjectStore;
pub use error::StoreError;
pub use patch::{merge_diff, with_resource_version};
pub use store_trait::{label_selector, ObjectStore};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockObjectStore;
