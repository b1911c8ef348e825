//! Forge Build CRD Definitions
//!
//! Kubernetes Custom Resource Definitions and shared constants for the
//! Build controller.

pub mod build;
pub mod condition;
pub mod labels;
pub mod provisioner;
pub mod references;

pub use build::*;
pub use condition::*;
pub use labels::*;
pub use provisioner::*;
pub use references::*;
