//! Build Controller
//!
//! Reconciles `Build` resources toward a finished machine image:
//! infrastructure provisioned, a transport session established, the
//! ordered provisioner steps run as Jobs, and the image exported.

mod backoff;
mod conditions;
mod config;
mod controller;
mod error;
mod events;
mod job;
mod reconciler;
#[cfg(test)]
mod test_utils;
mod tracker;
mod unstructured;
mod version;
mod watcher;

use crate::config::{LogFormat, Settings};
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let settings = Settings::from_env()?;
    init_tracing(settings.log_format);

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting Build Controller");
    info!("Configuration:");
    info!("  Namespace: {}", settings.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Workers: {}", settings.worker_concurrency);
    info!("  Watch filter: {}", settings.worker_name.as_deref().unwrap_or("none"));
    info!("  Provisioner Jobs: {} ({})", settings.shell.namespace, settings.shell.image);

    let controller = Controller::new(settings).await?;
    controller.run().await?;

    Ok(())
}
