//! Push Destination Adapters
//!
//! - `Pushgateway`: grouping-key replace/delete, no sample timestamps
//! - `ImportBridge`: timestamp-preserving text import

pub mod import;
pub mod pushgateway;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::config::{PushKind, PushServiceConfig};
use crate::ports::push::PushDestination;

pub use import::ImportBridge;
pub use pushgateway::Pushgateway;

pub(crate) const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Basic-auth credentials for a destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushCredentials {
    pub username: String,
    pub password: Option<String>,
}

/// Build the destination for one configured push service.
pub fn build_destination(name: &str, config: &PushServiceConfig) -> Result<Arc<dyn PushDestination>> {
    let credentials = config.username.clone().map(|username| PushCredentials {
        username,
        password: config.password.clone(),
    });
    let timeout = Duration::from_secs(config.timeout_seconds);

    Ok(match config.kind {
        PushKind::Pushgateway => Arc::new(Pushgateway::new(name, &config.url, credentials, timeout)?),
        PushKind::Import => Arc::new(ImportBridge::new(name, &config.url, credentials, timeout)?),
    })
}
