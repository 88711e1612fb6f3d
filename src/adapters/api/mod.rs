//! Vendor REST API Adapters
//!
//! HTTP clients for the APM sources. They return raw records through the
//! source ports; normalization happens in `adapters::sources`.
//!
//! Sub-modules:
//! - `client`: Shared reqwest client with per-service credentials
//! - `appdynamics`: Metric-tree client (`MetricTreeApi`)
//! - `extrahop`: Stats client (`StatsApi`)
//! - `types`: Vendor response shapes

pub mod appdynamics;
pub mod client;
pub mod extrahop;
pub mod types;

pub use appdynamics::AppDynamicsClient;
pub use client::{ApiClient, ApiClientConfig, ServiceAuth, ServiceEndpoint};
pub use extrahop::ExtraHopClient;
