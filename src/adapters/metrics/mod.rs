//! Metrics and Monitoring Adapters
//!
//! Per-job Prometheus registries with optional multi-process shards,
//! the exporter's own instrumentation, and the axum 0.7 HTTP surface
//! for exposition, scheduler control and health checks (/live, /ready).

pub mod exposition;
pub mod prometheus;
pub mod registry;
pub mod server;
pub mod shard;

pub use self::prometheus::ProcessMetrics;
pub use registry::RegistryManager;
pub use server::HttpServer;
pub use shard::ShardStore;
