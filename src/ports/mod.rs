//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use-case layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `SourceAdapter` / `AdapterTable`: Per-category collection contract
//! - `SqlConnector` / `MetricTreeApi` / `StatsApi`: Vendor wire clients
//! - `MetricStore`: Per-job registries and exposition
//! - `PushDestination`: Remote metric aggregators
//! - `JobSource`: External job definitions
//! - `JobListener`: Scheduler events

pub mod collector;
pub mod events;
pub mod job_source;
pub mod push;
pub mod registry;
pub mod sources;
