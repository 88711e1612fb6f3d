//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (SQL drivers, vendor REST APIs, HTTP push
//! endpoints, file I/O). Each sub-module groups adapters by
//! infrastructure concern.
//!
//! Adapter categories:
//! - `api`: AppDynamics and ExtraHop REST clients
//! - `database`: PostgreSQL connector via sqlx
//! - `sources`: Per-category collection and normalization
//! - `push`: Pushgateway and timestamped import destinations
//! - `job_sources`: External job definitions (file, HTTP)
//! - `metrics`: Job registries, exposition, HTTP surface

pub mod api;
pub mod database;
pub mod job_sources;
pub mod metrics;
pub mod push;
pub mod sources;
