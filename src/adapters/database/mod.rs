//! Database Wire Clients
//!
//! `SqlConnector` implementations. Only PostgreSQL ships; other drivers
//! plug in behind the same port.

pub mod postgres;

pub use postgres::PgConnector;
