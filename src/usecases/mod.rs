//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement
//! the exporter's core workflows. Each use case is a self-contained
//! operation.
//!
//! Use cases:
//! - `ExecutionSupervisor`: Deadline-bounded runs of one job
//! - `PushDispatcher`: Snapshot delivery to push destinations
//! - `JobScheduler`: Triggers, worker pools and job lifecycle
//! - `Reconciler`: External job source diffing
//! - `ControlApi`: Exposition and scheduler control

pub mod control;
pub mod dispatcher;
pub mod reconciler;
pub mod scheduler;
pub mod supervisor;
