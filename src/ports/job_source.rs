//! Job Source Port - External Job Definitions
//!
//! The reconciliation loop polls a job source for the current set of
//! externally managed job definitions.

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::JobSourceError;

/// A raw job definition, before templates and validation.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
  /// Job id.
  pub id: String,
  /// Definition body (`services`, `interval_minutes`, ...).
  pub body: Value,
}

/// Provider of external job definitions.
#[async_trait]
pub trait JobSource: Send + Sync + 'static {
  /// Fetch every current definition, in source order.
  async fn fetch(&self) -> Result<Vec<JobDefinition>, JobSourceError>;
}
