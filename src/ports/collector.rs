//! Collector Port - Uniform Source Adapter Contract
//!
//! One implementation per source category. The execution supervisor
//! dispatches on `JobSpec::category` through an adapter table and never
//! sees vendor details.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::error::CollectError;
use crate::domain::job::{Category, JobSpec};
use crate::domain::metric::MetricSet;

/// Collects one job into a fresh metric set.
///
/// Implementations must not retry; a failed collection is reported to
/// the supervisor as-is and the prior snapshot stays in place.
#[async_trait]
pub trait SourceAdapter: Send + Sync + 'static {
  /// Category this adapter serves.
  fn category(&self) -> Category;

  /// Run one collection for `job`.
  async fn collect(&self, job: &JobSpec) -> Result<MetricSet, CollectError>;
}

/// Category → adapter dispatch table, built once at startup.
#[derive(Clone, Default)]
pub struct AdapterTable {
  adapters: HashMap<Category, Arc<dyn SourceAdapter>>,
}

impl AdapterTable {
  /// Empty table.
  pub fn new() -> Self {
    Self::default()
  }

  /// Add `adapter` under its own category, replacing any previous one.
  pub fn with(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
    self.adapters.insert(adapter.category(), adapter);
    self
  }

  /// Adapter for `category`.
  pub fn get(&self, category: Category) -> Option<Arc<dyn SourceAdapter>> {
    self.adapters.get(&category).cloned()
  }

  /// Categories with an adapter.
  pub fn categories(&self) -> Vec<Category> {
    Category::ALL
      .into_iter()
      .filter(|c| self.adapters.contains_key(c))
      .collect()
  }
}

impl fmt::Debug for AdapterTable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AdapterTable")
      .field("categories", &self.categories())
      .finish()
  }
}
