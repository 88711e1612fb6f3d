//! Event Port - Scheduler Listeners
//!
//! Listeners are invoked synchronously from run tasks and the trigger
//! loop; implementations must not block.

use crate::domain::outcome::JobEvent;

/// Receives execution outcomes and missed firings.
pub trait JobListener: Send + Sync + 'static {
  /// Handle one event.
  fn on_event(&self, event: &JobEvent);
}
