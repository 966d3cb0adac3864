//! UI-facing state of one sync instance.

use crate::connectivity::ConnectionStatus;

/// Snapshot of a sync instance as the UI sees it.
///
/// The UI must not assume `records` is non-empty or fully synchronized.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState<R> {
  pub records: Vec<R>,
  pub loading: bool,
  /// Last error worth showing. Offline is not an error.
  pub error: Option<String>,
  pub offline: bool,
  pub status: ConnectionStatus,
}

impl<R> SyncState<R> {
  pub fn is_connected(&self) -> bool {
    self.status == ConnectionStatus::Connected
  }
}

impl<R> Default for SyncState<R> {
  fn default() -> Self {
    Self {
      records: Vec::new(),
      loading: true,
      error: None,
      offline: false,
      status: ConnectionStatus::Connecting,
    }
  }
}
