//! Process-wide connectivity signal shared by every sync instance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Whether the remote document store is believed reachable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
  /// A subscription attempt is in flight
  #[default]
  Connecting,
  /// At least one live subscription delivered a snapshot
  Connected,
  /// The remote store is known to be unreachable or blocked
  Offline,
}

impl fmt::Display for ConnectionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Connecting => write!(f, "connecting"),
      Self::Connected => write!(f, "connected"),
      Self::Offline => write!(f, "offline"),
    }
  }
}

/// Shared handle on the connectivity state.
///
/// Clones observe and mutate the same state. Listeners registered through
/// [`ConnectivityMonitor::subscribe`] wake only when the value actually changes.
/// There is no polling and no backoff: reconnection happens when a sync
/// instance is remounted or someone calls [`ConnectivityMonitor::request_retry`].
#[derive(Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl ConnectivityMonitor {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(ConnectionStatus::Connecting);
    Self { tx: Arc::new(tx) }
  }

  pub fn status(&self) -> ConnectionStatus {
    *self.tx.borrow()
  }

  /// True when the remote store is known to be unreachable.
  pub fn is_degraded(&self) -> bool {
    self.status() == ConnectionStatus::Offline
  }

  /// Register a listener. The receiver starts at the current value.
  pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
    self.tx.subscribe()
  }

  /// Update the status. Returns true if the value changed.
  pub fn set_status(&self, status: ConnectionStatus) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == status {
        false
      } else {
        *current = status;
        true
      }
    });
    if changed {
      info!(%status, "connectivity changed");
    }
    changed
  }

  pub fn mark_connected(&self) -> bool {
    self.set_status(ConnectionStatus::Connected)
  }

  /// Settle a pending attempt as connected. A monitor already marked
  /// offline stays offline until someone asks for a retry.
  pub fn confirm_connected(&self) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == ConnectionStatus::Connecting {
        *current = ConnectionStatus::Connected;
        true
      } else {
        false
      }
    });
    if changed {
      info!(status = %ConnectionStatus::Connected, "connectivity changed");
    }
    changed
  }

  pub fn mark_offline(&self, reason: &str) -> bool {
    let changed = self.set_status(ConnectionStatus::Offline);
    if changed {
      info!(reason, "remote store marked offline");
    }
    changed
  }

  /// Ask every sync instance to try the remote store again.
  pub fn request_retry(&self) -> bool {
    self.set_status(ConnectionStatus::Connecting)
  }
}

impl Default for ConnectivityMonitor {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_starts_connecting() {
    let monitor = ConnectivityMonitor::new();
    assert_eq!(monitor.status(), ConnectionStatus::Connecting);
    assert!(!monitor.is_degraded());
  }

  #[test]
  fn test_clones_share_state() {
    let monitor = ConnectivityMonitor::new();
    let other = monitor.clone();
    other.mark_offline("blocked");
    assert!(monitor.is_degraded());
  }

  #[test]
  fn test_set_status_reports_changes_only() {
    let monitor = ConnectivityMonitor::new();
    assert!(monitor.mark_connected());
    assert!(!monitor.mark_connected());
    assert!(monitor.mark_offline("network"));
    assert!(monitor.request_retry());
  }

  #[test]
  fn test_confirm_connected_only_settles_attempts() {
    let monitor = ConnectivityMonitor::new();
    assert!(monitor.confirm_connected());
    assert_eq!(monitor.status(), ConnectionStatus::Connected);

    monitor.mark_offline("network");
    assert!(!monitor.confirm_connected());
    assert!(monitor.is_degraded());

    monitor.request_retry();
    assert!(monitor.confirm_connected());
  }

  #[tokio::test]
  async fn test_listener_notified_on_change() {
    let monitor = ConnectivityMonitor::new();
    let mut rx = monitor.subscribe();

    // Same value does not wake listeners
    monitor.request_retry();
    assert!(!rx.has_changed().unwrap());

    monitor.mark_offline("network");
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Offline);
  }
}
