//! Connectivity monitor: a shared online/offline flag with subscriptions.
//!
//! The native analog of browser online/offline events. Transitions are
//! published through a watch channel so the facade can reflect them into
//! its reactive state without polling.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[derive(Clone)]
pub struct ConnectivityMonitor {
  tx: Arc<watch::Sender<bool>>,
}

impl ConnectivityMonitor {
  pub fn new(initially_online: bool) -> Self {
    let (tx, _) = watch::channel(initially_online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|current| {
      if *current != online {
        *current = online;
        true
      } else {
        false
      }
    });

    if changed {
      info!(online, "connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn transitions_reach_subscribers() {
    let monitor = ConnectivityMonitor::new(true);
    let mut rx = monitor.subscribe();

    assert!(monitor.is_online());

    monitor.set_online(false);
    rx.changed().await.unwrap();
    assert!(!*rx.borrow());
    assert!(!monitor.is_online());
  }

  #[test]
  fn redundant_set_does_not_flap() {
    let monitor = ConnectivityMonitor::new(false);
    let rx = monitor.subscribe();

    monitor.set_online(false);
    assert!(!rx.has_changed().unwrap());
  }
}
