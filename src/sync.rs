//! Sync coordinator: one full-catalog refresh cycle.
//!
//! A cycle fetches everything, assembles one snapshot, persists it
//! atomically and notifies the cache worker. Only one cycle may be in
//! flight at a time; a request arriving while one runs is a no-op.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::catalog::{CatalogSource, Snapshot};
use crate::net::ConnectivityMonitor;
use crate::store::SnapshotStore;
use crate::worker::protocol::{WorkerHandle, WorkerMessage};

/// Error surfaced when a sync is requested while disconnected.
pub const OFFLINE_ERROR: &str = "You are offline. Cannot sync data.";

pub struct SyncCoordinator<C: CatalogSource, S: SnapshotStore> {
  source: C,
  store: Arc<S>,
  connectivity: ConnectivityMonitor,
  worker: WorkerHandle,
  in_flight: Mutex<()>,
}

impl<C: CatalogSource, S: SnapshotStore> SyncCoordinator<C, S> {
  pub fn new(
    source: C,
    store: Arc<S>,
    connectivity: ConnectivityMonitor,
    worker: WorkerHandle,
  ) -> Self {
    Self {
      source,
      store,
      connectivity,
      worker,
      in_flight: Mutex::new(()),
    }
  }

  /// Run one sync cycle. Returns `Ok(true)` on success and `Ok(false)` when
  /// another cycle is already in flight (nothing was fetched or written).
  ///
  /// Connectivity is checked at entry only; the network may drop mid-cycle,
  /// in which case the individual fetches degrade to empty collections.
  pub async fn sync(&self) -> Result<bool> {
    if !self.connectivity.is_online() {
      return Err(eyre!(OFFLINE_ERROR));
    }

    let _guard = match self.in_flight.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!("sync already in flight, skipping");
        return Ok(false);
      }
    };

    info!("starting catalog sync");

    let (banners, categories, portfolios) = futures::join!(
      self.source.banners(),
      self.source.categories(),
      self.source.portfolio_projects()
    );

    // Products fan out per category, joined by category *name*. A failed
    // category resolves to an empty list without failing the cycle.
    let mut products = BTreeMap::new();
    for category in &categories {
      let list = self.source.products_by_category(&category.name).await;
      products.insert(category.name.clone(), list);
    }

    let snapshot = Snapshot {
      banners,
      categories,
      portfolios,
      products,
      last_synced: Utc::now().timestamp_millis(),
    };

    self.store.save(&snapshot)?;

    info!(
      categories = snapshot.categories.len(),
      products = snapshot.product_count(),
      "catalog sync complete"
    );

    // Fire-and-forget: the worker seeds its API cache from the snapshot.
    // A gone worker is a no-op, not an error.
    self.worker.send(WorkerMessage::CacheApiData(snapshot));

    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{Banner, Category, PortfolioItem, Product};
  use crate::store::MemorySnapshotStore;
  use std::future::Future;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use tokio::sync::mpsc;

  /// Catalog source with canned data, a request counter, and an optional
  /// category whose product fetch "fails" (degrades to empty).
  struct FakeSource {
    fetches: AtomicUsize,
    failing_category: Option<String>,
    delay_ms: u64,
  }

  impl FakeSource {
    fn new() -> Self {
      Self {
        fetches: AtomicUsize::new(0),
        failing_category: None,
        delay_ms: 0,
      }
    }

    fn fetch_count(&self) -> usize {
      self.fetches.load(Ordering::SeqCst)
    }
  }

  impl CatalogSource for Arc<FakeSource> {
    fn banners(&self) -> impl Future<Output = Vec<Banner>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      async {
        vec![Banner {
          id: 1,
          image_url: "/uploads/banner.jpg".to_string(),
        }]
      }
    }

    fn categories(&self) -> impl Future<Output = Vec<Category>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      let delay = self.delay_ms;
      async move {
        if delay > 0 {
          tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }
        vec![
          Category {
            id: 1,
            name: "RUG".to_string(),
            image_url: String::new(),
          },
          Category {
            id: 2,
            name: "CARPET TILE".to_string(),
            image_url: String::new(),
          },
        ]
      }
    }

    fn products_by_category(&self, name: &str) -> impl Future<Output = Vec<Product>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      let failed = self.failing_category.as_deref() == Some(name);
      let name = name.to_string();
      async move {
        if failed {
          return Vec::new();
        }
        vec![Product {
          id: 10,
          name: format!("{} product", name),
          description: None,
          images: Vec::new(),
          categories: Vec::new(),
          is_best_seller: false,
        }]
      }
    }

    fn portfolio_projects(&self) -> impl Future<Output = Vec<PortfolioItem>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      async { Vec::new() }
    }
  }

  fn coordinator(
    source: Arc<FakeSource>,
    store: Arc<MemorySnapshotStore>,
    online: bool,
  ) -> (
    SyncCoordinator<Arc<FakeSource>, MemorySnapshotStore>,
    mpsc::UnboundedReceiver<WorkerMessage>,
  ) {
    let (tx, rx) = mpsc::unbounded_channel();
    let coordinator = SyncCoordinator::new(
      source,
      store,
      ConnectivityMonitor::new(online),
      WorkerHandle::new(tx),
    );
    (coordinator, rx)
  }

  #[tokio::test]
  async fn sync_persists_complete_snapshot() {
    let source = Arc::new(FakeSource::new());
    let store = Arc::new(MemorySnapshotStore::new());
    let (coordinator, _rx) = coordinator(source, store.clone(), true);

    let before = Utc::now().timestamp_millis();
    assert!(coordinator.sync().await.unwrap());

    let snapshot = store.load().unwrap().unwrap();
    assert_eq!(snapshot.categories.len(), 2);
    assert_eq!(snapshot.products.len(), 2);
    assert_eq!(snapshot.products["RUG"].len(), 1);
    assert!(snapshot.last_synced >= before);
  }

  #[tokio::test]
  async fn offline_sync_fails_fast_without_fetching() {
    let source = Arc::new(FakeSource::new());
    let store = Arc::new(MemorySnapshotStore::new());
    let (coordinator, _rx) = coordinator(source.clone(), store.clone(), false);

    let err = coordinator.sync().await.unwrap_err();
    assert_eq!(err.to_string(), OFFLINE_ERROR);
    assert_eq!(source.fetch_count(), 0);
    assert!(store.load().unwrap().is_none());
  }

  #[tokio::test]
  async fn failed_category_yields_empty_list_not_failed_cycle() {
    let source = Arc::new(FakeSource {
      failing_category: Some("CARPET TILE".to_string()),
      ..FakeSource::new()
    });
    let store = Arc::new(MemorySnapshotStore::new());
    let (coordinator, _rx) = coordinator(source, store.clone(), true);

    assert!(coordinator.sync().await.unwrap());

    let snapshot = store.load().unwrap().unwrap();
    assert!(snapshot.products["CARPET TILE"].is_empty());
    assert_eq!(snapshot.products["RUG"].len(), 1);
  }

  #[tokio::test]
  async fn worker_is_notified_after_persist() {
    let source = Arc::new(FakeSource::new());
    let store = Arc::new(MemorySnapshotStore::new());
    let (coordinator, mut rx) = coordinator(source, store.clone(), true);

    coordinator.sync().await.unwrap();

    match rx.try_recv().unwrap() {
      WorkerMessage::CacheApiData(snapshot) => {
        assert_eq!(snapshot, store.load().unwrap().unwrap());
      }
      other => panic!("unexpected message: {:?}", other),
    }
  }

  #[tokio::test]
  async fn concurrent_sync_is_single_flight() {
    let source = Arc::new(FakeSource {
      delay_ms: 50,
      ..FakeSource::new()
    });
    let store = Arc::new(MemorySnapshotStore::new());
    let (coordinator, _rx) = coordinator(source, store.clone(), true);
    let coordinator = Arc::new(coordinator);

    let first = tokio::spawn({
      let coordinator = coordinator.clone();
      async move { coordinator.sync().await.unwrap() }
    });
    // Give the first cycle time to take the lock.
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = coordinator.sync().await.unwrap();

    assert!(!second);
    assert!(first.await.unwrap());
    // Exactly one snapshot was persisted, from one fetch set.
    assert!(store.load().unwrap().is_some());
  }

  #[tokio::test]
  async fn dropped_worker_channel_is_a_noop() {
    let source = Arc::new(FakeSource::new());
    let store = Arc::new(MemorySnapshotStore::new());
    let coordinator = SyncCoordinator::new(
      source,
      store.clone(),
      ConnectivityMonitor::new(true),
      WorkerHandle::disconnected(),
    );

    assert!(coordinator.sync().await.unwrap());
    assert!(store.load().unwrap().is_some());
  }
}
