//! Offline data facade: the single integration point the UI consumes.
//!
//! Holds a read-only projection of the persisted snapshot plus ephemeral
//! sync status, published through a watch channel. The facade is a reader
//! of the snapshot store; the sync coordinator is its only writer.

use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, warn};

use crate::catalog::{CatalogSource, Snapshot};
use crate::net::ConnectivityMonitor;
use crate::store::SnapshotStore;
use crate::sync::SyncCoordinator;
use crate::worker::protocol::{WorkerEvent, WorkerHandle, WorkerMessage};

/// Reactive state exposed to the UI. Recomputed on every relevant network,
/// sync or worker event; never persisted.
#[derive(Debug, Clone, Default)]
pub struct OfflineState {
  pub data: Option<Snapshot>,
  pub is_loading: bool,
  pub is_syncing: bool,
  pub error: Option<String>,
  pub is_online: bool,
  pub last_synced: Option<i64>,
  pub update_available: bool,
}

pub struct OfflineCatalog<C: CatalogSource, S: SnapshotStore> {
  coordinator: SyncCoordinator<C, S>,
  store: Arc<S>,
  worker: WorkerHandle,
  state: watch::Sender<OfflineState>,
}

impl<C, S> OfflineCatalog<C, S>
where
  C: CatalogSource + 'static,
  S: SnapshotStore + 'static,
{
  /// Build the facade: load the persisted snapshot (corruption reads as
  /// absence), wire up connectivity and worker-event listeners, and - when
  /// no snapshot exists and the device is online - trigger exactly one
  /// automatic sync.
  pub fn new(
    source: C,
    store: Arc<S>,
    connectivity: ConnectivityMonitor,
    worker: WorkerHandle,
    events: broadcast::Receiver<WorkerEvent>,
  ) -> Arc<Self> {
    let (data, load_error) = match store.load() {
      Ok(data) => (data, None),
      Err(e) => {
        error!("failed to load offline data: {}", e);
        (None, Some("Failed to load offline data".to_string()))
      }
    };

    let initial = OfflineState {
      last_synced: data.as_ref().map(|s| s.last_synced),
      data,
      is_loading: false,
      is_syncing: false,
      error: load_error,
      is_online: connectivity.is_online(),
      update_available: false,
    };
    let should_autosync = initial.data.is_none() && initial.is_online;
    let (state, _) = watch::channel(initial);

    let facade = Arc::new(Self {
      coordinator: SyncCoordinator::new(source, store.clone(), connectivity.clone(), worker.clone()),
      store,
      worker,
      state,
    });

    facade.clone().spawn_connectivity_listener(connectivity);
    facade.clone().spawn_event_listener(events);

    if should_autosync {
      let facade = facade.clone();
      tokio::spawn(async move {
        facade.sync_data().await;
      });
    }

    facade
  }

  fn spawn_connectivity_listener(self: Arc<Self>, connectivity: ConnectivityMonitor) {
    let mut rx = connectivity.subscribe();
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        self.state.send_modify(|state| state.is_online = online);
      }
    });
  }

  fn spawn_event_listener(self: Arc<Self>, mut events: broadcast::Receiver<WorkerEvent>) {
    tokio::spawn(async move {
      loop {
        match events.recv().await {
          Ok(WorkerEvent::UpdateFound) => {
            self.state.send_modify(|state| state.update_available = true);
          }
          Ok(WorkerEvent::ProductPageCached { url }) => {
            debug!(%url, "product page cached");
          }
          Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "worker event stream lagged");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    });
  }

  /// Current state snapshot.
  pub fn state(&self) -> OfflineState {
    self.state.borrow().clone()
  }

  /// Subscribe to state changes.
  pub fn subscribe(&self) -> watch::Receiver<OfflineState> {
    self.state.subscribe()
  }

  /// Run a sync cycle and reflect the outcome into state. Returns `true`
  /// on success. Failures surface as a human-readable error string; the
  /// previously persisted snapshot is never discarded.
  pub async fn sync_data(&self) -> bool {
    self.state.send_modify(|state| {
      state.is_syncing = true;
      state.error = None;
    });

    let outcome = self.coordinator.sync().await;

    match outcome {
      Ok(true) => {
        let data = self.store.load().unwrap_or_default();
        self.state.send_modify(|state| {
          state.last_synced = data.as_ref().map(|s| s.last_synced);
          state.data = data;
          state.is_syncing = false;
        });
        true
      }
      Ok(false) => {
        // Another cycle is in flight. It set `is_syncing` and will clear
        // it when it completes, so leave the flag alone here.
        false
      }
      Err(e) => {
        self.state.send_modify(|state| {
          state.error = Some(e.to_string());
          state.is_syncing = false;
        });
        false
      }
    }
  }

  /// Send the parked worker its skip-waiting signal and reload state from
  /// the store - the native analog of the full page reload a web client
  /// performs here.
  pub fn apply_update(&self) {
    self.worker.send(WorkerMessage::SkipWaiting);

    let data = self.store.load().unwrap_or_default();
    self.state.send_modify(|state| {
      state.last_synced = data.as_ref().map(|s| s.last_synced);
      state.data = data;
      state.update_available = false;
      state.error = None;
    });
  }

  /// Ask the worker to cache one product detail page for offline use.
  pub fn cache_product_page(&self, url: impl Into<String>) {
    self.worker.send(WorkerMessage::CacheProductPage(url.into()));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::catalog::{Banner, Category, PortfolioItem, Product};
  use crate::store::MemorySnapshotStore;
  use crate::sync::OFFLINE_ERROR;
  use std::collections::BTreeMap;
  use std::future::Future;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;
  use tokio::sync::mpsc;

  struct FakeSource {
    fetches: AtomicUsize,
    delay_ms: u64,
  }

  impl FakeSource {
    fn new() -> Arc<Self> {
      Self::slow(0)
    }

    fn slow(delay_ms: u64) -> Arc<Self> {
      Arc::new(Self {
        fetches: AtomicUsize::new(0),
        delay_ms,
      })
    }
  }

  impl CatalogSource for Arc<FakeSource> {
    fn banners(&self) -> impl Future<Output = Vec<Banner>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      async { Vec::new() }
    }

    fn categories(&self) -> impl Future<Output = Vec<Category>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      let delay = self.delay_ms;
      async move {
        if delay > 0 {
          tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        vec![Category {
          id: 1,
          name: "RUG".to_string(),
          image_url: String::new(),
        }]
      }
    }

    fn products_by_category(&self, name: &str) -> impl Future<Output = Vec<Product>> + Send {
      self.fetches.fetch_add(1, Ordering::SeqCst);
      let name = name.to_string();
      async move {
        vec![Product {
          id: 1,
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

  fn stored_snapshot() -> Snapshot {
    Snapshot {
      banners: Vec::new(),
      categories: Vec::new(),
      portfolios: Vec::new(),
      products: BTreeMap::new(),
      last_synced: 1_000,
    }
  }

  async fn wait_until<F: Fn(&OfflineState) -> bool>(
    rx: &mut watch::Receiver<OfflineState>,
    predicate: F,
  ) {
    tokio::time::timeout(Duration::from_secs(1), async {
      loop {
        if predicate(&rx.borrow()) {
          return;
        }
        rx.changed().await.unwrap();
      }
    })
    .await
    .expect("state never reached expected shape");
  }

  #[tokio::test]
  async fn cold_start_online_triggers_one_sync() {
    let store = Arc::new(MemorySnapshotStore::new());
    let before = chrono::Utc::now().timestamp_millis();
    let facade = OfflineCatalog::new(
      FakeSource::new(),
      store,
      ConnectivityMonitor::new(true),
      WorkerHandle::disconnected(),
      broadcast::channel(16).0.subscribe(),
    );

    let mut rx = facade.subscribe();
    wait_until(&mut rx, |state| state.data.is_some()).await;

    let state = facade.state();
    let data = state.data.unwrap();
    assert!(!data.categories.is_empty());
    assert!(state.last_synced.unwrap() >= before);
    assert!(state.error.is_none());
  }

  #[tokio::test]
  async fn cold_start_offline_sets_error_without_fetching() {
    let source = FakeSource::new();
    let store = Arc::new(MemorySnapshotStore::new());
    let facade = OfflineCatalog::new(
      source.clone(),
      store,
      ConnectivityMonitor::new(false),
      WorkerHandle::disconnected(),
      broadcast::channel(16).0.subscribe(),
    );

    // No auto-sync while offline; a manual request surfaces the error.
    assert!(!facade.sync_data().await);

    let state = facade.state();
    assert!(state.data.is_none());
    assert_eq!(state.error.as_deref(), Some(OFFLINE_ERROR));
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn existing_snapshot_skips_auto_sync() {
    let source = FakeSource::new();
    let store = Arc::new(MemorySnapshotStore::new());
    store.save(&stored_snapshot()).unwrap();

    let facade = OfflineCatalog::new(
      source.clone(),
      store,
      ConnectivityMonitor::new(true),
      WorkerHandle::disconnected(),
      broadcast::channel(16).0.subscribe(),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    assert_eq!(facade.state().last_synced, Some(1_000));
  }

  #[tokio::test]
  async fn connectivity_transitions_reach_state() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.save(&stored_snapshot()).unwrap();
    let connectivity = ConnectivityMonitor::new(true);

    let facade = OfflineCatalog::new(
      FakeSource::new(),
      store,
      connectivity.clone(),
      WorkerHandle::disconnected(),
      broadcast::channel(16).0.subscribe(),
    );

    let mut rx = facade.subscribe();
    connectivity.set_online(false);
    wait_until(&mut rx, |state| !state.is_online).await;
  }

  #[tokio::test]
  async fn update_found_sets_flag_and_apply_update_clears_it() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.save(&stored_snapshot()).unwrap();
    let (events_tx, _) = broadcast::channel(16);
    let (worker_tx, mut worker_rx) = mpsc::unbounded_channel();

    let facade = OfflineCatalog::new(
      FakeSource::new(),
      store,
      ConnectivityMonitor::new(true),
      WorkerHandle::new(worker_tx),
      events_tx.subscribe(),
    );

    let mut rx = facade.subscribe();
    events_tx.send(WorkerEvent::UpdateFound).unwrap();
    wait_until(&mut rx, |state| state.update_available).await;

    facade.apply_update();
    assert!(!facade.state().update_available);
    assert!(matches!(
      worker_rx.try_recv().unwrap(),
      WorkerMessage::SkipWaiting
    ));
  }

  #[tokio::test]
  async fn contended_sync_keeps_is_syncing_until_owner_finishes() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.save(&stored_snapshot()).unwrap();

    let facade = OfflineCatalog::new(
      FakeSource::slow(100),
      store,
      ConnectivityMonitor::new(true),
      WorkerHandle::disconnected(),
      broadcast::channel(16).0.subscribe(),
    );

    let owner = tokio::spawn({
      let facade = facade.clone();
      async move { facade.sync_data().await }
    });
    // Give the owning cycle time to take the single-flight lock.
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!facade.sync_data().await);
    // The owning cycle is still mid-fetch; the published state must keep
    // reporting it.
    assert!(facade.state().is_syncing);

    assert!(owner.await.unwrap());
    assert!(!facade.state().is_syncing);
  }

  #[tokio::test]
  async fn sync_failure_keeps_previous_snapshot() {
    let store = Arc::new(MemorySnapshotStore::new());
    store.save(&stored_snapshot()).unwrap();
    let connectivity = ConnectivityMonitor::new(true);

    let facade = OfflineCatalog::new(
      FakeSource::new(),
      store,
      connectivity.clone(),
      WorkerHandle::disconnected(),
      broadcast::channel(16).0.subscribe(),
    );

    connectivity.set_online(false);
    assert!(!facade.sync_data().await);

    let state = facade.state();
    assert!(state.error.is_some());
    // The previously persisted snapshot is still there.
    assert_eq!(state.data.unwrap().last_synced, 1_000);
  }
}
