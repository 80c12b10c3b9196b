//! Background cache worker: request interception, cache tiers, lifecycle.
//!
//! The worker runs in its own task and coordinates with the foreground only
//! through fire-and-forget messages. Its lifecycle is an explicit state
//! machine (`Installing -> Waiting -> Active`), orthogonal to the
//! per-request decision procedure in [`routes`].

pub mod cache;
pub mod protocol;
pub mod routes;

use color_eyre::{eyre::eyre, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::catalog::Snapshot;
use crate::gateway::{FetchRequest, FetchResponse, HttpFetch};

use cache::{ResponseCacheStorage, API_TIER, DOCUMENT_TIER, RECOGNIZED_TIERS, STATIC_TIER};
use protocol::{api_routes, WorkerEvent, WorkerHandle, WorkerMessage};
use routes::{classify, Strategy};

/// Shell routes and assets precached during install. Install is
/// all-or-nothing over this manifest: a partially cached shell is worse
/// than retrying the install.
pub const SHELL_MANIFEST: [&str; 9] = [
  "/",
  "/products",
  "/portofolio",
  "/offline",
  "/icons/logo.png",
  "/icons/icon-192x192.png",
  "/icons/icon-512x512.png",
  "/placeholder-image.jpg",
  "/manifest.json",
];

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed but parked; an explicit skip-waiting signal promotes it.
  Waiting,
  Active,
  /// Replaced by a newer version.
  Redundant,
}

pub struct CacheWorker<F: HttpFetch, S: ResponseCacheStorage> {
  fetch: F,
  storage: S,
  origin: String,
  state: Mutex<WorkerState>,
  events: broadcast::Sender<WorkerEvent>,
}

impl<F: HttpFetch, S: ResponseCacheStorage> CacheWorker<F, S> {
  pub fn new(
    fetch: F,
    storage: S,
    origin: impl Into<String>,
    events: broadcast::Sender<WorkerEvent>,
  ) -> Self {
    Self {
      fetch,
      storage,
      origin: origin.into().trim_end_matches('/').to_string(),
      state: Mutex::new(WorkerState::Installing),
      events,
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().expect("worker state lock poisoned")
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().expect("worker state lock poisoned") = state;
  }

  fn absolute(&self, path: &str) -> String {
    format!("{}{}", self.origin, path)
  }

  /// Shell routes precache into the document tier; manifest entries with a
  /// file extension are assets and belong in the static tier.
  fn manifest_tier(path: &str) -> &'static str {
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    if last_segment.contains('.') {
      STATIC_TIER
    } else {
      DOCUMENT_TIER
    }
  }

  /// Precache the shell manifest. Every entry must fetch successfully; the
  /// staged batch is then written in one transaction. On any failure the
  /// worker stays in `Installing` and nothing is cached.
  pub async fn install(&self) -> Result<()> {
    self.set_state(WorkerState::Installing);

    let mut staged = Vec::with_capacity(SHELL_MANIFEST.len());
    for path in SHELL_MANIFEST {
      let url = self.absolute(path);
      match self.fetch.fetch(&FetchRequest::get(&url)).await {
        Ok(response) if response.is_ok() => {
          staged.push((Self::manifest_tier(path).to_string(), url, response));
        }
        Ok(response) => {
          return Err(eyre!(
            "install failed: {} returned status {}",
            url,
            response.status
          ));
        }
        Err(e) => {
          return Err(eyre!("install failed: {}: {}", url, e));
        }
      }
    }

    self.storage.put_many(&staged)?;
    self.set_state(WorkerState::Waiting);
    info!(entries = staged.len(), "worker installed, shell precached");
    Ok(())
  }

  /// Garbage-collect cache tiers from prior versions, then take control.
  pub fn activate(&self) -> Result<()> {
    self.storage.delete_tiers_except(&RECOGNIZED_TIERS)?;
    self.set_state(WorkerState::Active);
    info!("worker activated");
    Ok(())
  }

  fn retire(&self) {
    self.set_state(WorkerState::Redundant);
  }

  /// Intercept one request. `None` means the request is not intercepted
  /// and default handling applies.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<Option<FetchResponse>> {
    let response = match classify(request, &self.origin) {
      Strategy::Bypass => return Ok(None),
      Strategy::Api => self.handle_api(request).await?,
      Strategy::Navigation => self.handle_navigation(request).await?,
      Strategy::Static => self.handle_static(request).await?,
    };
    Ok(Some(response))
  }

  /// Network-first: cache a clone on success, fall back to the API tier,
  /// else synthesize a 503.
  async fn handle_api(&self, request: &FetchRequest) -> Result<FetchResponse> {
    match self.fetch.fetch(request).await {
      Ok(response) if response.is_ok() => {
        self.storage.put(API_TIER, &request.url, &response)?;
        return Ok(response);
      }
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "api request not ok");
      }
      Err(e) => {
        debug!(url = %request.url, "network failed for api request: {}", e);
      }
    }

    if let Some(cached) = self.storage.get(API_TIER, &request.url)? {
      return Ok(cached);
    }

    Ok(FetchResponse::plain_text(503, "API data not available offline"))
  }

  /// Cache-first-exact, then network, then the heuristic fallback chain:
  /// product detail routes degrade to the cached product listing, then the
  /// dedicated offline page, then the cached home document.
  async fn handle_navigation(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if let Some(cached) = self.storage.get(DOCUMENT_TIER, &request.url)? {
      return Ok(cached);
    }

    match self.fetch.fetch(request).await {
      Ok(response) if response.is_ok() => {
        self.storage.put(DOCUMENT_TIER, &request.url, &response)?;
        return Ok(response);
      }
      Ok(_) | Err(_) => {
        debug!(url = %request.url, "network failed for navigation request");
      }
    }

    if request.url.contains("/product/") {
      if let Some(listing) = self.storage.get(DOCUMENT_TIER, &self.absolute("/products"))? {
        return Ok(listing);
      }
    }

    if let Some(offline) = self.storage.get(DOCUMENT_TIER, &self.absolute("/offline"))? {
      return Ok(offline);
    }

    if let Some(home) = self.storage.get(DOCUMENT_TIER, &self.absolute("/"))? {
      return Ok(home);
    }

    Ok(FetchResponse::plain_text(404, "Resource not available offline"))
  }

  /// Cache-first for everything else, caching network successes.
  async fn handle_static(&self, request: &FetchRequest) -> Result<FetchResponse> {
    if let Some(cached) = self.storage.get(STATIC_TIER, &request.url)? {
      return Ok(cached);
    }

    match self.fetch.fetch(request).await {
      Ok(response) if response.is_ok() => {
        self.storage.put(STATIC_TIER, &request.url, &response)?;
        return Ok(response);
      }
      Ok(_) | Err(_) => {
        debug!(url = %request.url, "network failed for static request");
      }
    }

    Ok(FetchResponse::plain_text(404, "Resource not available offline"))
  }

  /// Seed one synthetic JSON response per logical API endpoint from a full
  /// snapshot. Each entry write is independently atomic.
  pub fn cache_api_data(&self, snapshot: &Snapshot) -> Result<()> {
    self.storage.put(
      API_TIER,
      &api_routes::banners(&self.origin),
      &FetchResponse::json(&snapshot.banners)?,
    )?;
    self.storage.put(
      API_TIER,
      &api_routes::categories(&self.origin),
      &FetchResponse::json(&snapshot.categories)?,
    )?;
    for (category, products) in &snapshot.products {
      self.storage.put(
        API_TIER,
        &api_routes::products_by_category(&self.origin, category),
        &FetchResponse::json(products)?,
      )?;
    }
    self.storage.put(
      API_TIER,
      &api_routes::portfolios(&self.origin),
      &FetchResponse::json(&snapshot.portfolios)?,
    )?;

    info!(
      categories = snapshot.products.len(),
      "api cache seeded from snapshot"
    );
    Ok(())
  }

  /// Fetch and cache one specific document URL, broadcasting
  /// `ProductPageCached` on success.
  pub async fn cache_product_page(&self, url: &str) -> Result<()> {
    match self.fetch.fetch(&FetchRequest::get(url)).await {
      Ok(response) if response.is_ok() => {
        self.storage.put(DOCUMENT_TIER, url, &response)?;
        let _ = self.events.send(WorkerEvent::ProductPageCached {
          url: url.to_string(),
        });
        info!(%url, "product page cached");
      }
      Ok(response) => {
        warn!(%url, status = response.status, "failed to cache product page");
      }
      Err(e) => {
        warn!(%url, "failed to cache product page: {}", e);
      }
    }
    Ok(())
  }
}

/// Tracks the installed worker versions: at most one active and one parked
/// waiting. Installing a new version while one is active parks it and
/// broadcasts `UpdateFound`; promotion is explicit via `SkipWaiting`.
pub struct Registration<F: HttpFetch, S: ResponseCacheStorage> {
  active: Option<Arc<CacheWorker<F, S>>>,
  waiting: Option<Arc<CacheWorker<F, S>>>,
  events: broadcast::Sender<WorkerEvent>,
}

impl<F: HttpFetch, S: ResponseCacheStorage> Default for Registration<F, S> {
  fn default() -> Self {
    Self::new()
  }
}

impl<F: HttpFetch, S: ResponseCacheStorage> Registration<F, S> {
  pub fn new() -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      active: None,
      waiting: None,
      events,
    }
  }

  /// Sender handed to workers so their broadcasts reach every subscriber
  /// of this registration.
  pub fn events_sender(&self) -> broadcast::Sender<WorkerEvent> {
    self.events.clone()
  }

  pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
    self.events.subscribe()
  }

  pub fn active(&self) -> Option<&Arc<CacheWorker<F, S>>> {
    self.active.as_ref()
  }

  pub fn waiting(&self) -> Option<&Arc<CacheWorker<F, S>>> {
    self.waiting.as_ref()
  }

  /// Install a worker version. The first version activates immediately;
  /// a version installed while another is active parks in `Waiting`.
  pub async fn register(&mut self, worker: CacheWorker<F, S>) -> Result<()> {
    worker.install().await?;
    let worker = Arc::new(worker);

    if self.active.is_some() {
      self.waiting = Some(worker);
      let _ = self.events.send(WorkerEvent::UpdateFound);
      info!("new worker version parked in waiting");
    } else {
      worker.activate()?;
      self.active = Some(worker);
    }

    Ok(())
  }

  /// Promote the waiting worker, retiring the previously active one.
  pub fn skip_waiting(&mut self) -> Result<()> {
    if let Some(next) = self.waiting.take() {
      if let Some(old) = self.active.take() {
        old.retire();
      }
      next.activate()?;
      self.active = Some(next);
    }
    Ok(())
  }

  /// Delegate interception to the active worker; with no active worker the
  /// request passes through untouched.
  pub async fn handle_fetch(&self, request: &FetchRequest) -> Result<Option<FetchResponse>> {
    match &self.active {
      Some(worker) => worker.handle_fetch(request).await,
      None => Ok(None),
    }
  }

  pub async fn handle_message(&mut self, message: WorkerMessage) {
    match message {
      WorkerMessage::SkipWaiting => {
        if let Err(e) = self.skip_waiting() {
          error!("skip-waiting failed: {}", e);
        }
      }
      WorkerMessage::CacheApiData(snapshot) => {
        if let Some(worker) = &self.active {
          if let Err(e) = worker.cache_api_data(&snapshot) {
            error!("failed to seed api cache: {}", e);
          }
        }
      }
      WorkerMessage::CacheProductPage(url) => {
        if let Some(worker) = &self.active {
          if let Err(e) = worker.cache_product_page(&url).await {
            error!("failed to cache product page: {}", e);
          }
        }
      }
    }
  }
}

impl<F, S> Registration<F, S>
where
  F: HttpFetch + 'static,
  S: ResponseCacheStorage + 'static,
{
  /// Move the registration into its own task, returning the foreground's
  /// fire-and-forget handle and an event subscription.
  pub fn spawn(self) -> (WorkerHandle, broadcast::Receiver<WorkerEvent>) {
    let events = self.events.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let mut registration = self;
      while let Some(message) = rx.recv().await {
        registration.handle_message(message).await;
      }
    });

    (WorkerHandle::new(tx), events)
  }
}
