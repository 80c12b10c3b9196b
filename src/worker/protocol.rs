//! Message protocol between the foreground and the cache worker.
//!
//! All foreground-to-worker messages are fire-and-forget: there is no reply
//! envelope and no acknowledgment wait. The single worker-to-client
//! broadcast is `ProductPageCached`.

use tokio::sync::mpsc;
use tracing::debug;

use crate::catalog::Snapshot;

/// Foreground -> worker commands.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
  /// Instruct a parked worker to activate immediately.
  SkipWaiting,
  /// Seed one synthetic JSON response per logical API endpoint from a full
  /// snapshot, so API routes are servable offline without ever having been
  /// fetched live.
  CacheApiData(Snapshot),
  /// Fetch and cache one specific document URL into the document tier.
  CacheProductPage(String),
}

/// Worker -> client broadcasts.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
  /// A document requested via `CacheProductPage` is now cached.
  ProductPageCached { url: String },
  /// A new worker version installed while an old one is active.
  UpdateFound,
}

/// Sending side of the worker channel. Messages to a gone worker are
/// silently dropped: that is a no-op, not an error condition.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl WorkerHandle {
  pub fn new(tx: mpsc::UnboundedSender<WorkerMessage>) -> Self {
    Self { tx }
  }

  /// A handle with no worker behind it. Every send is a no-op.
  pub fn disconnected() -> Self {
    let (tx, _rx) = mpsc::unbounded_channel();
    Self { tx }
  }

  pub fn send(&self, message: WorkerMessage) {
    if self.tx.send(message).is_err() {
      debug!("no active worker, message dropped");
    }
  }
}

/// URL shapes of the logical API endpoints. The seeding path and the
/// network-first interception path must agree on these, so both build them
/// here.
pub mod api_routes {
  use url::form_urlencoded;

  pub fn banners(origin: &str) -> String {
    format!("{}/api/banners", origin.trim_end_matches('/'))
  }

  pub fn categories(origin: &str) -> String {
    format!("{}/api/categories", origin.trim_end_matches('/'))
  }

  pub fn products_by_category(origin: &str, category: &str) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
      .append_pair("category", category)
      .finish();
    format!("{}/api/products?{}", origin.trim_end_matches('/'), query)
  }

  // Note: the shell route is `/portofolio` but the API route is spelled
  // `/api/portfolios`.
  pub fn portfolios(origin: &str) -> String {
    format!("{}/api/portfolios", origin.trim_end_matches('/'))
  }
}
