//! Request classification: an ordered list of predicate -> strategy rules.
//!
//! Rules are evaluated top-down and the first match wins, which removes any
//! ambiguity from overlapping URL patterns. `Bypass` means the request is
//! not intercepted at all and default handling applies.

use reqwest::Method;
use url::Url;

use crate::gateway::{FetchRequest, RequestMode};

/// Per-request caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  /// Not intercepted: cross-origin, non-GET, or build-internal asset.
  Bypass,
  /// Network-first with API-tier fallback, else a synthesized 503.
  Api,
  /// Exact cache, then network, then the document fallback chain.
  Navigation,
  /// Cache-first, then network, else a synthesized 404.
  Static,
}

/// Path prefixes and extensions owned by the bundler; normal HTTP caching
/// handles these better than the worker would.
const BUILD_ASSET_PREFIXES: [&str; 2] = ["/_next/", "/static/"];
const BUILD_ASSET_EXTENSIONS: [&str; 2] = [".css", ".js"];

/// API path prefix recognized by the interception policy.
const API_PREFIX: &str = "/api/";

pub fn classify(request: &FetchRequest, origin: &str) -> Strategy {
  let url = match Url::parse(&request.url) {
    Ok(url) => url,
    Err(_) => return Strategy::Bypass,
  };
  let origin = match Url::parse(origin) {
    Ok(origin) => origin,
    Err(_) => return Strategy::Bypass,
  };

  if url.origin() != origin.origin() {
    return Strategy::Bypass;
  }

  if request.method != Method::GET {
    return Strategy::Bypass;
  }

  let path = url.path();
  if BUILD_ASSET_PREFIXES.iter().any(|p| path.contains(p))
    || BUILD_ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
  {
    return Strategy::Bypass;
  }

  if path.starts_with(API_PREFIX) {
    return Strategy::Api;
  }

  if request.mode == RequestMode::Navigate {
    return Strategy::Navigation;
  }

  Strategy::Static
}
