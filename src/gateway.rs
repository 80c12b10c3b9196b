//! Fetch gateway: bounded-time HTTP reads behind a narrow trait.
//!
//! Every remote read in the crate goes through [`HttpFetch`]. The production
//! implementation wraps `reqwest` with a fixed timeout; tests substitute
//! in-memory fakes. Callers treat all three error kinds identically.

use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Hard bound on any single network call.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level failure taxonomy. Callers never branch on the variant;
/// the distinction exists for logs only.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
  #[error("network error: {0}")]
  Network(String),
  #[error("request timed out")]
  Timeout,
  #[error("http status {status}")]
  Http { status: u16 },
}

/// How a request will be consumed, mirroring browser request modes.
/// Navigations get the document fallback chain; everything else does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
  Navigate,
  NoCors,
}

/// An outgoing request as seen by the gateway and the cache worker.
#[derive(Debug, Clone)]
pub struct FetchRequest {
  pub method: Method,
  pub url: String,
  pub mode: RequestMode,
}

impl FetchRequest {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      method: Method::GET,
      url: url.into(),
      mode: RequestMode::NoCors,
    }
  }

  pub fn navigate(url: impl Into<String>) -> Self {
    Self {
      method: Method::GET,
      url: url.into(),
      mode: RequestMode::Navigate,
    }
  }

  pub fn post(url: impl Into<String>) -> Self {
    Self {
      method: Method::POST,
      url: url.into(),
      mode: RequestMode::NoCors,
    }
  }
}

/// A complete captured response: status, content type and body. This is the
/// value stored in cache tiers, so it must round-trip losslessly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
  pub status: u16,
  pub content_type: Option<String>,
  pub body: Vec<u8>,
}

impl FetchResponse {
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Build a 200 `application/json` response from a serializable value.
  pub fn json<T: Serialize>(value: &T) -> Result<Self> {
    let body = serde_json::to_vec(value).map_err(|e| eyre!("failed to serialize body: {}", e))?;
    Ok(Self {
      status: 200,
      content_type: Some("application/json".to_string()),
      body,
    })
  }

  /// Build a synthesized `text/plain` response, used for offline fallbacks.
  pub fn plain_text(status: u16, body: &str) -> Self {
    Self {
      status,
      content_type: Some("text/plain".to_string()),
      body: body.as_bytes().to_vec(),
    }
  }

  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// The seam between request handling and the actual network.
pub trait HttpFetch: Send + Sync {
  fn fetch(
    &self,
    request: &FetchRequest,
  ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send;
}

/// Production gateway over a shared `reqwest` client. The timeout is set
/// once on the client, so every call through it carries the bound.
#[derive(Clone)]
pub struct Gateway {
  http: reqwest::Client,
}

impl Gateway {
  pub fn new() -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(FETCH_TIMEOUT)
      .build()
      .map_err(|e| eyre!("failed to build http client: {}", e))?;

    Ok(Self { http })
  }
}

impl HttpFetch for Gateway {
  fn fetch(
    &self,
    request: &FetchRequest,
  ) -> impl Future<Output = Result<FetchResponse, FetchError>> + Send {
    let builder = self.http.request(request.method.clone(), &request.url);

    async move {
      let response = builder.send().await.map_err(|e| {
        if e.is_timeout() {
          FetchError::Timeout
        } else {
          FetchError::Network(e.to_string())
        }
      })?;

      let status = response.status().as_u16();
      if !(200..300).contains(&status) {
        return Err(FetchError::Http { status });
      }

      let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

      let body = response
        .bytes()
        .await
        .map_err(|e| {
          if e.is_timeout() {
            FetchError::Timeout
          } else {
            FetchError::Network(e.to_string())
          }
        })?
        .to_vec();

      Ok(FetchResponse {
        status,
        content_type,
        body,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn synthesized_responses_carry_plain_text() {
    let resp = FetchResponse::plain_text(503, "API data not available offline");
    assert_eq!(resp.status, 503);
    assert_eq!(resp.content_type.as_deref(), Some("text/plain"));
    assert_eq!(resp.text(), "API data not available offline");
    assert!(!resp.is_ok());
  }

  #[test]
  fn json_response_is_ok() {
    let resp = FetchResponse::json(&vec![1, 2, 3]).unwrap();
    assert!(resp.is_ok());
    assert_eq!(resp.content_type.as_deref(), Some("application/json"));
    assert_eq!(resp.text(), "[1,2,3]");
  }
}
