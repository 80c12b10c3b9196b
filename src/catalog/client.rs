//! Catalog client: typed reads against the CMS, degrading to empty results.
//!
//! Transport failures never cross this boundary. Each read logs the error
//! and resolves to an empty collection (or `None` for single lookups), so
//! the sync coordinator and the UI never branch on network error kinds.

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::warn;
use url::form_urlencoded;

use crate::gateway::{FetchRequest, HttpFetch};

use super::api_types::{
  RawBannerResponse, RawCategoryResponse, RawPortfolioResponse, RawProductResponse,
};
use super::types::{Banner, Category, PortfolioItem, Product};

/// Read operations the sync coordinator depends on. Every operation
/// degrades to an empty collection on failure.
pub trait CatalogSource: Send + Sync {
  fn banners(&self) -> impl Future<Output = Vec<Banner>> + Send;

  fn categories(&self) -> impl Future<Output = Vec<Category>> + Send;

  /// Server-side filter by category *name* equality - the join key between
  /// categories and products.
  fn products_by_category(&self, name: &str) -> impl Future<Output = Vec<Product>> + Send;

  fn portfolio_projects(&self) -> impl Future<Output = Vec<PortfolioItem>> + Send;
}

/// CMS client over the fetch gateway.
#[derive(Clone)]
pub struct CatalogClient<F: HttpFetch> {
  fetch: F,
  base_url: String,
}

impl<F: HttpFetch> CatalogClient<F> {
  pub fn new(fetch: F, base_url: impl Into<String>) -> Self {
    Self {
      fetch,
      base_url: base_url.into(),
    }
  }

  fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> String {
    let query: String = form_urlencoded::Serializer::new(String::new())
      .extend_pairs(params)
      .finish();
    format!("{}{}?{}", self.base_url.trim_end_matches('/'), path, query)
  }

  async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T> {
    let response = self
      .fetch
      .fetch(&FetchRequest::get(url))
      .await
      .map_err(|e| eyre!("fetch failed: {}", e))?;

    serde_json::from_slice(&response.body).map_err(|e| eyre!("failed to parse response: {}", e))
  }

  /// Look up one product by id. Returns `None` when the product does not
  /// exist or the network is unavailable.
  pub async fn product_by_id(&self, id: i64) -> Option<Product> {
    let id = id.to_string();
    let url = self.endpoint(
      "/api/products",
      &[("filters[id][$eq]", id.as_str()), ("populate", "*")],
    );

    match self.get_json::<RawProductResponse>(url).await {
      Ok(raw) => raw
        .data
        .into_iter()
        .next()
        .map(|p| p.into_product(&self.base_url)),
      Err(e) => {
        warn!(product_id = %id, "failed to fetch product: {}", e);
        None
      }
    }
  }
}

impl<F: HttpFetch> CatalogSource for CatalogClient<F> {
  fn banners(&self) -> impl Future<Output = Vec<Banner>> + Send {
    async move {
      let url = self.endpoint("/api/hero-banner-kategoris", &[("populate", "*")]);
      match self.get_json::<RawBannerResponse>(url).await {
        Ok(raw) => raw.into_banners(&self.base_url),
        Err(e) => {
          warn!("failed to fetch banners: {}", e);
          Vec::new()
        }
      }
    }
  }

  fn categories(&self) -> impl Future<Output = Vec<Category>> + Send {
    async move {
      let url = self.endpoint("/api/categories", &[("populate", "*")]);
      match self.get_json::<RawCategoryResponse>(url).await {
        Ok(raw) => raw.into_categories(&self.base_url),
        Err(e) => {
          warn!("failed to fetch categories: {}", e);
          Vec::new()
        }
      }
    }
  }

  fn products_by_category(&self, name: &str) -> impl Future<Output = Vec<Product>> + Send {
    let url = self.endpoint(
      "/api/products",
      &[("populate", "*"), ("filters[categories][name][$eq]", name)],
    );
    let name = name.to_string();

    async move {
      match self.get_json::<RawProductResponse>(url).await {
        Ok(raw) => raw
          .data
          .into_iter()
          .map(|p| p.into_product(&self.base_url))
          .collect(),
        Err(e) => {
          warn!(category = %name, "failed to fetch products: {}", e);
          Vec::new()
        }
      }
    }
  }

  fn portfolio_projects(&self) -> impl Future<Output = Vec<PortfolioItem>> + Send {
    async move {
      let url = self.endpoint("/api/portofolios", &[("populate", "*")]);
      match self.get_json::<RawPortfolioResponse>(url).await {
        Ok(raw) => raw
          .data
          .into_iter()
          .map(|p| p.into_item(&self.base_url))
          .collect(),
        Err(e) => {
          warn!("failed to fetch portfolio projects: {}", e);
          Vec::new()
        }
      }
    }
  }
}
