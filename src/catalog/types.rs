use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A hero banner image shown on the storefront home page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Banner {
  pub id: i64,
  pub image_url: String,
}

/// A product category, e.g. "RUG" or "CARPET TILE".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
  pub id: i64,
  pub name: String,
  pub image_url: String,
}

/// An image attached to a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiImage {
  pub id: i64,
  pub url: String,
}

/// Category reference embedded in a product relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductCategory {
  pub id: i64,
  pub name: String,
}

/// A catalog product with markdown description and image gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
  pub id: i64,
  pub name: String,
  pub description: Option<String>,
  pub images: Vec<ApiImage>,
  pub categories: Vec<ProductCategory>,
  #[serde(default)]
  pub is_best_seller: bool,
}

/// A portfolio project (completed installation) with a cover image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
  pub id: i64,
  pub title: String,
  pub image_url: String,
}

/// The unit of offline state: one complete, internally consistent capture
/// of the catalog. Persisted only as a whole; superseded wholesale by the
/// next successful sync cycle.
///
/// Products are keyed by category *name*, not id - that is the join key the
/// products-by-category API filter uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
  pub banners: Vec<Banner>,
  pub categories: Vec<Category>,
  pub portfolios: Vec<PortfolioItem>,
  pub products: BTreeMap<String, Vec<Product>>,
  /// Unix timestamp in milliseconds. Strictly increases across writes.
  pub last_synced: i64,
}

impl Snapshot {
  /// Total number of products across all categories.
  pub fn product_count(&self) -> usize {
    self.products.values().map(Vec::len).sum()
  }
}
