//! Raw response shapes from the CMS and conversion to clean catalog types.
//!
//! The CMS returns relative media paths; conversions absolutize them against
//! the CMS base URL. Field names follow the CMS schema (`deskripsi`,
//! `isBestSeller`, `pict`), so the rest of the crate never sees them.

use serde::Deserialize;

use super::types::{ApiImage, Banner, Category, PortfolioItem, Product, ProductCategory};

/// Placeholder used when a portfolio project has no usable image.
pub const PLACEHOLDER_IMAGE: &str = "/placeholder-image.jpg";

#[derive(Debug, Deserialize)]
pub struct RawBannerResponse {
  pub data: Vec<RawBannerDocument>,
}

/// The banner endpoint returns one document carrying the image carousel.
#[derive(Debug, Deserialize)]
pub struct RawBannerDocument {
  #[allow(dead_code)]
  pub id: i64,
  #[serde(default)]
  pub images: Vec<RawImage>,
}

#[derive(Debug, Deserialize)]
pub struct RawImage {
  pub id: i64,
  pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct RawCategoryResponse {
  pub data: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
pub struct RawCategory {
  pub id: i64,
  pub name: String,
  pub image: RawImage,
}

#[derive(Debug, Deserialize)]
pub struct RawProductResponse {
  pub data: Vec<RawProduct>,
}

#[derive(Debug, Deserialize)]
pub struct RawProduct {
  pub id: i64,
  pub name: String,
  pub deskripsi: Option<String>,
  #[serde(default)]
  pub images: Vec<RawImage>,
  #[serde(default)]
  pub categories: Vec<RawProductCategory>,
  #[serde(default, rename = "isBestSeller")]
  pub is_best_seller: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawProductCategory {
  pub id: i64,
  pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RawPortfolioResponse {
  pub data: Vec<RawPortfolio>,
}

#[derive(Debug, Deserialize)]
pub struct RawPortfolio {
  pub id: i64,
  pub title: Option<String>,
  pub pict: Option<RawPict>,
}

/// Portfolio cover image. The full-size `url` is preferred; scaled formats
/// are fallbacks for documents where only renditions were uploaded.
#[derive(Debug, Deserialize)]
pub struct RawPict {
  pub url: Option<String>,
  pub formats: Option<RawPictFormats>,
}

#[derive(Debug, Deserialize)]
pub struct RawPictFormats {
  pub medium: Option<RawPictFormat>,
  pub small: Option<RawPictFormat>,
  pub thumbnail: Option<RawPictFormat>,
}

#[derive(Debug, Deserialize)]
pub struct RawPictFormat {
  pub url: String,
}

/// Join a CMS-relative media path onto the CMS base URL.
fn absolutize(base: &str, path: &str) -> String {
  format!("{}{}", base.trim_end_matches('/'), path)
}

impl RawBannerResponse {
  pub fn into_banners(self, base: &str) -> Vec<Banner> {
    // The carousel lives on the first (and only) document.
    self
      .data
      .into_iter()
      .next()
      .map(|doc| {
        doc
          .images
          .into_iter()
          .map(|img| Banner {
            id: img.id,
            image_url: absolutize(base, &img.url),
          })
          .collect()
      })
      .unwrap_or_default()
  }
}

impl RawCategoryResponse {
  pub fn into_categories(self, base: &str) -> Vec<Category> {
    self
      .data
      .into_iter()
      .map(|c| Category {
        id: c.id,
        name: c.name,
        image_url: absolutize(base, &c.image.url),
      })
      .collect()
  }
}

impl RawProduct {
  pub fn into_product(self, base: &str) -> Product {
    Product {
      id: self.id,
      name: self.name,
      description: self.deskripsi,
      images: self
        .images
        .into_iter()
        .map(|img| ApiImage {
          id: img.id,
          url: absolutize(base, &img.url),
        })
        .collect(),
      categories: self
        .categories
        .into_iter()
        .map(|c| ProductCategory {
          id: c.id,
          name: c.name,
        })
        .collect(),
      is_best_seller: self.is_best_seller,
    }
  }
}

impl RawPortfolio {
  pub fn into_item(self, base: &str) -> PortfolioItem {
    let image_url = self
      .pict
      .as_ref()
      .and_then(|pict| {
        pict
          .url
          .as_deref()
          .or_else(|| {
            let formats = pict.formats.as_ref()?;
            formats
              .medium
              .as_ref()
              .or(formats.small.as_ref())
              .or(formats.thumbnail.as_ref())
              .map(|f| f.url.as_str())
          })
          .map(|path| absolutize(base, path))
      })
      .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string());

    PortfolioItem {
      id: self.id,
      title: self.title.unwrap_or_else(|| "Untitled".to_string()),
      image_url,
    }
  }
}
