//! Catalog domain: clean entity types, raw CMS shapes, and the typed client.

pub mod api_types;
pub mod client;
pub mod types;

pub use client::{CatalogClient, CatalogSource};
pub use types::{Banner, Category, PortfolioItem, Product, Snapshot};
