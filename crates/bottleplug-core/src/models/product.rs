use serde::{Deserialize, Serialize};

use super::{deserialize_amount, deserialize_id};

/// Paginated listing: `{count, next, previous, results}`
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: u64,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.next.as_deref().is_some_and(|n| !n.is_empty())
    }
}

/// Endpoints answer either a page or a bare array depending on the view.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    Page(Page<T>),
    List(Vec<T>),
}

impl<T> Listing<T> {
    pub fn into_items(self) -> Vec<T> {
        match self {
            Listing::Page(page) => page.results,
            Listing::List(items) => items,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Category {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub is_active: Option<bool>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Product {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category_name: Option<String>,
    pub sku: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub price: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub original_price: Option<f64>,
    pub stock: i64,
    pub image: Option<String>,
    pub is_featured: bool,
}

impl Product {
    pub fn in_stock(&self) -> bool {
        self.stock > 0
    }

    /// Percentage off the original price, when the product is discounted
    pub fn discount_percent(&self) -> Option<u32> {
        match (self.price, self.original_price) {
            (Some(price), Some(original)) if original > 0.0 && price < original => {
                Some((((original - price) / original) * 100.0).round() as u32)
            }
            _ => None,
        }
    }
}
