//! Catalog records and their validation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 255;

/// Products with `0 < stock <= LOW_STOCK_THRESHOLD` count as low stock.
pub const LOW_STOCK_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock_quantity: i64,
    pub created_at: DateTime<Utc>,
}

/// Client-supplied fields for create and update. Missing fields default to
/// empty or zero, so a body without `name` fails validation, not parsing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProductInput {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock_quantity: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidProduct {
    #[error("product name is required")]
    NameRequired,

    #[error("product name must be 100 characters or less")]
    NameTooLong,

    #[error("description must be 255 characters or less")]
    DescriptionTooLong,

    #[error("price must be non-negative")]
    NegativePrice,

    #[error("stock quantity must be non-negative")]
    NegativeStock,
}

impl ProductInput {
    /// Trim text fields and check the rules, returning the cleaned input.
    pub fn validate(self) -> Result<Self, InvalidProduct> {
        let name = self.name.trim().to_string();
        let description = self.description.trim().to_string();

        if name.is_empty() {
            return Err(InvalidProduct::NameRequired);
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(InvalidProduct::NameTooLong);
        }
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(InvalidProduct::DescriptionTooLong);
        }
        if self.price.is_nan() || self.price < 0.0 {
            return Err(InvalidProduct::NegativePrice);
        }
        if self.stock_quantity < 0 {
            return Err(InvalidProduct::NegativeStock);
        }

        Ok(Self {
            name,
            description,
            ..self
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total_products: usize,
    pub total_stock: i64,
    pub total_value: f64,
    pub low_stock_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductPage {
    pub products: Vec<Product>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(name: &str, price: f64, stock: i64) -> ProductInput {
        ProductInput {
            name: name.to_string(),
            description: "  a thing  ".to_string(),
            price,
            stock_quantity: stock,
        }
    }

    #[test]
    fn trims_text_fields() {
        let cleaned = input("  Widget ", 1.0, 1).validate().unwrap();
        assert_eq!(cleaned.name, "Widget");
        assert_eq!(cleaned.description, "a thing");
    }

    #[test]
    fn rejects_each_rule() {
        assert_eq!(input("   ", 1.0, 1).validate(), Err(InvalidProduct::NameRequired));
        assert_eq!(
            input(&"x".repeat(101), 1.0, 1).validate(),
            Err(InvalidProduct::NameTooLong)
        );
        assert_eq!(input("ok", -0.01, 1).validate(), Err(InvalidProduct::NegativePrice));
        assert_eq!(input("ok", 1.0, -1).validate(), Err(InvalidProduct::NegativeStock));

        let mut long_description = input("ok", 1.0, 1);
        long_description.description = "d".repeat(256);
        assert_eq!(
            long_description.validate(),
            Err(InvalidProduct::DescriptionTooLong)
        );
    }

    #[test]
    fn limits_count_characters_not_bytes() {
        let name = "é".repeat(100);
        assert!(input(&name, 0.0, 0).validate().is_ok());
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let parsed: ProductInput = serde_json::from_str(r#"{"price": 9.5}"#).unwrap();
        assert_eq!(parsed.name, "");
        assert_eq!(parsed.stock_quantity, 0);
        assert_eq!(parsed.validate(), Err(InvalidProduct::NameRequired));
    }
}
