//! In-memory product store.
//!
//! Stands in for the relational table the handlers read and write. All
//! operations are async so callers can bind them to the request deadline.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::catalog::model::{InvalidProduct, Product, ProductInput, ProductPage, Stats, LOW_STOCK_THRESHOLD};
use crate::resilience::timeouts::DeadlineExceeded;

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("product {0} not found")]
    NotFound(i64),

    #[error(transparent)]
    DeadlineExceeded(#[from] DeadlineExceeded),

    #[error(transparent)]
    Invalid(#[from] InvalidProduct),
}

#[derive(Debug, Default)]
struct Table {
    rows: BTreeMap<i64, Product>,
    last_id: i64,
}

impl Table {
    fn insert(&mut self, input: ProductInput) -> Product {
        self.last_id += 1;
        let product = Product {
            id: self.last_id,
            name: input.name,
            description: input.description,
            price: input.price,
            stock_quantity: input.stock_quantity,
            created_at: Utc::now(),
        };
        self.rows.insert(product.id, product.clone());
        product
    }
}

/// Shared handle to the product table.
#[derive(Debug, Clone, Default)]
pub struct ProductStore {
    table: Arc<RwLock<Table>>,
}

impl ProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// One page of products, newest first.
    ///
    /// `search` matches name or description, case-insensitively. A page
    /// below 1 becomes 1; a page size outside `1..=100` becomes 20.
    pub async fn list(&self, search: &str, page: i64, page_size: i64) -> ProductPage {
        let page = usize::try_from(page).ok().filter(|p| *p >= 1).unwrap_or(1);
        let page_size = usize::try_from(page_size)
            .ok()
            .filter(|s| (1..=MAX_PAGE_SIZE).contains(s))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let needle = search.trim().to_lowercase();

        let table = self.table.read().await;
        let mut matches: Vec<&Product> = table
            .rows
            .values()
            .filter(|p| {
                needle.is_empty()
                    || p.name.to_lowercase().contains(&needle)
                    || p.description.to_lowercase().contains(&needle)
            })
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total = matches.len();
        let products = matches
            .into_iter()
            .skip((page - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        ProductPage {
            products,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        }
    }

    pub async fn get(&self, id: i64) -> Result<Product, StoreError> {
        self.table
            .read()
            .await
            .rows
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    pub async fn create(&self, input: ProductInput) -> Result<Product, StoreError> {
        let input = input.validate()?;
        let product = self.table.write().await.insert(input);
        tracing::debug!(product_id = product.id, "Product created");
        Ok(product)
    }

    /// Replace the editable fields of product `id`. `created_at` is kept.
    pub async fn update(&self, id: i64, input: ProductInput) -> Result<Product, StoreError> {
        let input = input.validate()?;
        let mut table = self.table.write().await;
        let product = table.rows.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        product.name = input.name;
        product.description = input.description;
        product.price = input.price;
        product.stock_quantity = input.stock_quantity;

        Ok(product.clone())
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        self.table
            .write()
            .await
            .rows
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::NotFound(id))
    }

    pub async fn stats(&self) -> Stats {
        let table = self.table.read().await;
        table.rows.values().fold(Stats::default(), |mut stats, p| {
            stats.total_products += 1;
            stats.total_stock += p.stock_quantity;
            stats.total_value += p.price * p.stock_quantity as f64;
            if p.stock_quantity > 0 && p.stock_quantity <= LOW_STOCK_THRESHOLD {
                stats.low_stock_count += 1;
            }
            stats
        })
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Insert the sample catalog when the table is empty. Returns how many
    /// rows were added.
    pub async fn seed_if_empty(&self) -> usize {
        let mut table = self.table.write().await;
        if !table.rows.is_empty() {
            return 0;
        }
        for (name, description, price, stock_quantity) in SEED_PRODUCTS {
            table.insert(ProductInput {
                name: name.to_string(),
                description: description.to_string(),
                price: *price,
                stock_quantity: *stock_quantity,
            });
        }
        tracing::info!(count = SEED_PRODUCTS.len(), "Seeded product catalog");
        SEED_PRODUCTS.len()
    }
}

const SEED_PRODUCTS: &[(&str, &str, f64, i64)] = &[
    ("MacBook Pro 16\"", "M4 Max chip, 48GB RAM, 1TB SSD", 3499.00, 12),
    ("Sony WH-1000XM5", "Industry-leading noise-cancelling headphones", 349.99, 45),
    ("LG UltraFine 5K", "27-inch 5K IPS monitor with Thunderbolt 3", 1299.00, 8),
    ("Keychron Q1 Pro", "Wireless 75 percent layout, Gateron Jupiter Brown", 199.00, 63),
    ("Samsung Galaxy S25 Ultra", "Snapdragon 8 Elite, 200MP camera, 5000mAh", 1419.99, 30),
    ("iPad Pro 13\"", "M4 chip, Ultra Retina XDR display, 256GB", 1299.00, 22),
    ("Logitech MX Master 3S", "Advanced wireless mouse with MagSpeed scroll", 99.99, 87),
    ("AirPods Pro 2", "Active noise cancellation, USB-C charging", 249.00, 150),
    ("Dell XPS 15", "Intel Core Ultra 9, 32GB RAM, OLED display", 2199.00, 5),
    ("Raspberry Pi 5", "8GB ARM single-board computer for IoT projects", 79.99, 200),
    ("Nintendo Switch 2", "Next-gen hybrid gaming console", 449.99, 3),
    ("Steam Deck OLED", "1TB model, 7.4-inch HDR OLED display", 649.99, 0),
];
