// crates/keel-records/src/products.rs
// ============================================================================
// Module: Product Records
// Description: Catalog products with price and stock level.
// Purpose: Describe the products table and guarded stock adjustments.
// Dependencies: keel-store-sqlite, serde
// ============================================================================

//! ## Overview
//! Products have a name, optional description, price and stock quantity.
//! Stock changes go through [`StockControl::adjust_stock`], which refuses to
//! take the quantity below zero.

// ============================================================================
// SECTION: Imports
// ============================================================================

use keel_store_sqlite::FilterQuery;
use keel_store_sqlite::HandleGuard;
use keel_store_sqlite::RecordKey;
use keel_store_sqlite::RecordSchema;
use keel_store_sqlite::RecordStore;
use keel_store_sqlite::RecordTemplates;
use keel_store_sqlite::RowView;
use keel_store_sqlite::StoreError;
use keel_store_sqlite::Value;
use serde::Serialize;

// ============================================================================
// SECTION: SQL
// ============================================================================

/// Idempotent DDL of the products table.
pub const PRODUCTS_DDL: &str = "
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    price DECIMAL(10,2) NOT NULL,
    stock_quantity INTEGER DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_products_name ON products(name);
CREATE INDEX IF NOT EXISTS idx_products_price ON products(price);";

/// Columns selected by every product read.
macro_rules! product_columns {
    () => {
        "SELECT id, name, description, price, stock_quantity, created_at, updated_at \
         FROM products"
    };
}

/// Products whose name contains a substring.
const SELECT_BY_NAME: &str =
    concat!(product_columns!(), " WHERE name LIKE '%' || ?1 || '%' ORDER BY name");
/// Products within an inclusive price range.
const SELECT_BY_PRICE: &str =
    concat!(product_columns!(), " WHERE price BETWEEN ?1 AND ?2 ORDER BY price, id");
/// Products at or below a stock threshold.
const SELECT_LOW_STOCK: &str =
    concat!(product_columns!(), " WHERE stock_quantity <= ?1 ORDER BY stock_quantity, id");
/// Adds a signed delta to the stock unless the result would be negative.
const ADJUST_STOCK: &str = "UPDATE products SET stock_quantity = stock_quantity + ?1, \
                            updated_at = CURRENT_TIMESTAMP \
                            WHERE id = ?2 AND stock_quantity + ?1 >= 0";
/// Current stock of one product.
const SELECT_STOCK: &str = "SELECT stock_quantity FROM products WHERE id = ?1";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Stored product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    /// Row id.
    pub id: RecordKey,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Unit price.
    pub price: f64,
    /// Units in stock.
    pub stock_quantity: i64,
    /// Creation timestamp (UTC, engine format).
    pub created_at: String,
    /// Last update timestamp (UTC, engine format).
    pub updated_at: String,
}

/// Values of a new product; also used as full replacement on update.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Unit price.
    pub price: f64,
    /// Units in stock.
    pub stock_quantity: i64,
}

impl NewProduct {
    /// Builds a product draft.
    #[must_use]
    pub fn new(name: impl Into<String>, price: f64, stock_quantity: i64) -> Self {
        Self {
            name: name.into(),
            description: None,
            price,
            stock_quantity,
        }
    }

    /// Returns the draft with a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Replacement values of a product update.
pub type ProductUpdate = NewProduct;

/// Product read filters.
#[derive(Debug, Clone, PartialEq)]
pub enum ProductFilter {
    /// Name contains the text (case-insensitive for ASCII).
    NameContains(String),
    /// Price within `[min, max]`.
    PriceRange {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },
    /// Stock at or below the threshold.
    LowStock(i64),
}

/// Result of a guarded stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockAdjustment {
    /// Stock changed; the new quantity.
    Adjusted {
        /// Quantity after the change.
        stock: i64,
    },
    /// The change would make stock negative; nothing was written.
    Insufficient {
        /// Quantity left unchanged.
        stock: i64,
    },
    /// No product with the key.
    NotFound,
}

/// Products table schema.
#[derive(Debug, Clone, Copy)]
pub struct Products;

/// Record store of products.
pub type ProductStore = RecordStore<Products>;

impl RecordSchema for Products {
    type Draft = NewProduct;
    type Filter = ProductFilter;
    type Patch = ProductUpdate;
    type Record = Product;

    const DDL: &'static str = PRODUCTS_DDL;
    const NAME: &'static str = "products";
    const TEMPLATES: RecordTemplates = RecordTemplates {
        insert: "INSERT INTO products (name, description, price, stock_quantity) \
                 VALUES (?1, ?2, ?3, ?4)",
        select_one: concat!(product_columns!(), " WHERE id = ?1"),
        select_all: concat!(product_columns!(), " ORDER BY name, id"),
        update: "UPDATE products SET name = ?1, description = ?2, price = ?3, \
                 stock_quantity = ?4, updated_at = CURRENT_TIMESTAMP WHERE id = ?5",
        delete: "DELETE FROM products WHERE id = ?1",
        count: "SELECT COUNT(*) FROM products",
        queries: &[SELECT_BY_NAME, SELECT_BY_PRICE, SELECT_LOW_STOCK, ADJUST_STOCK, SELECT_STOCK],
    };

    fn bind_draft(draft: &NewProduct) -> Vec<Value> {
        vec![
            Value::Text(draft.name.clone()),
            draft.description.clone().map_or(Value::Null, Value::Text),
            Value::Real(draft.price),
            Value::Integer(draft.stock_quantity),
        ]
    }

    fn bind_patch(key: RecordKey, patch: &ProductUpdate) -> Vec<Value> {
        let mut bindings = Self::bind_draft(patch);
        bindings.push(Value::Integer(key));
        bindings
    }

    fn filter_query(filter: &ProductFilter) -> FilterQuery {
        match filter {
            ProductFilter::NameContains(text) => FilterQuery {
                sql: SELECT_BY_NAME,
                bindings: vec![Value::Text(text.clone())],
            },
            ProductFilter::PriceRange {
                min,
                max,
            } => FilterQuery {
                sql: SELECT_BY_PRICE,
                bindings: vec![Value::Real(*min), Value::Real(*max)],
            },
            ProductFilter::LowStock(threshold) => FilterQuery {
                sql: SELECT_LOW_STOCK,
                bindings: vec![Value::Integer(*threshold)],
            },
        }
    }

    fn decode(row: RowView<'_>) -> Result<Product, StoreError> {
        Ok(Product {
            id: row.i64(0)?,
            name: row.text(1)?.to_string(),
            description: row.opt_text(2)?.map(str::to_string),
            price: row.f64(3)?,
            stock_quantity: row.i64(4)?,
            created_at: row.text(5)?.to_string(),
            updated_at: row.text(6)?.to_string(),
        })
    }
}

// ============================================================================
// SECTION: Stock
// ============================================================================

/// Guarded stock changes over the products table.
pub trait StockControl {
    /// Adds `delta` (possibly negative) to a product's stock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine or decode failure.
    fn adjust_stock(&self, id: RecordKey, delta: i64) -> Result<StockAdjustment, StoreError>;

    /// Adjusts stock under a held session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine or decode failure.
    fn adjust_stock_in(
        &self,
        session: &HandleGuard<'_>,
        id: RecordKey,
        delta: i64,
    ) -> Result<StockAdjustment, StoreError>;
}

impl StockControl for RecordStore<Products> {
    fn adjust_stock(&self, id: RecordKey, delta: i64) -> Result<StockAdjustment, StoreError> {
        let guard = self.handle().lock()?;
        self.adjust_stock_in(&guard, id, delta)
    }

    fn adjust_stock_in(
        &self,
        session: &HandleGuard<'_>,
        id: RecordKey,
        delta: i64,
    ) -> Result<StockAdjustment, StoreError> {
        let changed = self
            .query_in(session, ADJUST_STOCK, &[Value::Integer(delta), Value::Integer(id)])?
            .into_changed()?;
        let rows = self.query_in(session, SELECT_STOCK, &[Value::Integer(id)])?.into_rows()?;
        let Some(row) = rows.first() else {
            return Ok(StockAdjustment::NotFound);
        };
        let stock = row.i64(0)?;
        Ok(if changed == 0 {
            StockAdjustment::Insufficient {
                stock,
            }
        } else {
            StockAdjustment::Adjusted {
                stock,
            }
        })
    }
}
