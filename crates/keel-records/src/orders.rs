// crates/keel-records/src/orders.rs
// ============================================================================
// Module: Order Records
// Description: Orders placed by users, with amount and fulfilment status.
// Purpose: Describe the orders table and its aggregate queries.
// Dependencies: keel-store-sqlite, serde
// ============================================================================

//! ## Overview
//! Orders reference a user by id, carry a total amount and a status. When
//! users and orders share one file the reference is enforced by a foreign
//! key ([`ORDERS_LINKED_DDL`]); across partitions it cannot be.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

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

/// Idempotent DDL of a standalone orders table.
pub const ORDERS_DDL: &str = "
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    total_amount DECIMAL(10,2) NOT NULL,
    status TEXT DEFAULT 'pending',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders(user_id);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);";

/// Idempotent DDL of an orders table next to the users table.
pub const ORDERS_LINKED_DDL: &str = "
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    total_amount DECIMAL(10,2) NOT NULL,
    status TEXT DEFAULT 'pending',
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_id) REFERENCES users(id)
);
CREATE INDEX IF NOT EXISTS idx_orders_user_id ON orders(user_id);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);";

/// Columns selected by every order read.
macro_rules! order_columns {
    () => {
        "SELECT id, user_id, total_amount, status, created_at, updated_at FROM orders"
    };
}

/// Orders of one user, newest first.
const SELECT_BY_USER: &str =
    concat!(order_columns!(), " WHERE user_id = ?1 ORDER BY created_at DESC, id DESC");
/// Orders in one status, newest first.
const SELECT_BY_STATUS: &str =
    concat!(order_columns!(), " WHERE status = ?1 ORDER BY created_at DESC, id DESC");
/// Sum of one user's order amounts.
const TOTAL_FOR_USER: &str = "SELECT COALESCE(SUM(total_amount), 0) FROM orders WHERE user_id = ?1";
/// Number of orders in one status.
const COUNT_BY_STATUS: &str = "SELECT COUNT(*) FROM orders WHERE status = ?1";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Fulfilment status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed, not yet processed.
    #[default]
    Pending,
    /// Being prepared.
    Processing,
    /// Handed to the carrier.
    Shipped,
    /// Delivered and closed.
    Completed,
    /// Cancelled before completion.
    Cancelled,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] =
        [Self::Pending, Self::Processing, Self::Shipped, Self::Completed, Self::Cancelled];

    /// Returns the stored text of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| StoreError::Decode(format!("unknown order status {value}")))
    }
}

/// Stored order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    /// Row id.
    pub id: RecordKey,
    /// Ordering user.
    pub user_id: RecordKey,
    /// Order total.
    pub total_amount: f64,
    /// Fulfilment status.
    pub status: OrderStatus,
    /// Creation timestamp (UTC, engine format).
    pub created_at: String,
    /// Last update timestamp (UTC, engine format).
    pub updated_at: String,
}

/// Values of a new order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    /// Ordering user.
    pub user_id: RecordKey,
    /// Order total.
    pub total_amount: f64,
    /// Initial status.
    pub status: OrderStatus,
}

impl NewOrder {
    /// Builds a pending order.
    #[must_use]
    pub const fn pending(user_id: RecordKey, total_amount: f64) -> Self {
        Self {
            user_id,
            total_amount,
            status: OrderStatus::Pending,
        }
    }
}

/// Replacement values of an order update.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderUpdate {
    /// New total.
    pub total_amount: f64,
    /// New status.
    pub status: OrderStatus,
}

/// Order read filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderFilter {
    /// Orders of one user.
    User(RecordKey),
    /// Orders in one status.
    Status(OrderStatus),
}

/// Orders table schema.
#[derive(Debug, Clone, Copy)]
pub struct Orders;

/// Record store of orders.
pub type OrderStore = RecordStore<Orders>;

impl RecordSchema for Orders {
    type Draft = NewOrder;
    type Filter = OrderFilter;
    type Patch = OrderUpdate;
    type Record = Order;

    const DDL: &'static str = ORDERS_DDL;
    const NAME: &'static str = "orders";
    const TEMPLATES: RecordTemplates = RecordTemplates {
        insert: "INSERT INTO orders (user_id, total_amount, status) VALUES (?1, ?2, ?3)",
        select_one: concat!(order_columns!(), " WHERE id = ?1"),
        select_all: concat!(order_columns!(), " ORDER BY created_at DESC, id DESC"),
        update: "UPDATE orders SET total_amount = ?1, status = ?2, \
                 updated_at = CURRENT_TIMESTAMP WHERE id = ?3",
        delete: "DELETE FROM orders WHERE id = ?1",
        count: "SELECT COUNT(*) FROM orders",
        queries: &[SELECT_BY_USER, SELECT_BY_STATUS, TOTAL_FOR_USER, COUNT_BY_STATUS],
    };

    fn bind_draft(draft: &NewOrder) -> Vec<Value> {
        vec![
            Value::Integer(draft.user_id),
            Value::Real(draft.total_amount),
            Value::Text(draft.status.as_str().to_string()),
        ]
    }

    fn bind_patch(key: RecordKey, patch: &OrderUpdate) -> Vec<Value> {
        vec![
            Value::Real(patch.total_amount),
            Value::Text(patch.status.as_str().to_string()),
            Value::Integer(key),
        ]
    }

    fn filter_query(filter: &OrderFilter) -> FilterQuery {
        match filter {
            OrderFilter::User(user_id) => FilterQuery {
                sql: SELECT_BY_USER,
                bindings: vec![Value::Integer(*user_id)],
            },
            OrderFilter::Status(status) => FilterQuery {
                sql: SELECT_BY_STATUS,
                bindings: vec![Value::Text(status.as_str().to_string())],
            },
        }
    }

    fn decode(row: RowView<'_>) -> Result<Order, StoreError> {
        Ok(Order {
            id: row.i64(0)?,
            user_id: row.i64(1)?,
            total_amount: row.f64(2)?,
            status: row.opt_text(3)?.unwrap_or(OrderStatus::Pending.as_str()).parse()?,
            created_at: row.text(4)?.to_string(),
            updated_at: row.text(5)?.to_string(),
        })
    }
}

// ============================================================================
// SECTION: Aggregates
// ============================================================================

/// Aggregate reads over the orders table.
pub trait OrderAggregates {
    /// Sums the totals of one user's orders; zero when there are none.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine or decode failure.
    fn total_amount_for_user(&self, user_id: RecordKey) -> Result<f64, StoreError>;

    /// Sums one user's order totals under a held session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine or decode failure.
    fn total_amount_for_user_in(
        &self,
        session: &HandleGuard<'_>,
        user_id: RecordKey,
    ) -> Result<f64, StoreError>;

    /// Counts orders in one status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on engine or decode failure.
    fn count_by_status(&self, status: OrderStatus) -> Result<u64, StoreError>;
}

impl OrderAggregates for RecordStore<Orders> {
    fn total_amount_for_user(&self, user_id: RecordKey) -> Result<f64, StoreError> {
        let guard = self.handle().lock()?;
        self.total_amount_for_user_in(&guard, user_id)
    }

    fn total_amount_for_user_in(
        &self,
        session: &HandleGuard<'_>,
        user_id: RecordKey,
    ) -> Result<f64, StoreError> {
        let rows =
            self.query_in(session, TOTAL_FOR_USER, &[Value::Integer(user_id)])?.into_rows()?;
        rows.first()
            .ok_or_else(|| StoreError::Decode("sum produced no row".to_string()))?
            .f64(0)
    }

    fn count_by_status(&self, status: OrderStatus) -> Result<u64, StoreError> {
        let guard = self.handle().lock()?;
        let count = self
            .query_in(&guard, COUNT_BY_STATUS, &[Value::Text(status.as_str().to_string())])?
            .into_rows()?
            .scalar_i64()?;
        u64::try_from(count).map_err(|_| StoreError::Decode(format!("negative count {count}")))
    }
}
