// crates/keel-records/src/lib.rs
// ============================================================================
// Module: Keel Records
// Description: Users, orders and products as record-store schemas.
// Purpose: Business clients of the storage coordinator.
// Dependencies: keel-store-sqlite, serde, tracing
// ============================================================================

//! ## Overview
//! Each table is a [`keel_store_sqlite::RecordSchema`]; the stores are plain
//! [`keel_store_sqlite::RecordStore`] instances with a few table-specific
//! extension traits ([`OrderAggregates`], [`StockControl`]).

pub mod domain;
pub mod orders;
pub mod products;
pub mod users;

pub use domain::RecordStores;
pub use domain::SINGLE_FILE_SCHEMA;
pub use domain::TableDomain;
pub use domain::open_partition_files;
pub use domain::open_partitioned;
pub use domain::open_single;
pub use orders::NewOrder;
pub use orders::Order;
pub use orders::OrderAggregates;
pub use orders::OrderFilter;
pub use orders::OrderStatus;
pub use orders::OrderStore;
pub use orders::OrderUpdate;
pub use orders::Orders;
pub use products::NewProduct;
pub use products::Product;
pub use products::ProductFilter;
pub use products::ProductStore;
pub use products::ProductUpdate;
pub use products::Products;
pub use products::StockAdjustment;
pub use products::StockControl;
pub use users::NewUser;
pub use users::User;
pub use users::UserFilter;
pub use users::UserStore;
pub use users::UserUpdate;
pub use users::Users;
