// crates/keel-records/tests/records_unit.rs
// ============================================================================
// Module: Business Record Tests
// Description: Users, orders and products under both coordinator layouts.
// Purpose: Validate CRUD, filters, aggregates, stock guards and cross-table
//          transactions.
// ============================================================================

//! ## Overview
//! Integration tests for `keel-records`:
//! - Per-table CRUD, filters and aggregates in the single-file layout
//! - Foreign keys are enforced only when orders share a file with users
//! - Guarded stock adjustment outcomes
//! - Distributed user + order transactions over partition files

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::float_cmp,
    reason = "Test-only assertions and helpers are permitted."
)]

use keel_records::NewOrder;
use keel_records::NewProduct;
use keel_records::NewUser;
use keel_records::OrderAggregates;
use keel_records::OrderFilter;
use keel_records::OrderStatus;
use keel_records::OrderUpdate;
use keel_records::ProductFilter;
use keel_records::RecordStores;
use keel_records::StockAdjustment;
use keel_records::StockControl;
use keel_records::TableDomain;
use keel_records::UserFilter;
use keel_records::open_partitioned;
use keel_records::open_single;
use keel_store_sqlite::BeginMode;
use keel_store_sqlite::ConnectionConfig;
use keel_store_sqlite::StoreError;
use keel_store_sqlite::ThreadMode;
use keel_store_sqlite::TransactionState;
use keel_store_sqlite::WriteOutcome;
use tempfile::TempDir;

// ============================================================================
// SECTION: Domains
// ============================================================================

#[test]
fn domains_name_partitions_and_files() {
    let names: Vec<String> = TableDomain::ALL.iter().map(ToString::to_string).collect();
    assert_eq!(names, ["users", "orders", "products"]);
    assert_eq!(TableDomain::Users.default_file_name(), "users_db.db");
    assert_eq!(TableDomain::Orders.default_file_name(), "orders_db.db");
    assert_eq!(TableDomain::Products.default_file_name(), "products_db.db");
    assert!(TableDomain::Orders.schema().contains("CREATE TABLE IF NOT EXISTS orders"));
    assert!(!TableDomain::Orders.schema().contains("FOREIGN KEY"));
}

#[test]
fn partitioned_layout_creates_one_file_per_domain() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_partitioned(temp.path(), &ConnectionConfig::default()).unwrap();
    let order: Vec<TableDomain> = coordinator.partitions().copied().collect();
    assert_eq!(order, TableDomain::ALL);
    for domain in TableDomain::ALL {
        assert!(temp.path().join(domain.default_file_name()).exists());
        assert_eq!(
            coordinator.handle(&domain).unwrap().thread_mode(),
            ThreadMode::Unsynchronized
        );
    }
}

// ============================================================================
// SECTION: Users
// ============================================================================

#[test]
fn users_round_trip_and_filter() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();

    let ada = stores.users.create(&NewUser::new("ada", "ada@example.com")).unwrap();
    let bob = stores.users.create(&NewUser::new("bob", "bob@example.com")).unwrap();
    assert_ne!(ada, bob);

    let stored = stores.users.read_one(ada).unwrap().unwrap();
    assert_eq!(stored.username, "ada");
    assert_eq!(stored.email, "ada@example.com");
    assert!(!stored.created_at.is_empty());

    let by_email =
        stores.users.read_all(Some(&UserFilter::Email("bob@example.com".to_string()))).unwrap();
    assert_eq!(by_email.len(), 1);
    assert_eq!(by_email[0].id, bob);

    let outcome = stores.users.update(bob, &NewUser::new("robert", "bob@example.com")).unwrap();
    assert!(outcome.is_applied());
    let by_name =
        stores.users.read_all(Some(&UserFilter::Username("robert".to_string()))).unwrap();
    assert_eq!(by_name.len(), 1);

    assert_eq!(stores.users.delete(ada).unwrap(), WriteOutcome::Applied { rows: 1 });
    assert_eq!(stores.users.delete(ada).unwrap(), WriteOutcome::NotFound);
    assert_eq!(stores.users.count().unwrap(), 1);
}

#[test]
fn duplicate_username_is_a_constraint_violation() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();
    stores.users.create(&NewUser::new("ada", "ada@example.com")).unwrap();

    let err = stores.users.create(&NewUser::new("ada", "other@example.com")).unwrap_err();
    assert!(err.is_constraint(), "unexpected error: {err}");
    assert_eq!(stores.users.count().unwrap(), 1);
}

// ============================================================================
// SECTION: Orders
// ============================================================================

#[test]
fn orders_filter_and_aggregate() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();
    let ada = stores.users.create(&NewUser::new("ada", "ada@example.com")).unwrap();
    let bob = stores.users.create(&NewUser::new("bob", "bob@example.com")).unwrap();

    let first = stores.orders.create(&NewOrder::pending(ada, 10.5)).unwrap();
    let second = stores.orders.create(&NewOrder::pending(ada, 20.0)).unwrap();
    stores.orders.create(&NewOrder::pending(bob, 7.25)).unwrap();

    let update = OrderUpdate {
        total_amount: 20.0,
        status: OrderStatus::Shipped,
    };
    assert!(stores.orders.update(second, &update).unwrap().is_applied());

    let adas = stores.orders.read_all(Some(&OrderFilter::User(ada))).unwrap();
    let ids: Vec<i64> = adas.iter().map(|order| order.id).collect();
    assert_eq!(ids, [second, first]);
    assert_eq!(adas[0].status, OrderStatus::Shipped);
    assert_eq!(adas[0].total_amount, 20.0);

    let shipped = stores.orders.read_all(Some(&OrderFilter::Status(OrderStatus::Shipped))).unwrap();
    assert_eq!(shipped.len(), 1);
    assert_eq!(stores.orders.count_by_status(OrderStatus::Pending).unwrap(), 2);
    assert_eq!(stores.orders.count_by_status(OrderStatus::Cancelled).unwrap(), 0);

    assert_eq!(stores.orders.total_amount_for_user(ada).unwrap(), 30.5);
    assert_eq!(stores.orders.total_amount_for_user(9_999).unwrap(), 0.0);
}

#[test]
fn order_status_parses_stored_text() {
    for status in OrderStatus::ALL {
        assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
    }
    assert!(matches!("lost".parse::<OrderStatus>(), Err(StoreError::Decode(_))));
    assert_eq!(OrderStatus::default(), OrderStatus::Pending);
}

#[test]
fn single_file_enforces_order_user_reference() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();

    let err = stores.orders.create(&NewOrder::pending(42, 1.0)).unwrap_err();
    assert!(err.is_constraint(), "unexpected error: {err}");
    assert_eq!(stores.orders.count().unwrap(), 0);
}

#[test]
fn partition_files_cannot_enforce_order_user_reference() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_partitioned(temp.path(), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_partitioned(&coordinator).unwrap();

    stores.orders.create(&NewOrder::pending(42, 1.0)).unwrap();
    assert_eq!(stores.orders.count().unwrap(), 1);
    assert_eq!(stores.users.count().unwrap(), 0);
}

// ============================================================================
// SECTION: Products
// ============================================================================

#[test]
fn products_filter_by_name_price_and_stock() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();

    let lamp = stores
        .products
        .create(&NewProduct::new("Desk Lamp", 24.99, 3).with_description("LED"))
        .unwrap();
    stores.products.create(&NewProduct::new("Floor Lamp", 89.0, 12)).unwrap();
    stores.products.create(&NewProduct::new("Chair", 45.5, 0)).unwrap();

    let lamps =
        stores.products.read_all(Some(&ProductFilter::NameContains("lamp".to_string()))).unwrap();
    let names: Vec<&str> = lamps.iter().map(|product| product.name.as_str()).collect();
    assert_eq!(names, ["Desk Lamp", "Floor Lamp"]);
    assert_eq!(lamps[0].id, lamp);
    assert_eq!(lamps[0].description.as_deref(), Some("LED"));
    assert_eq!(lamps[1].description, None);

    let mid = stores
        .products
        .read_all(Some(&ProductFilter::PriceRange {
            min: 20.0,
            max: 50.0,
        }))
        .unwrap();
    assert_eq!(mid.len(), 2);
    assert_eq!(mid[0].price, 24.99);

    let low = stores.products.read_all(Some(&ProductFilter::LowStock(3))).unwrap();
    let stock: Vec<i64> = low.iter().map(|product| product.stock_quantity).collect();
    assert_eq!(stock, [0, 3]);
}

#[test]
fn stock_adjustment_refuses_negative_stock() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();
    let lamp = stores.products.create(&NewProduct::new("Desk Lamp", 24.99, 3)).unwrap();

    assert_eq!(
        stores.products.adjust_stock(lamp, 5).unwrap(),
        StockAdjustment::Adjusted {
            stock: 8
        }
    );
    assert_eq!(
        stores.products.adjust_stock(lamp, -8).unwrap(),
        StockAdjustment::Adjusted {
            stock: 0
        }
    );
    assert_eq!(
        stores.products.adjust_stock(lamp, -1).unwrap(),
        StockAdjustment::Insufficient {
            stock: 0
        }
    );
    assert_eq!(stores.products.adjust_stock(lamp + 100, 1).unwrap(), StockAdjustment::NotFound);
    assert_eq!(stores.products.read_one(lamp).unwrap().unwrap().stock_quantity, 0);
}

// ============================================================================
// SECTION: Cross-Table Transactions
// ============================================================================

#[test]
fn single_file_transaction_spans_tables() {
    let temp = TempDir::new().unwrap();
    let coordinator =
        open_single(temp.path().join("app.db"), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_single(&coordinator).unwrap();
    let lamp = stores.products.create(&NewProduct::new("Desk Lamp", 24.99, 1)).unwrap();

    let result: Result<(), StoreError> =
        coordinator.handle().transaction(BeginMode::Immediate, |session| {
            let user = stores.users.create_in(session, &NewUser::new("ada", "ada@example.com"))?;
            stores.orders.create_in(session, &NewOrder::pending(user, 49.98))?;
            match stores.products.adjust_stock_in(session, lamp, -2)? {
                StockAdjustment::Adjusted {
                    ..
                } => Ok(()),
                other => Err(StoreError::Invalid(format!("stock not reserved: {other:?}"))),
            }
        });
    assert!(matches!(result, Err(StoreError::Invalid(_))));
    assert_eq!(stores.users.count().unwrap(), 0);
    assert_eq!(stores.orders.count().unwrap(), 0);
    assert_eq!(stores.products.read_one(lamp).unwrap().unwrap().stock_quantity, 1);
}

#[test]
fn distributed_user_and_order_commit_together() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_partitioned(temp.path(), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_partitioned(&coordinator).unwrap();

    let mut tx = coordinator.begin_distributed().unwrap();
    let ada = NewUser::new("ada", "ada@example.com");
    let user = stores.users.create_in(tx.session(&TableDomain::Users).unwrap(), &ada).unwrap();
    stores
        .orders
        .create_in(tx.session(&TableDomain::Orders).unwrap(), &NewOrder::pending(user, 12.0))
        .unwrap();
    tx.commit().unwrap();
    assert_eq!(tx.state(), TransactionState::Committed);
    drop(tx);

    assert_eq!(stores.users.count().unwrap(), 1);
    assert_eq!(stores.orders.read_all(Some(&OrderFilter::User(user))).unwrap().len(), 1);
}

#[test]
fn distributed_rollback_discards_every_partition() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_partitioned(temp.path(), &ConnectionConfig::default()).unwrap();
    let stores = RecordStores::attach_partitioned(&coordinator).unwrap();

    let mut tx = coordinator.begin_distributed().unwrap();
    let ada = NewUser::new("ada", "ada@example.com");
    let user = stores.users.create_in(tx.session(&TableDomain::Users).unwrap(), &ada).unwrap();
    stores
        .orders
        .create_in(tx.session(&TableDomain::Orders).unwrap(), &NewOrder::pending(user, 12.0))
        .unwrap();
    tx.rollback().unwrap();
    drop(tx);

    assert_eq!(stores.users.count().unwrap(), 0);
    assert_eq!(stores.orders.count().unwrap(), 0);
    assert!(!coordinator.in_distributed_transaction());
}
