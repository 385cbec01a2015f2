// crates/keel-cli/src/workload.rs
// ============================================================================
// Module: Demo Workloads
// Description: Concurrent CRUD, partitioned and thread-mode workloads.
// Purpose: Exercise both coordinator layouts and report what they did.
// Dependencies: keel-config, keel-records, keel-store-sqlite, serde, tracing
// ============================================================================

//! ## Overview
//! - [`run_single`] drives user/order/product CRUD from several threads
//!   through one shared serialized handle, then a batch insert.
//! - [`run_multi`] drives each partition in parallel, commits one distributed
//!   user + order transaction and rolls another back.
//! - [`run_thread_modes`] times the same inserts through one serialized
//!   handle and through one unsynchronized handle per thread.
//!
//! Record names carry a caller-supplied tag so repeated runs against the same
//! files do not collide on unique columns; reports count rows added.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::thread;
use std::thread::ScopedJoinHandle;
use std::time::Instant;

use keel_config::MultiConfig;
use keel_config::WorkloadConfig;
use keel_records::NewOrder;
use keel_records::NewProduct;
use keel_records::NewUser;
use keel_records::OrderStatus;
use keel_records::OrderUpdate;
use keel_records::ProductStore;
use keel_records::Products;
use keel_records::RecordStores;
use keel_records::StockControl;
use keel_records::TableDomain;
use keel_records::UserFilter;
use keel_records::open_partition_files;
use keel_records::open_single;
use keel_store_sqlite::ConnectionConfig;
use keel_store_sqlite::ConnectionHandle;
use keel_store_sqlite::RecordKey;
use keel_store_sqlite::RecordOp;
use keel_store_sqlite::RecordSchema;
use keel_store_sqlite::StoreError;
use keel_store_sqlite::ThreadMode;
use serde::Serialize;
use tracing::info;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Order amounts cycled through by the workloads.
const AMOUNTS: [f64; 4] = [9.99, 24.5, 100.0, 3.75];
/// Products inserted by the single-layout batch step.
const BATCH_SIZE: usize = 10;
/// Initial stock of workload products.
const INITIAL_STOCK: i64 = 10;
/// Every n-th single-layout order is deleted again.
const DELETE_EVERY: usize = 5;

// ============================================================================
// SECTION: Reports
// ============================================================================

/// Row counts of the three business tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableCounts {
    /// Users rows.
    pub users: u64,
    /// Orders rows.
    pub orders: u64,
    /// Products rows.
    pub products: u64,
}

impl TableCounts {
    /// Reads the current counts through the stores.
    fn read(stores: &RecordStores) -> Result<Self, StoreError> {
        Ok(Self {
            users: stores.users.count()?,
            orders: stores.orders.count()?,
            products: stores.products.count()?,
        })
    }

    /// Returns the per-table growth since `before`.
    const fn since(self, before: Self) -> Self {
        Self {
            users: self.users.saturating_sub(before.users),
            orders: self.orders.saturating_sub(before.orders),
            products: self.products.saturating_sub(before.products),
        }
    }
}

/// Outcome of [`run_single`].
#[derive(Debug, Clone, Serialize)]
pub struct SingleReport {
    /// Database file.
    pub path: String,
    /// Worker threads.
    pub threads: usize,
    /// Operations per worker.
    pub operations_per_thread: usize,
    /// Rows added per table, batch included.
    pub added: TableCounts,
    /// Orders deleted by the workers.
    pub orders_deleted: usize,
    /// Products inserted by the batch step.
    pub batch_created: usize,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

/// Rows added to one partition by [`run_multi`].
#[derive(Debug, Clone, Serialize)]
pub struct PartitionReport {
    /// Partition name.
    pub partition: String,
    /// Partition file.
    pub path: String,
    /// Rows added, distributed writes included.
    pub rows_added: u64,
}

/// Outcome of [`run_multi`].
#[derive(Debug, Clone, Serialize)]
pub struct MultiReport {
    /// Worker threads per partition.
    pub threads: usize,
    /// Operations per worker.
    pub operations_per_thread: usize,
    /// Per-partition growth, in registration order.
    pub partitions: Vec<PartitionReport>,
    /// User created by the committed distributed transaction.
    pub distributed_user: RecordKey,
    /// Order created by the committed distributed transaction.
    pub distributed_order: RecordKey,
    /// Whether the committed order is readable afterwards.
    pub committed_visible: bool,
    /// Whether the rolled-back user is readable afterwards.
    pub rolled_back_visible: bool,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

/// One timed run of [`run_thread_modes`].
#[derive(Debug, Clone, Serialize)]
pub struct ThreadModeRun {
    /// Thread mode of the handles used.
    pub mode: &'static str,
    /// Database file.
    pub path: String,
    /// Rows inserted.
    pub rows_added: u64,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
}

/// Outcome of [`run_thread_modes`].
#[derive(Debug, Clone, Serialize)]
pub struct ThreadModeReport {
    /// Worker threads.
    pub threads: usize,
    /// Inserts per worker.
    pub operations_per_thread: usize,
    /// Serialized run, then unsynchronized run.
    pub runs: Vec<ThreadModeRun>,
}

// ============================================================================
// SECTION: Single Layout
// ============================================================================

/// Runs concurrent CRUD against one shared serialized handle.
///
/// # Errors
///
/// Returns the first [`StoreError`] raised by open, any worker or the batch.
pub fn run_single(
    path: &Path,
    connection: &ConnectionConfig,
    workload: WorkloadConfig,
    tag: &str,
) -> Result<SingleReport, StoreError> {
    let started = Instant::now();
    let coordinator = open_single(path, connection)?;
    let stores = RecordStores::attach_single(&coordinator)?;
    let before = TableCounts::read(&stores)?;
    info!(path = %path.display(), threads = workload.threads, "single-connection workload started");

    let orders_deleted = thread::scope(|scope| {
        let workers: Vec<_> = (0 .. workload.threads)
            .map(|worker| {
                let stores = &stores;
                scope.spawn(move || single_worker(stores, worker, workload.operations, tag))
            })
            .collect();
        workers.into_iter().map(join_worker).sum::<Result<usize, StoreError>>()
    })?;

    let batch: Vec<RecordOp<Products>> = (0 .. BATCH_SIZE)
        .map(|item| {
            RecordOp::Create(NewProduct::new(format!("{tag} batch {item}"), 1.0, INITIAL_STOCK))
        })
        .collect();
    let batch_created = stores.products.batch(batch)?.len();

    let added = TableCounts::read(&stores)?.since(before);
    let elapsed_ms = elapsed_ms(started);
    info!(elapsed_ms, orders_deleted, "single-connection workload finished");
    Ok(SingleReport {
        path: path.display().to_string(),
        threads: workload.threads,
        operations_per_thread: workload.operations,
        added,
        orders_deleted,
        batch_created,
        elapsed_ms,
    })
}

/// One worker of the single-layout workload; returns the orders it deleted.
fn single_worker(
    stores: &RecordStores,
    worker: usize,
    operations: usize,
    tag: &str,
) -> Result<usize, StoreError> {
    let mut deleted = 0;
    for op in 0 .. operations {
        let name = format!("{tag}-w{worker}-u{op}");
        let amount = AMOUNTS[op % AMOUNTS.len()];
        let user = stores.users.create(&NewUser::new(&name, format!("{name}@example.com")))?;
        let order = stores.orders.create(&NewOrder::pending(user, amount))?;
        let product_draft = NewProduct::new(format!("{name} item"), amount, INITIAL_STOCK);
        let product = stores.products.create(&product_draft)?;
        stores.orders.update(order, &OrderUpdate {
            total_amount: amount,
            status: OrderStatus::Processing,
        })?;
        stores.products.adjust_stock(product, -1)?;
        if op % DELETE_EVERY == DELETE_EVERY - 1 && stores.orders.delete(order)?.is_applied() {
            deleted += 1;
        }
    }
    Ok(deleted)
}

// ============================================================================
// SECTION: Partitioned Layout
// ============================================================================

/// Runs per-partition workloads in parallel, then one committed and one
/// rolled-back distributed transaction.
///
/// # Errors
///
/// Returns the first [`StoreError`] raised by open, any worker or either
/// distributed transaction (including [`StoreError::PartialCommit`]).
pub fn run_multi(
    layout: &MultiConfig,
    connection: &ConnectionConfig,
    workload: WorkloadConfig,
    tag: &str,
) -> Result<MultiReport, StoreError> {
    let started = Instant::now();
    let coordinator = open_partition_files(connection, |domain| layout.partition_path(domain))?;
    let stores = RecordStores::attach_partitioned(&coordinator)?;
    let before = TableCounts::read(&stores)?;
    info!(
        directory = %layout.directory.display(),
        threads = workload.threads,
        "multi-connection workload started"
    );

    thread::scope(|scope| {
        let mut workers: Vec<ScopedJoinHandle<'_, Result<(), StoreError>>> = Vec::new();
        for worker in 0 .. workload.threads {
            let stores = &stores;
            let operations = workload.operations;
            workers.push(scope.spawn(move || {
                for op in 0 .. operations {
                    let name = format!("{tag}-p{worker}-u{op}");
                    stores.users.create(&NewUser::new(&name, format!("{name}@example.com")))?;
                }
                Ok(())
            }));
            workers.push(scope.spawn(move || {
                for op in 0 .. operations {
                    let user = RecordKey::try_from(op).unwrap_or(RecordKey::MAX);
                    stores.orders.create(&NewOrder::pending(user, AMOUNTS[op % AMOUNTS.len()]))?;
                }
                Ok(())
            }));
            workers.push(scope.spawn(move || {
                for op in 0 .. operations {
                    let name = format!("{tag} part {worker}-{op}");
                    stores.products.create(&NewProduct::new(name, 5.0, INITIAL_STOCK))?;
                }
                Ok(())
            }));
        }
        workers.into_iter().try_for_each(join_worker)
    })?;

    let (distributed_user, distributed_order) = {
        let mut tx = coordinator.begin_distributed()?;
        let name = format!("{tag}-distributed");
        let user = stores.users.create_in(
            tx.session(&TableDomain::Users)?,
            &NewUser::new(&name, format!("{name}@example.com")),
        )?;
        let order_draft = NewOrder::pending(user, 42.0);
        let order = stores.orders.create_in(tx.session(&TableDomain::Orders)?, &order_draft)?;
        tx.commit()?;
        (user, order)
    };
    let committed_visible = stores.orders.read_one(distributed_order)?.is_some();

    let rolled_back = format!("{tag}-rolled-back");
    {
        let mut tx = coordinator.begin_distributed()?;
        let user = stores.users.create_in(
            tx.session(&TableDomain::Users)?,
            &NewUser::new(&rolled_back, format!("{rolled_back}@example.com")),
        )?;
        stores.orders.create_in(tx.session(&TableDomain::Orders)?, &NewOrder::pending(user, 1.0))?;
        tx.rollback()?;
    }
    let rolled_back_visible =
        !stores.users.read_all(Some(&UserFilter::Username(rolled_back)))?.is_empty();

    let added = TableCounts::read(&stores)?.since(before);
    let partitions = TableDomain::ALL
        .into_iter()
        .map(|domain| PartitionReport {
            partition: domain.to_string(),
            path: layout.partition_path(domain).display().to_string(),
            rows_added: match domain {
                TableDomain::Users => added.users,
                TableDomain::Orders => added.orders,
                TableDomain::Products => added.products,
            },
        })
        .collect();
    let elapsed_ms = elapsed_ms(started);
    info!(elapsed_ms, committed_visible, rolled_back_visible, "multi-connection workload finished");
    Ok(MultiReport {
        threads: workload.threads,
        operations_per_thread: workload.operations,
        partitions,
        distributed_user,
        distributed_order,
        committed_visible,
        rolled_back_visible,
        elapsed_ms,
    })
}

// ============================================================================
// SECTION: Thread Modes
// ============================================================================

/// Times the same product inserts through one shared serialized handle and
/// through one unsynchronized handle per worker.
///
/// # Errors
///
/// Returns the first [`StoreError`] raised by either run.
pub fn run_thread_modes(
    directory: &Path,
    connection: &ConnectionConfig,
    workload: WorkloadConfig,
    tag: &str,
) -> Result<ThreadModeReport, StoreError> {
    let serialized = timed_run(
        &directory.join("thread_mode_serialized.db"),
        ThreadMode::Serialized,
        connection,
        workload,
        tag,
    )?;
    let unsynchronized = timed_run(
        &directory.join("thread_mode_unsynchronized.db"),
        ThreadMode::Unsynchronized,
        connection,
        workload,
        tag,
    )?;
    info!(
        serialized_ms = serialized.elapsed_ms,
        unsynchronized_ms = unsynchronized.elapsed_ms,
        "thread mode comparison finished"
    );
    Ok(ThreadModeReport {
        threads: workload.threads,
        operations_per_thread: workload.operations,
        runs: vec![serialized, unsynchronized],
    })
}

/// Runs the insert workload in one thread mode.
///
/// Serialized workers share one handle; unsynchronized workers each open
/// their own.
fn timed_run(
    path: &Path,
    mode: ThreadMode,
    connection: &ConnectionConfig,
    workload: WorkloadConfig,
    tag: &str,
) -> Result<ThreadModeRun, StoreError> {
    let setup = ConnectionHandle::open(mode.as_str(), path, connection, mode)?;
    setup.with_lock(|session| session.execute_batch(Products::DDL))?;
    let store = ProductStore::attach(setup)?;
    let before = store.count()?;

    let started = Instant::now();
    thread::scope(|scope| {
        let workers: Vec<_> = (0 .. workload.threads)
            .map(|worker| {
                let store = &store;
                scope.spawn(move || match mode {
                    ThreadMode::Serialized => {
                        insert_products(store, worker, workload.operations, tag)
                    }
                    ThreadMode::Unsynchronized => {
                        let handle = ConnectionHandle::open(
                            format!("{}-{worker}", mode.as_str()),
                            path,
                            connection,
                            mode,
                        )?;
                        let own = ProductStore::attach(handle)?;
                        insert_products(&own, worker, workload.operations, tag)
                    }
                })
            })
            .collect();
        workers.into_iter().try_for_each(join_worker)
    })?;
    let elapsed_ms = elapsed_ms(started);

    let rows_added = store.count()?.saturating_sub(before);
    info!(mode = mode.as_str(), elapsed_ms, rows_added, "thread mode run finished");
    Ok(ThreadModeRun {
        mode: mode.as_str(),
        path: path.display().to_string(),
        rows_added,
        elapsed_ms,
    })
}

/// Inserts `operations` products through `store`.
fn insert_products(
    store: &ProductStore,
    worker: usize,
    operations: usize,
    tag: &str,
) -> Result<(), StoreError> {
    for op in 0 .. operations {
        store.create(&NewProduct::new(format!("{tag} mode {worker}-{op}"), 2.5, INITIAL_STOCK))?;
    }
    Ok(())
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Joins a scoped worker, turning a panic into an error.
fn join_worker<T>(
    worker: ScopedJoinHandle<'_, Result<T, StoreError>>,
) -> Result<T, StoreError> {
    worker.join().map_err(|_| StoreError::Invalid("workload thread panicked".to_string()))?
}

/// Milliseconds elapsed since `started`, saturating.
fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
