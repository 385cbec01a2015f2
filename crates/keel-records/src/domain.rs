// crates/keel-records/src/domain.rs
// ============================================================================
// Module: Table Domains
// Description: Partition keys and coordinator constructors for the business
//              tables.
// Purpose: Open the users/orders/products schema under either architecture.
// Dependencies: keel-store-sqlite, serde, tracing
// ============================================================================

//! ## Overview
//! [`TableDomain`] is the closed partition set of the multi-connection
//! architecture: one file per table. [`open_single`] puts all three tables in
//! one file instead. [`RecordStores`] attaches one store per table to
//! whichever coordinator was opened.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::path::Path;
use std::path::PathBuf;

use keel_store_sqlite::ConnectionConfig;
use keel_store_sqlite::MultiConnectionCoordinator;
use keel_store_sqlite::RecordSchema;
use keel_store_sqlite::SingleConnectionCoordinator;
use keel_store_sqlite::StoreError;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::orders::ORDERS_LINKED_DDL;
use crate::orders::OrderStore;
use crate::orders::Orders;
use crate::products::ProductStore;
use crate::products::Products;
use crate::users::UserStore;
use crate::users::Users;

// ============================================================================
// SECTION: Domains
// ============================================================================

/// Business table, used as the partition key of the multi-connection
/// architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableDomain {
    /// Users table.
    Users,
    /// Orders table.
    Orders,
    /// Products table.
    Products,
}

impl TableDomain {
    /// Every domain, in registration order.
    pub const ALL: [Self; 3] = [Self::Users, Self::Orders, Self::Products];

    /// Returns the short name of the domain.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Orders => "orders",
            Self::Products => "products",
        }
    }

    /// Returns the default database file name of the domain's partition.
    #[must_use]
    pub const fn default_file_name(self) -> &'static str {
        match self {
            Self::Users => "users_db.db",
            Self::Orders => "orders_db.db",
            Self::Products => "products_db.db",
        }
    }

    /// Returns the standalone schema of the domain's partition.
    #[must_use]
    pub const fn schema(self) -> &'static str {
        match self {
            Self::Users => Users::DDL,
            Self::Orders => Orders::DDL,
            Self::Products => Products::DDL,
        }
    }
}

impl fmt::Display for TableDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Constructors
// ============================================================================

/// Schema scripts of the single-file layout, in dependency order.
pub const SINGLE_FILE_SCHEMA: [&str; 3] = [Users::DDL, ORDERS_LINKED_DDL, Products::DDL];

/// Opens every business table in one file behind one serialized handle.
///
/// # Errors
///
/// Returns [`StoreError`] when the file cannot be opened, configured or
/// initialized.
pub fn open_single(
    path: impl AsRef<Path>,
    config: &ConnectionConfig,
) -> Result<SingleConnectionCoordinator, StoreError> {
    SingleConnectionCoordinator::open(path, config, &SINGLE_FILE_SCHEMA)
}

/// Opens one partition file per business table under `directory`, using the
/// default file names.
///
/// # Errors
///
/// Returns [`StoreError`] when any partition cannot be opened, configured or
/// initialized.
pub fn open_partitioned(
    directory: impl AsRef<Path>,
    config: &ConnectionConfig,
) -> Result<MultiConnectionCoordinator<TableDomain>, StoreError> {
    let directory = directory.as_ref();
    open_partition_files(config, |domain| directory.join(domain.default_file_name()))
}

/// Opens one partition file per business table at the path chosen by
/// `path_of`.
///
/// # Errors
///
/// Returns [`StoreError`] when any partition cannot be opened, configured or
/// initialized.
pub fn open_partition_files(
    config: &ConnectionConfig,
    mut path_of: impl FnMut(TableDomain) -> PathBuf,
) -> Result<MultiConnectionCoordinator<TableDomain>, StoreError> {
    TableDomain::ALL
        .into_iter()
        .fold(MultiConnectionCoordinator::builder(config.clone()), |builder, domain| {
            let path = path_of(domain);
            debug!(domain = %domain, path = %path.display(), "registering partition");
            builder.register_partition(domain, path, domain.schema())
        })
        .open()
}

// ============================================================================
// SECTION: Store Bundle
// ============================================================================

/// One record store per business table.
pub struct RecordStores {
    /// Users store.
    pub users: UserStore,
    /// Orders store.
    pub orders: OrderStore,
    /// Products store.
    pub products: ProductStore,
}

impl RecordStores {
    /// Attaches every store to the single shared handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Prepare`] when a template does not compile.
    pub fn attach_single(coordinator: &SingleConnectionCoordinator) -> Result<Self, StoreError> {
        Ok(Self {
            users: UserStore::attach(coordinator.handle())?,
            orders: OrderStore::attach(coordinator.handle())?,
            products: ProductStore::attach(coordinator.handle())?,
        })
    }

    /// Attaches each store to its own partition handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Prepare`] when a template does not compile.
    pub fn attach_partitioned(
        coordinator: &MultiConnectionCoordinator<TableDomain>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            users: UserStore::attach(coordinator.handle(&TableDomain::Users)?)?,
            orders: OrderStore::attach(coordinator.handle(&TableDomain::Orders)?)?,
            products: ProductStore::attach(coordinator.handle(&TableDomain::Products)?)?,
        })
    }
}
