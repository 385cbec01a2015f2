// crates/keel-store-sqlite/src/multi.rs
// ============================================================================
// Module: Multi-Connection Coordinator
// Description: One unsynchronized handle per data partition.
// Purpose: Route each partition to its own database file and session.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! The multi-connection architecture opens one handle per partition, each on
//! its own file and in unsynchronized mode. Partitions are registered through
//! [`MultiConnectionBuilder`]; the set is frozen by
//! [`MultiConnectionBuilder::open`] and lookups afterwards are read-only. Work
//! spanning partitions goes through [`crate::DistributedTransaction`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use tracing::debug;
use tracing::info;

use crate::config::ConnectionConfig;
use crate::config::ThreadMode;
use crate::distributed::DistributedTransaction;
use crate::error::StoreError;
use crate::handle::ConnectionHandle;

// ============================================================================
// SECTION: Partition Keys
// ============================================================================

/// Identifier of a data partition.
///
/// Closed enums give a compile-time-checked partition set; strings or other
/// keys work for sets registered at runtime.
pub trait PartitionKey:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

impl<T> PartitionKey for T where
    T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
}

/// Registered partition awaiting open.
#[derive(Debug)]
struct PartitionSpec<P> {
    /// Partition key.
    key: P,
    /// Database file path.
    path: PathBuf,
    /// Idempotent schema script.
    schema: String,
}

/// Opened partition.
#[derive(Debug)]
pub(crate) struct Partition<P> {
    /// Partition key.
    pub(crate) key: P,
    /// Partition handle.
    pub(crate) handle: ConnectionHandle,
}

// ============================================================================
// SECTION: Builder
// ============================================================================

/// Registration phase of a [`MultiConnectionCoordinator`].
#[derive(Debug)]
pub struct MultiConnectionBuilder<P: PartitionKey> {
    /// Configuration applied to every partition handle.
    config: ConnectionConfig,
    /// Partitions in registration order.
    specs: Vec<PartitionSpec<P>>,
}

impl<P: PartitionKey> MultiConnectionBuilder<P> {
    /// Starts a registration with a shared connection configuration.
    #[must_use]
    pub const fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            specs: Vec::new(),
        }
    }

    /// Registers a partition with its file and schema script.
    #[must_use]
    pub fn register_partition(
        mut self,
        key: P,
        path: impl Into<PathBuf>,
        schema: impl Into<String>,
    ) -> Self {
        self.specs.push(PartitionSpec {
            key,
            path: path.into(),
            schema: schema.into(),
        });
        self
    }

    /// Opens every registered partition in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for an empty or duplicate registration
    /// and the first open, configuration or schema failure otherwise. Handles
    /// opened before the failure are closed.
    pub fn open(self) -> Result<MultiConnectionCoordinator<P>, StoreError> {
        if self.specs.is_empty() {
            return Err(StoreError::Invalid("no partitions registered".to_string()));
        }
        let mut index = HashMap::with_capacity(self.specs.len());
        for (position, spec) in self.specs.iter().enumerate() {
            if index.insert(spec.key.clone(), position).is_some() {
                return Err(StoreError::Invalid(format!(
                    "partition {} registered twice",
                    spec.key
                )));
            }
        }
        let mut partitions = Vec::with_capacity(self.specs.len());
        for spec in self.specs {
            let handle = ConnectionHandle::open(
                spec.key.to_string(),
                &spec.path,
                &self.config,
                ThreadMode::Unsynchronized,
            )?;
            handle.with_lock(|guard| guard.execute_batch(&spec.schema))?;
            debug!(partition = %spec.key, path = %spec.path.display(), "partition ready");
            partitions.push(Partition {
                key: spec.key,
                handle,
            });
        }
        info!(partitions = partitions.len(), "multi-connection coordinator ready");
        Ok(MultiConnectionCoordinator {
            partitions,
            index,
            in_distributed: AtomicBool::new(false),
            begin_lock: Mutex::new(()),
        })
    }
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Coordinator owning one handle per partition.
///
/// # Invariants
/// - The partition set never changes after open.
/// - At most one distributed transaction is open at a time.
/// - The distributed flag is set only after every partition has begun.
#[derive(Debug)]
pub struct MultiConnectionCoordinator<P: PartitionKey> {
    /// Partitions in registration order.
    partitions: Vec<Partition<P>>,
    /// Lookup from key to position.
    index: HashMap<P, usize>,
    /// Reentrancy flag of distributed transactions.
    in_distributed: AtomicBool,
    /// Serializes distributed begins while partitions are being locked.
    begin_lock: Mutex<()>,
}

impl<P: PartitionKey> MultiConnectionCoordinator<P> {
    /// Starts a partition registration.
    #[must_use]
    pub const fn builder(config: ConnectionConfig) -> MultiConnectionBuilder<P> {
        MultiConnectionBuilder::new(config)
    }

    /// Returns a new shared reference to a partition handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownPartition`] for unregistered keys.
    pub fn handle(&self, partition: &P) -> Result<ConnectionHandle, StoreError> {
        Ok(self.partition(partition)?.handle.share())
    }

    /// Returns the database path of a partition.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownPartition`] for unregistered keys.
    pub fn path(&self, partition: &P) -> Result<&Path, StoreError> {
        Ok(self.partition(partition)?.handle.path())
    }

    /// Iterates partition keys in registration order.
    pub fn partitions(&self) -> impl Iterator<Item = &P> {
        self.partitions.iter().map(|partition| &partition.key)
    }

    /// Returns the number of partitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    /// Returns true when the coordinator has no partitions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Returns true while a distributed transaction is open.
    ///
    /// A begin that is still locking partitions does not count.
    #[must_use]
    pub fn in_distributed_transaction(&self) -> bool {
        self.in_distributed.load(Ordering::Acquire)
    }

    /// Creates an idle distributed transaction over every partition.
    #[must_use]
    pub const fn distributed(&self) -> DistributedTransaction<'_, P> {
        DistributedTransaction::new(self)
    }

    /// Creates a distributed transaction and begins it.
    ///
    /// # Errors
    ///
    /// See [`DistributedTransaction::begin`].
    pub fn begin_distributed(&self) -> Result<DistributedTransaction<'_, P>, StoreError> {
        let mut transaction = self.distributed();
        transaction.begin()?;
        Ok(transaction)
    }

    /// Returns partitions in registration order.
    pub(crate) fn entries(&self) -> &[Partition<P>] {
        &self.partitions
    }

    /// Enters the begin phase of a distributed transaction.
    ///
    /// Concurrent begins wait here for each other; the returned guard must be
    /// held until the flag is set or the begin has failed.
    pub(crate) fn enter_begin(&self) -> MutexGuard<'_, ()> {
        self.begin_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets the distributed-transaction flag once every partition has begun.
    pub(crate) fn mark_distributed(&self) {
        self.in_distributed.store(true, Ordering::Release);
    }

    /// Releases the distributed-transaction flag.
    pub(crate) fn release_distributed(&self) {
        self.in_distributed.store(false, Ordering::Release);
    }

    /// Resolves a key to its partition.
    fn partition(&self, partition: &P) -> Result<&Partition<P>, StoreError> {
        self.index
            .get(partition)
            .and_then(|position| self.partitions.get(*position))
            .ok_or_else(|| StoreError::UnknownPartition(partition.to_string()))
    }
}
