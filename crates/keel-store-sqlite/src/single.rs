// crates/keel-store-sqlite/src/single.rs
// ============================================================================
// Module: Single-Connection Coordinator
// Description: One serialized handle shared by every record store.
// Purpose: Serialize all access to one database file through one session.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! The single-connection architecture opens one handle in serialized mode and
//! shares it with every client. Each logical operation takes the handle lock
//! for its duration; batches hold it across the whole transaction bracket.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;

use tracing::info;

use crate::config::ConnectionConfig;
use crate::config::ThreadMode;
use crate::error::StoreError;
use crate::handle::BatchOp;
use crate::handle::BeginMode;
use crate::handle::ConnectionHandle;

/// Label of the only handle.
const SINGLE_HANDLE_LABEL: &str = "single";

// ============================================================================
// SECTION: Coordinator
// ============================================================================

/// Coordinator owning one serialized handle.
#[derive(Debug)]
pub struct SingleConnectionCoordinator {
    /// Shared handle.
    handle: ConnectionHandle,
}

impl SingleConnectionCoordinator {
    /// Opens the database and runs each schema script.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] or [`StoreError::Configuration`] when the
    /// handle cannot be opened and [`StoreError::Exec`] when a schema script
    /// fails; no coordinator exists after any failure.
    pub fn open(
        path: impl AsRef<Path>,
        config: &ConnectionConfig,
        schema_scripts: &[&str],
    ) -> Result<Self, StoreError> {
        let handle =
            ConnectionHandle::open(SINGLE_HANDLE_LABEL, path, config, ThreadMode::Serialized)?;
        let coordinator = Self {
            handle,
        };
        for script in schema_scripts {
            coordinator.initialize_schema(script)?;
        }
        info!(
            path = %coordinator.handle.path().display(),
            scripts = schema_scripts.len(),
            "single-connection coordinator ready"
        );
        Ok(coordinator)
    }

    /// Returns a new shared reference to the handle. Never blocks.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.share()
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.handle.path()
    }

    /// Runs an idempotent DDL script on the handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when the script fails.
    pub fn initialize_schema(&self, ddl: &str) -> Result<(), StoreError> {
        self.handle.with_lock(|guard| guard.execute_batch(ddl))
    }

    /// Runs `ops` in one local transaction, rolling back at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failing operation's error or the commit failure.
    pub fn run_batch<T>(&self, ops: Vec<BatchOp<'_, T>>) -> Result<Vec<T>, StoreError> {
        self.handle.run_batch(BeginMode::Deferred, ops)
    }
}
