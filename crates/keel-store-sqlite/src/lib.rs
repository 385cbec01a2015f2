// crates/keel-store-sqlite/src/lib.rs
// ============================================================================
// Module: Keel SQLite Coordinator
// Description: Coordinated access to embedded SQLite storage.
// Purpose: Share, partition and transact over SQLite sessions safely.
// Dependencies: rusqlite, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! This crate owns `SQLite` sessions and arbitrates access to them. Two
//! architectures are provided: a [`SingleConnectionCoordinator`] that shares
//! one serialized handle with every client, and a
//! [`MultiConnectionCoordinator`] that gives each partition its own file and
//! unsynchronized handle, with [`DistributedTransaction`] for work spanning
//! partitions. Record stores bind to one handle through the generic
//! [`RecordStore`] contract.
//!
//! SQL templates are fixed at compile time and every value is bound
//! positionally.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod distributed;
pub mod error;
pub mod handle;
pub mod multi;
pub mod record;
pub mod single;
pub mod statement;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConnectionConfig;
pub use config::DEFAULT_CACHE_SIZE;
pub use config::JournalMode;
pub use config::SyncMode;
pub use config::TempStore;
pub use config::ThreadMode;
pub use distributed::DistributedTransaction;
pub use distributed::TransactionState;
pub use error::ExecErrorKind;
pub use error::StoreError;
pub use handle::BatchOp;
pub use handle::BeginMode;
pub use handle::ConnectionHandle;
pub use handle::HandleGuard;
pub use multi::MultiConnectionBuilder;
pub use multi::MultiConnectionCoordinator;
pub use multi::PartitionKey;
pub use record::FilterQuery;
pub use record::RecordKey;
pub use record::RecordOp;
pub use record::RecordOpOutcome;
pub use record::RecordSchema;
pub use record::RecordStore;
pub use record::RecordTemplates;
pub use record::WriteOutcome;
pub use rusqlite::types::Value;
pub use single::SingleConnectionCoordinator;
pub use statement::Execution;
pub use statement::ResultSet;
pub use statement::RowView;
pub use statement::StatementCache;
pub use statement::StatementId;
