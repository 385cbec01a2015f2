// crates/keel-store-sqlite/src/error.rs
// ============================================================================
// Module: Store Errors
// Description: Typed failure taxonomy for handles, statements and transactions.
// Purpose: Give every coordinator operation a typed, non-panicking failure.
// Dependencies: rusqlite, thiserror
// ============================================================================

//! ## Overview
//! Every public coordinator operation returns [`StoreError`] on failure.
//! Open and configuration failures are fatal to construction; execution
//! failures are returned to callers; partial distributed commits are reported
//! distinctly from clean rollbacks.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::ErrorCode;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Coarse classification of engine execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecErrorKind {
    /// Busy timeout exceeded while waiting for a conflicting lock.
    Busy,
    /// Table or database locked within the same connection.
    Locked,
    /// Constraint violation (unique, foreign key, check, not null).
    Constraint,
    /// Any other engine failure.
    Other,
}

impl ExecErrorKind {
    /// Classifies a `rusqlite` error by its primary result code.
    #[must_use]
    pub fn classify(error: &rusqlite::Error) -> Self {
        match error.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) => Self::Busy,
            Some(ErrorCode::DatabaseLocked) => Self::Locked,
            Some(ErrorCode::ConstraintViolation) => Self::Constraint,
            _ => Self::Other,
        }
    }
}

/// Coordinator errors.
///
/// # Invariants
/// - Messages carry engine error text and SQL templates, never bound values.
#[derive(Debug, Error, Clone)]
pub enum StoreError {
    /// The storage file could not be opened or created.
    #[error("cannot open {path}: {message}")]
    Open {
        /// Database path that failed to open.
        path: String,
        /// Engine error text.
        message: String,
    },
    /// A pragma or mode setting was rejected at open time.
    #[error("configuration of {setting} rejected: {message}")]
    Configuration {
        /// Setting that failed (pragma name).
        setting: &'static str,
        /// Engine error text or mismatch description.
        message: String,
    },
    /// SQL failed to compile.
    #[error("prepare failed for `{sql}`: {message}")]
    Prepare {
        /// SQL text that failed to compile.
        sql: String,
        /// Engine error text.
        message: String,
    },
    /// Runtime engine failure while executing a statement.
    #[error("{operation} failed: {message}")]
    Exec {
        /// Operation or SQL being executed.
        operation: String,
        /// Failure class.
        kind: ExecErrorKind,
        /// Engine error text.
        message: String,
    },
    /// Partition lookup miss on a multi-connection coordinator.
    #[error("unknown partition: {0}")]
    UnknownPartition(String),
    /// A distributed transaction is already open on the coordinator.
    #[error("a distributed transaction is already open")]
    AlreadyInTransaction,
    /// Distributed commit succeeded on some partitions and failed on another.
    #[error(
        "partial commit: committed [{}], failed on {failed}: {message}",
        committed.join(", ")
    )]
    PartialCommit {
        /// Partitions whose local commit is already durable.
        committed: Vec<String>,
        /// Partition whose local commit failed.
        failed: String,
        /// Engine error text of the failed commit.
        message: String,
    },
    /// Bound parameter count does not match the statement placeholders.
    #[error("binding mismatch for `{sql}`: expected {expected} parameters, got {actual}")]
    BindingMismatch {
        /// Statement SQL text.
        sql: String,
        /// Placeholder count reported at prepare time.
        expected: usize,
        /// Number of values supplied.
        actual: usize,
    },
    /// Statement identifier not issued by this cache.
    #[error("unknown statement id {0}")]
    UnknownStatement(usize),
    /// Statement cache used after `finalize_all`.
    #[error("statement cache already finalized")]
    Finalized,
    /// A session guard from a different handle was supplied.
    #[error("session belongs to handle {actual}, expected {expected}")]
    ForeignSession {
        /// Label of the handle the cache is bound to.
        expected: String,
        /// Label of the handle the guard belongs to.
        actual: String,
    },
    /// Operation not valid in the current transaction state.
    #[error("invalid transaction state: expected {expected}, found {actual}")]
    InvalidState {
        /// State required by the operation.
        expected: &'static str,
        /// Current state.
        actual: &'static str,
    },
    /// Row could not be decoded into a typed record.
    #[error("row decode failed: {0}")]
    Decode(String),
    /// A handle mutex was poisoned by a panicking holder.
    #[error("handle {0} mutex poisoned")]
    Poisoned(String),
    /// Invalid caller input or configuration.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl StoreError {
    /// Builds an [`StoreError::Exec`] from a `rusqlite` error.
    #[must_use]
    pub fn exec(operation: impl Into<String>, error: &rusqlite::Error) -> Self {
        Self::Exec {
            operation: operation.into(),
            kind: ExecErrorKind::classify(error),
            message: error.to_string(),
        }
    }

    /// Returns the execution failure class, if this is an execution error.
    #[must_use]
    pub const fn exec_kind(&self) -> Option<ExecErrorKind> {
        match self {
            Self::Exec {
                kind, ..
            } => Some(*kind),
            _ => None,
        }
    }

    /// Returns true when the error was a busy-timeout expiry.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self.exec_kind(), Some(ExecErrorKind::Busy))
    }

    /// Returns true when the error was a constraint violation.
    #[must_use]
    pub const fn is_constraint(&self) -> bool {
        matches!(self.exec_kind(), Some(ExecErrorKind::Constraint))
    }
}
