// crates/keel-store-sqlite/src/distributed.rs
// ============================================================================
// Module: Distributed Transaction
// Description: Manual begin/commit/rollback fan-out across partitions.
// Purpose: Make multi-partition writes atomic where the engine allows it and
//          report partial commits where it does not.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! A [`DistributedTransaction`] locks every partition of a
//! [`MultiConnectionCoordinator`] in registration order and issues
//! `BEGIN IMMEDIATE` on each. Work runs through the held sessions. Commit
//! walks the partitions in the same order; local commits already made cannot
//! be undone, so a later failure is reported as [`StoreError::PartialCommit`].
//!
//! State machine: `Idle -> Open -> {Committed | RolledBack}`. Terminal states
//! are final; a new transaction is needed for further work.

// ============================================================================
// SECTION: Imports
// ============================================================================

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::error::StoreError;
use crate::handle::BeginMode;
use crate::handle::HandleGuard;
use crate::multi::MultiConnectionCoordinator;
use crate::multi::PartitionKey;

// ============================================================================
// SECTION: State
// ============================================================================

/// Lifecycle state of a distributed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Not yet begun.
    Idle,
    /// Every partition holds an open local transaction.
    Open,
    /// Every partition committed.
    Committed,
    /// Rolled back, or failed.
    RolledBack,
}

impl TransactionState {
    /// Returns a short label for errors and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Open => "open",
            Self::Committed => "committed",
            Self::RolledBack => "rolled_back",
        }
    }
}

// ============================================================================
// SECTION: Transaction
// ============================================================================

/// Cross-partition transaction scoped to its coordinator.
///
/// # Invariants
/// - While `Open`, every partition lock is held and the coordinator's
///   distributed flag is set. The flag is never set before every partition
///   has begun.
/// - Locks and the flag are released on every exit path, including drop.
pub struct DistributedTransaction<'c, P: PartitionKey> {
    /// Coordinator whose partitions take part.
    coordinator: &'c MultiConnectionCoordinator<P>,
    /// Current state.
    state: TransactionState,
    /// Held partition sessions in registration order.
    sessions: Vec<(P, HandleGuard<'c>)>,
}

impl<'c, P: PartitionKey> DistributedTransaction<'c, P> {
    /// Creates an idle transaction.
    #[must_use]
    pub const fn new(coordinator: &'c MultiConnectionCoordinator<P>) -> Self {
        Self {
            coordinator,
            state: TransactionState::Idle,
            sessions: Vec::new(),
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> TransactionState {
        self.state
    }

    /// Locks every partition in registration order and begins a local
    /// transaction on each.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyInTransaction`] when another distributed
    /// transaction is open, [`StoreError::InvalidState`] when not idle, and
    /// the first begin failure otherwise (the transaction is then rolled back).
    /// A begin racing another begin that is still starting waits for it and
    /// proceeds if that one fails.
    pub fn begin(&mut self) -> Result<(), StoreError> {
        if self.state != TransactionState::Idle {
            return Err(self.invalid_state("idle"));
        }
        let coordinator = self.coordinator;
        if coordinator.in_distributed_transaction() {
            return Err(StoreError::AlreadyInTransaction);
        }
        let _starting = coordinator.enter_begin();
        if coordinator.in_distributed_transaction() {
            return Err(StoreError::AlreadyInTransaction);
        }
        let mut sessions = Vec::with_capacity(coordinator.len());
        for partition in coordinator.entries() {
            let started = partition.handle.lock().and_then(|guard| {
                guard.begin(BeginMode::Immediate)?;
                Ok(guard)
            });
            match started {
                Ok(guard) => sessions.push((partition.key.clone(), guard)),
                Err(error) => {
                    warn!(partition = %partition.key, %error, "distributed begin failed");
                    rollback_sessions(&sessions);
                    self.state = TransactionState::RolledBack;
                    return Err(error);
                }
            }
        }
        coordinator.mark_distributed();
        debug!(partitions = sessions.len(), "distributed transaction open");
        self.sessions = sessions;
        self.state = TransactionState::Open;
        Ok(())
    }

    /// Returns the held session of `partition` for work inside the
    /// transaction.
    ///
    /// The transaction holds every partition lock, so work must go through
    /// this guard; locking calls on a partition handle from this thread fail
    /// with [`StoreError::Invalid`] until the transaction ends.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] when not open and
    /// [`StoreError::UnknownPartition`] for unregistered keys.
    pub fn session(&self, partition: &P) -> Result<&HandleGuard<'c>, StoreError> {
        if self.state != TransactionState::Open {
            return Err(self.invalid_state("open"));
        }
        self.sessions
            .iter()
            .find(|(key, _)| key == partition)
            .map(|(_, guard)| guard)
            .ok_or_else(|| StoreError::UnknownPartition(partition.to_string()))
    }

    /// Commits every partition in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] when not open. When a local
    /// commit fails, every partition gets a best-effort rollback and the
    /// result is [`StoreError::PartialCommit`] if an earlier partition had
    /// already committed, or the commit error otherwise.
    pub fn commit(&mut self) -> Result<(), StoreError> {
        if self.state != TransactionState::Open {
            return Err(self.invalid_state("open"));
        }
        let sessions = std::mem::take(&mut self.sessions);
        let mut committed = Vec::with_capacity(sessions.len());
        let mut failure = None;
        for (key, guard) in &sessions {
            match guard.commit() {
                Ok(()) => committed.push(key.to_string()),
                Err(error) => {
                    failure = Some((key.to_string(), error));
                    break;
                }
            }
        }
        let outcome = match failure {
            None => {
                self.state = TransactionState::Committed;
                info!(partitions = committed.len(), "distributed transaction committed");
                Ok(())
            }
            Some((failed, error)) => {
                rollback_sessions(&sessions);
                self.state = TransactionState::RolledBack;
                if committed.is_empty() {
                    warn!(partition = %failed, %error, "distributed commit failed, rolled back");
                    Err(error)
                } else {
                    warn!(
                        committed = %committed.join(","),
                        partition = %failed,
                        %error,
                        "distributed commit partially applied"
                    );
                    Err(StoreError::PartialCommit {
                        committed,
                        failed,
                        message: error.to_string(),
                    })
                }
            }
        };
        drop(sessions);
        self.coordinator.release_distributed();
        outcome
    }

    /// Rolls back every partition, logging individual failures.
    ///
    /// From `Idle` this only marks the transaction rolled back.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidState`] from a terminal state.
    pub fn rollback(&mut self) -> Result<(), StoreError> {
        match self.state {
            TransactionState::Open => {
                let sessions = std::mem::take(&mut self.sessions);
                rollback_sessions(&sessions);
                drop(sessions);
                self.coordinator.release_distributed();
                self.state = TransactionState::RolledBack;
                info!("distributed transaction rolled back");
                Ok(())
            }
            TransactionState::Idle => {
                self.state = TransactionState::RolledBack;
                Ok(())
            }
            TransactionState::Committed | TransactionState::RolledBack => {
                Err(self.invalid_state("open"))
            }
        }
    }

    /// Builds an invalid-state error for the current state.
    const fn invalid_state(&self, expected: &'static str) -> StoreError {
        StoreError::InvalidState {
            expected,
            actual: self.state.as_str(),
        }
    }
}

impl<P: PartitionKey> Drop for DistributedTransaction<'_, P> {
    fn drop(&mut self) {
        if self.state == TransactionState::Open {
            warn!("distributed transaction dropped while open, rolling back");
            if let Err(error) = self.rollback() {
                warn!(%error, "forced rollback failed");
            }
        }
    }
}

/// Attempts a rollback on every session, including already-committed ones.
fn rollback_sessions<P: PartitionKey>(sessions: &[(P, HandleGuard<'_>)]) {
    for (key, guard) in sessions {
        let active = guard.in_transaction();
        match guard.rollback() {
            Ok(()) => debug!(partition = %key, "partition rolled back"),
            Err(error) if active => warn!(partition = %key, %error, "partition rollback failed"),
            Err(_) => debug!(partition = %key, "partition had no open transaction"),
        }
    }
}
