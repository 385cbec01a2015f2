// crates/keel-store-sqlite/tests/distributed_transaction.rs
// ============================================================================
// Module: Distributed Transaction Tests
// Description: Multi-partition coordinator construction and cross-partition
//              commit, rollback and failure reporting.
// Purpose: Validate atomicity where possible and honest partial-commit
//          reporting where not.
// ============================================================================

//! ## Overview
//! Integration tests for `MultiConnectionCoordinator` and
//! `DistributedTransaction`:
//! - Partition registration, lookup and reopen over existing files
//! - Commit visibility after reopen and rollback restoring prior state
//! - Partial commits surfaced with the committed partitions named
//! - Begin failures, reentrancy and drop-time rollback
//! - Partition independence while another partition is locked

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
    reason = "Test-only assertions and helpers are permitted."
)]

mod common;

use std::path::Path;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use keel_store_sqlite::ConnectionConfig;
use keel_store_sqlite::MultiConnectionCoordinator;
use keel_store_sqlite::RecordSchema;
use keel_store_sqlite::RecordStore;
use keel_store_sqlite::StatementCache;
use keel_store_sqlite::StoreError;
use keel_store_sqlite::ThreadMode;
use keel_store_sqlite::TransactionState;
use keel_store_sqlite::Value;
use rusqlite::Connection;
use tempfile::TempDir;

use crate::common::Notes;
use crate::common::draft;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Schema of the ledger partition; the foreign key is only checked at commit.
const LEDGER_DDL: &str = "
CREATE TABLE IF NOT EXISTS accounts (id INTEGER PRIMARY KEY);
CREATE TABLE IF NOT EXISTS entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id INTEGER NOT NULL
        REFERENCES accounts(id) DEFERRABLE INITIALLY DEFERRED
);";

const INSERT_ENTRY: &str = "INSERT INTO entries (account_id) VALUES (?1)";

fn open_pair(dir: &Path, config: &ConnectionConfig) -> MultiConnectionCoordinator<&'static str> {
    MultiConnectionCoordinator::builder(config.clone())
        .register_partition("notes", dir.join("notes.db"), Notes::DDL)
        .register_partition("ledger", dir.join("ledger.db"), LEDGER_DDL)
        .open()
        .unwrap()
}

fn count_rows(path: &Path, table: &str) -> i64 {
    let connection = Connection::open(path).unwrap();
    connection.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0)).unwrap()
}

// ============================================================================
// SECTION: Coordinator
// ============================================================================

#[test]
fn partitions_open_unsynchronized_in_registration_order() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let keys: Vec<&str> = coordinator.partitions().copied().collect();
    assert_eq!(keys, vec!["notes", "ledger"]);
    assert_eq!(coordinator.len(), 2);
    let handle = coordinator.handle(&"ledger").unwrap();
    assert_eq!(handle.thread_mode(), ThreadMode::Unsynchronized);
    assert_eq!(handle.label(), "ledger");
    assert_eq!(coordinator.path(&"notes").unwrap(), temp.path().join("notes.db"));
}

#[test]
fn unknown_partition_is_reported() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    match coordinator.handle(&"archive") {
        Err(StoreError::UnknownPartition(name)) => assert_eq!(name, "archive"),
        other => panic!("expected unknown partition, got {other:?}"),
    }
}

#[test]
fn empty_and_duplicate_registrations_are_rejected() {
    let temp = TempDir::new().unwrap();
    let empty = MultiConnectionCoordinator::<&str>::builder(ConnectionConfig::default()).open();
    assert!(matches!(empty, Err(StoreError::Invalid(_))));

    let duplicate = MultiConnectionCoordinator::builder(ConnectionConfig::default())
        .register_partition("notes", temp.path().join("a.db"), Notes::DDL)
        .register_partition("notes", temp.path().join("b.db"), Notes::DDL)
        .open();
    assert!(matches!(duplicate, Err(StoreError::Invalid(_))));
    assert!(!temp.path().join("a.db").exists(), "validation precedes any open");
}

#[test]
fn reopening_over_existing_schema_succeeds() {
    let temp = TempDir::new().unwrap();
    {
        let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
        let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
        notes.create(&draft("persisted")).unwrap();
    }
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
    assert_eq!(notes.count().unwrap(), 1);
}

// ============================================================================
// SECTION: Commit And Rollback
// ============================================================================

#[test]
fn committed_writes_are_visible_after_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
        let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
        let mut ledger = StatementCache::new(coordinator.handle(&"ledger").unwrap());
        let add_account = ledger.prepare("INSERT INTO accounts (id) VALUES (?1)").unwrap();
        let add_entry = ledger.prepare(INSERT_ENTRY).unwrap();

        let mut tx = coordinator.begin_distributed().unwrap();
        assert!(coordinator.in_distributed_transaction());
        notes.create_in(tx.session(&"notes").unwrap(), &draft("paired")).unwrap();
        let session = tx.session(&"ledger").unwrap();
        ledger.execute_in(session, add_account, &[Value::Integer(7)]).unwrap();
        ledger.execute_in(session, add_entry, &[Value::Integer(7)]).unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(!coordinator.in_distributed_transaction());
    }

    assert_eq!(count_rows(&temp.path().join("notes.db"), "notes"), 1);
    assert_eq!(count_rows(&temp.path().join("ledger.db"), "entries"), 1);
}

#[test]
fn rollback_restores_prior_state() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
    notes.create(&draft("before")).unwrap();

    let mut tx = coordinator.begin_distributed().unwrap();
    let session = tx.session(&"notes").unwrap();
    notes.create_in(session, &draft("during")).unwrap();
    assert_eq!(notes.count_in(session).unwrap(), 2);
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TransactionState::RolledBack);

    let titles: Vec<String> =
        notes.read_all(None).unwrap().into_iter().map(|note| note.title).collect();
    assert_eq!(titles, vec!["before".to_string()]);
    assert!(matches!(tx.commit(), Err(StoreError::InvalidState { .. })));
    assert!(matches!(tx.rollback(), Err(StoreError::InvalidState { .. })));
}

#[test]
fn partial_commit_names_committed_partitions() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
    let mut ledger = StatementCache::new(coordinator.handle(&"ledger").unwrap());
    let add_entry = ledger.prepare(INSERT_ENTRY).unwrap();

    let mut tx = coordinator.begin_distributed().unwrap();
    notes.create_in(tx.session(&"notes").unwrap(), &draft("durable")).unwrap();
    ledger.execute_in(tx.session(&"ledger").unwrap(), add_entry, &[Value::Integer(404)]).unwrap();

    match tx.commit() {
        Err(StoreError::PartialCommit {
            committed,
            failed,
            message,
        }) => {
            assert_eq!(committed, vec!["notes".to_string()]);
            assert_eq!(failed, "ledger");
            assert!(message.to_lowercase().contains("foreign key"), "message: {message}");
        }
        other => panic!("expected partial commit, got {other:?}"),
    }
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert!(!coordinator.in_distributed_transaction());
    assert_eq!(notes.count().unwrap(), 1);
    let entries = coordinator
        .handle(&"ledger")
        .unwrap()
        .with_lock(|guard| {
            assert!(!guard.in_transaction());
            guard.query_scalar::<i64>("SELECT COUNT(*) FROM entries")
        })
        .unwrap();
    assert_eq!(entries, 0);
}

#[test]
fn failure_on_first_partition_is_a_plain_rollback() {
    let temp = TempDir::new().unwrap();
    let coordinator = MultiConnectionCoordinator::builder(ConnectionConfig::default())
        .register_partition("ledger", temp.path().join("ledger.db"), LEDGER_DDL)
        .register_partition("notes", temp.path().join("notes.db"), Notes::DDL)
        .open()
        .unwrap();
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
    let mut ledger = StatementCache::new(coordinator.handle(&"ledger").unwrap());
    let add_entry = ledger.prepare(INSERT_ENTRY).unwrap();

    let mut tx = coordinator.begin_distributed().unwrap();
    ledger.execute_in(tx.session(&"ledger").unwrap(), add_entry, &[Value::Integer(1)]).unwrap();
    notes.create_in(tx.session(&"notes").unwrap(), &draft("discarded")).unwrap();

    let err = tx.commit().unwrap_err();
    assert!(err.is_constraint(), "unexpected error: {err:?}");
    assert_eq!(notes.count().unwrap(), 0);
}

// ============================================================================
// SECTION: Lifecycle Guards
// ============================================================================

#[test]
fn second_begin_fails_while_one_is_open() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let mut first = coordinator.begin_distributed().unwrap();

    let mut second = coordinator.distributed();
    assert!(matches!(second.begin(), Err(StoreError::AlreadyInTransaction)));
    assert_eq!(second.state(), TransactionState::Idle);

    thread::scope(|scope| {
        let outcome = scope.spawn(|| coordinator.begin_distributed().err()).join().unwrap();
        assert!(matches!(outcome, Some(StoreError::AlreadyInTransaction)));
    });

    first.commit().unwrap();
    let mut third = coordinator.begin_distributed().unwrap();
    third.rollback().unwrap();
}

#[test]
fn begin_failure_rolls_back_started_partitions() {
    let temp = TempDir::new().unwrap();
    let config = ConnectionConfig::default().with_busy_timeout_ms(50);
    let coordinator = open_pair(temp.path(), &config);

    let blocker = Connection::open(temp.path().join("ledger.db")).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    let mut tx = coordinator.distributed();
    let err = tx.begin().unwrap_err();
    assert!(err.is_busy(), "unexpected error: {err:?}");
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert!(!coordinator.in_distributed_transaction());
    assert!(!coordinator.handle(&"notes").unwrap().lock().unwrap().in_transaction());

    blocker.execute_batch("ROLLBACK").unwrap();
    let mut retry = coordinator.begin_distributed().unwrap();
    retry.commit().unwrap();
}

#[test]
fn starting_begin_does_not_mark_the_coordinator() {
    let temp = TempDir::new().unwrap();
    let config = ConnectionConfig::default().with_busy_timeout_ms(600);
    let coordinator = open_pair(temp.path(), &config);

    let blocker = Connection::open(temp.path().join("ledger.db")).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

    thread::scope(|scope| {
        let first = scope.spawn(|| coordinator.begin_distributed().err());
        thread::sleep(Duration::from_millis(150));
        assert!(!coordinator.in_distributed_transaction());

        let second = coordinator.begin_distributed().err();
        assert!(second.as_ref().is_some_and(StoreError::is_busy), "second: {second:?}");

        let first = first.join().unwrap();
        assert!(first.as_ref().is_some_and(StoreError::is_busy), "first: {first:?}");
    });
    assert!(!coordinator.in_distributed_transaction());

    blocker.execute_batch("ROLLBACK").unwrap();
    let mut retry = coordinator.begin_distributed().unwrap();
    retry.rollback().unwrap();
}

#[test]
fn locking_calls_inside_an_open_transaction_are_rejected() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();

    let mut tx = coordinator.begin_distributed().unwrap();
    let err = notes.create(&draft("reentrant")).unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)), "unexpected error: {err:?}");
    notes.create_in(tx.session(&"notes").unwrap(), &draft("inside")).unwrap();
    tx.commit().unwrap();
    assert_eq!(notes.count().unwrap(), 1);
}

#[test]
fn dropping_an_open_transaction_rolls_back() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
    {
        let tx = coordinator.begin_distributed().unwrap();
        notes.create_in(tx.session(&"notes").unwrap(), &draft("abandoned")).unwrap();
    }
    assert!(!coordinator.in_distributed_transaction());
    assert_eq!(notes.count().unwrap(), 0);
}

#[test]
fn sessions_require_an_open_transaction() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let mut tx = coordinator.distributed();
    assert!(matches!(tx.session(&"notes"), Err(StoreError::InvalidState { .. })));
    tx.begin().unwrap();
    assert!(matches!(tx.session(&"archive"), Err(StoreError::UnknownPartition(_))));
    tx.rollback().unwrap();

    let mut idle = coordinator.distributed();
    idle.rollback().unwrap();
    assert_eq!(idle.state(), TransactionState::RolledBack);
    assert!(matches!(idle.begin(), Err(StoreError::InvalidState { .. })));
}

#[test]
fn handles_stay_usable_from_other_threads_after_commit() {
    let temp = TempDir::new().unwrap();
    let coordinator = open_pair(temp.path(), &ConnectionConfig::default());
    let notes = RecordStore::<Notes>::attach(coordinator.handle(&"notes").unwrap()).unwrap();
    let mut tx = coordinator.begin_distributed().unwrap();
    notes.create_in(tx.session(&"notes").unwrap(), &draft("first")).unwrap();
    tx.commit().unwrap();

    thread::scope(|scope| {
        scope.spawn(|| notes.create(&draft("second")).unwrap());
    });
    assert_eq!(notes.count().unwrap(), 2);
}

// ============================================================================
// SECTION: Partition Independence
// ============================================================================

#[test]
fn partitions_progress_while_another_is_locked() {
    let temp = TempDir::new().unwrap();
    let coordinator = MultiConnectionCoordinator::builder(ConnectionConfig::default())
        .register_partition("notes", temp.path().join("notes.db"), Notes::DDL)
        .register_partition("archive", temp.path().join("archive.db"), Notes::DDL)
        .open()
        .unwrap();
    let notes_handle = coordinator.handle(&"notes").unwrap();
    let archive = RecordStore::<Notes>::attach(coordinator.handle(&"archive").unwrap()).unwrap();

    let held = notes_handle.lock().unwrap();
    let (done_tx, done_rx) = mpsc::channel();
    thread::scope(|scope| {
        scope.spawn(|| {
            let key = archive.create(&draft("parallel")).unwrap();
            done_tx.send(key).unwrap();
        });
        let key = done_rx.recv_timeout(Duration::from_secs(5));
        assert!(key.is_ok(), "archive write blocked behind the notes lock");
        assert_eq!(held.label(), "notes");
    });
    drop(held);
    assert_eq!(archive.count().unwrap(), 1);
}
