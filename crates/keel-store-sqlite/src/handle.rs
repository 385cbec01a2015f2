// crates/keel-store-sqlite/src/handle.rs
// ============================================================================
// Module: Connection Handle
// Description: Shared ownership of one configured SQLite session.
// Purpose: Open, configure, lock and close a storage handle exactly once.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! A [`ConnectionHandle`] wraps one opened `SQLite` session plus its immutable
//! configuration snapshot. Handles are shared by reference count; the release
//! of the last reference closes the session. Every use of the session goes
//! through [`HandleGuard`], the per-handle coordinator lock, which is held for
//! one logical operation or for a whole transaction bracket.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::thread;
use std::thread::ThreadId;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::types::FromSql;
use tracing::debug;
use tracing::warn;

use crate::config::ConnectionConfig;
use crate::config::ThreadMode;
use crate::error::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Side files the engine may create next to a database file.
const SIDE_FILE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];
/// Maximum characters of SQL echoed into error contexts.
const SQL_SUMMARY_CHARS: usize = 72;

// ============================================================================
// SECTION: Transaction Control
// ============================================================================

/// Local transaction start behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BeginMode {
    /// Locks are acquired lazily on first read/write.
    #[default]
    Deferred,
    /// The write lock is acquired at `BEGIN`.
    Immediate,
    /// Exclusive lock acquired at `BEGIN`.
    Exclusive,
}

impl BeginMode {
    /// Returns the `BEGIN` statement for this mode.
    #[must_use]
    pub const fn statement(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED",
            Self::Immediate => "BEGIN IMMEDIATE",
            Self::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// One operation of a batch run under a single local transaction.
pub type BatchOp<'o, T> = Box<dyn FnOnce(&HandleGuard<'_>) -> Result<T, StoreError> + 'o>;

// ============================================================================
// SECTION: Handle
// ============================================================================

/// Shared reference to one opened `SQLite` session.
///
/// # Invariants
/// - Configuration is applied once at open and never changes.
/// - The session closes exactly once, when the last reference is released.
/// - The session is only touched while the handle mutex is held.
/// - The mutex is not reentrant: a thread holding a [`HandleGuard`] that asks
///   for the lock again gets [`StoreError::Invalid`] instead of blocking.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Shared handle state.
    inner: Arc<HandleInner>,
}

/// State shared by every reference to one handle.
struct HandleInner {
    /// Human-readable label used in logs and errors.
    label: String,
    /// Database file path.
    path: PathBuf,
    /// Configuration applied at open.
    config: ConnectionConfig,
    /// Engine thread-safety mode.
    mode: ThreadMode,
    /// Coordinator lock around the session.
    session: Mutex<SessionState>,
    /// Thread currently holding the session lock.
    owner: Mutex<Option<ThreadId>>,
}

/// Mutable session state protected by the handle mutex.
struct SessionState {
    /// Open connection; `None` only after shutdown.
    connection: Option<Connection>,
    /// Registration counts of prepared statements by SQL text.
    registered: HashMap<Arc<str>, usize>,
    /// Current capacity of the connection's prepared-statement cache.
    cache_capacity: usize,
}

impl ConnectionHandle {
    /// Opens and configures a storage handle.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when the file cannot be opened and
    /// [`StoreError::Configuration`] when a pragma is rejected; in the latter
    /// case the session is closed and files created by this open are removed.
    pub fn open(
        label: impl Into<String>,
        path: impl AsRef<Path>,
        config: &ConnectionConfig,
        mode: ThreadMode,
    ) -> Result<Self, StoreError> {
        let label = label.into();
        let path = path.as_ref().to_path_buf();
        config.validate()?;
        let on_disk = is_disk_path(&path);
        let existed = on_disk && path.exists();
        let connection =
            Connection::open_with_flags(&path, mode.open_flags()).map_err(|err| {
                StoreError::Open {
                    path: path.display().to_string(),
                    message: err.to_string(),
                }
            })?;
        if let Err(error) = apply_pragmas(&connection, config) {
            if let Err((_, err)) = connection.close() {
                warn!(handle = %label, error = %err, "close after configuration failure failed");
            }
            if on_disk && !existed {
                remove_created_files(&path);
            }
            return Err(error);
        }
        connection.set_prepared_statement_cache_capacity(config.statement_cache_capacity);
        debug!(
            handle = %label,
            path = %path.display(),
            mode = mode.as_str(),
            journal_mode = config.journal_mode.pragma_value(),
            "opened sqlite handle"
        );
        Ok(Self {
            inner: Arc::new(HandleInner {
                label,
                path,
                config: config.clone(),
                mode,
                session: Mutex::new(SessionState {
                    connection: Some(connection),
                    registered: HashMap::new(),
                    cache_capacity: config.statement_cache_capacity,
                }),
                owner: Mutex::new(None),
            }),
        })
    }

    /// Returns a new owning reference to the same session.
    #[must_use]
    pub fn share(&self) -> Self {
        self.clone()
    }

    /// Releases this reference, closing the session when it is the last one.
    ///
    /// Returns `true` when this call closed the session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when the engine refuses to close.
    pub fn close(self) -> Result<bool, StoreError> {
        let Some(mut inner) = Arc::into_inner(self.inner) else {
            return Ok(false);
        };
        inner.shutdown()?;
        Ok(true)
    }

    /// Acquires the handle lock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] when a previous holder panicked and
    /// [`StoreError::Invalid`] when the calling thread already holds the lock,
    /// e.g. inside a transaction body or an open distributed transaction.
    pub fn lock(&self) -> Result<HandleGuard<'_>, StoreError> {
        let current = thread::current().id();
        if *self.inner.owner() == Some(current) {
            return Err(StoreError::Invalid(format!(
                "handle {} is already locked by this thread",
                self.inner.label
            )));
        }
        let state = self
            .inner
            .session
            .lock()
            .map_err(|_| StoreError::Poisoned(self.inner.label.clone()))?;
        *self.inner.owner() = Some(current);
        Ok(HandleGuard {
            inner: &self.inner,
            state,
        })
    }

    /// Runs `body` while holding the handle lock.
    ///
    /// # Errors
    ///
    /// Returns the lock error or whatever `body` returns.
    pub fn with_lock<T>(
        &self,
        body: impl FnOnce(&HandleGuard<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.lock()?;
        body(&guard)
    }

    /// Runs `body` inside one local transaction while holding the lock for
    /// the entire bracket.
    ///
    /// # Errors
    ///
    /// Returns the first failure of `BEGIN`, `body` or `COMMIT`; the
    /// transaction is rolled back in every failure case.
    pub fn transaction<T>(
        &self,
        mode: BeginMode,
        body: impl FnOnce(&HandleGuard<'_>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let guard = self.lock()?;
        guard.transaction(mode, body)
    }

    /// Runs `ops` in order inside one local transaction, stopping and rolling
    /// back at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failing operation's error, or the commit failure.
    pub fn run_batch<T>(
        &self,
        mode: BeginMode,
        ops: Vec<BatchOp<'_, T>>,
    ) -> Result<Vec<T>, StoreError> {
        self.transaction(mode, |guard| ops.into_iter().map(|op| op(guard)).collect())
    }

    /// Truncates the write-ahead log into the main database file.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when the checkpoint fails.
    pub fn checkpoint(&self) -> Result<(), StoreError> {
        let guard = self.lock()?;
        guard
            .connection()?
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .map_err(|err| StoreError::exec("wal checkpoint", &err))
    }

    /// Returns the handle label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Returns the database path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Returns the configuration applied at open.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Returns the engine thread-safety mode.
    #[must_use]
    pub fn thread_mode(&self) -> ThreadMode {
        self.inner.mode
    }

    /// Returns the number of live owning references.
    #[must_use]
    pub fn reference_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Returns the number of distinct prepared statements registered on the
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Poisoned`] when the lock is poisoned.
    pub fn registered_statements(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.state.registered.len())
    }

    /// Returns true when `guard` locks this handle.
    pub(crate) fn owns(&self, guard: &HandleGuard<'_>) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.inner), guard.inner)
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("label", &self.inner.label)
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .field("references", &Arc::strong_count(&self.inner))
            .finish_non_exhaustive()
    }
}

impl HandleInner {
    /// Locks the owner slot; the slot holds plain data, so poisoning is
    /// ignored.
    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.owner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finalizes leftover statements and closes the session.
    fn shutdown(&mut self) -> Result<(), StoreError> {
        let state = self.session.get_mut().unwrap_or_else(PoisonError::into_inner);
        let Some(connection) = state.connection.take() else {
            return Ok(());
        };
        if !state.registered.is_empty() {
            warn!(
                handle = %self.label,
                statements = state.registered.len(),
                "closing handle with unfinalized statements"
            );
            state.registered.clear();
        }
        connection.flush_prepared_statement_cache();
        connection.close().map_err(|(_, err)| StoreError::exec("close", &err))?;
        debug!(handle = %self.label, "closed sqlite handle");
        Ok(())
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if let Err(error) = self.shutdown() {
            warn!(handle = %self.label, %error, "sqlite handle close failed");
        }
    }
}

// ============================================================================
// SECTION: Guard
// ============================================================================

/// Locked session over one handle.
///
/// Holding a guard is holding the handle's coordinator lock; prepared
/// statements of the handle may only be reset, bound and stepped through it.
pub struct HandleGuard<'a> {
    /// Handle this guard locks.
    inner: &'a HandleInner,
    /// Locked session state.
    state: MutexGuard<'a, SessionState>,
}

impl HandleGuard<'_> {
    /// Returns the label of the locked handle.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Returns the underlying connection.
    pub(crate) fn connection(&self) -> Result<&Connection, StoreError> {
        self.state
            .connection
            .as_ref()
            .ok_or_else(|| StoreError::Invalid(format!("handle {} is closed", self.inner.label)))
    }

    /// Executes one or more SQL statements without bindings (DDL, pragmas,
    /// transaction control).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when the engine rejects the SQL.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.connection()?
            .execute_batch(sql)
            .map_err(|err| StoreError::exec(summarize_sql(sql), &err))
    }

    /// Starts a local transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`], e.g. when the busy timeout expires.
    pub fn begin(&self, mode: BeginMode) -> Result<(), StoreError> {
        self.execute_batch(mode.statement())
    }

    /// Commits the open local transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when the commit fails; the transaction
    /// may still be open afterwards.
    pub fn commit(&self) -> Result<(), StoreError> {
        self.execute_batch("COMMIT")
    }

    /// Rolls back the open local transaction.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when no transaction is open or the engine
    /// fails.
    pub fn rollback(&self) -> Result<(), StoreError> {
        self.execute_batch("ROLLBACK")
    }

    /// Returns true while a local transaction is open on the session.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.state.connection.as_ref().is_some_and(|connection| !connection.is_autocommit())
    }

    /// Runs a one-off query and returns the first column of its first row.
    ///
    /// The query is compiled outside the statement cache, so it never evicts
    /// registered statements.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] when the query fails or returns no row.
    pub fn query_scalar<T: FromSql>(&self, sql: &str) -> Result<T, StoreError> {
        self.connection()?
            .query_row(sql, [], |row| row.get(0))
            .map_err(|err| StoreError::exec(summarize_sql(sql), &err))
    }

    /// Returns the row id of the most recent successful insert.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when the session is closed.
    pub fn last_insert_rowid(&self) -> Result<i64, StoreError> {
        Ok(self.connection()?.last_insert_rowid())
    }

    /// Runs `body` inside one local transaction on this session.
    ///
    /// # Errors
    ///
    /// Returns the first failure of `BEGIN`, `body` or `COMMIT`. A failed
    /// commit is followed by an explicit rollback attempt.
    pub fn transaction<T>(
        &self,
        mode: BeginMode,
        body: impl FnOnce(&Self) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        self.begin(mode)?;
        match body(self) {
            Ok(value) => {
                if let Err(error) = self.commit() {
                    self.rollback_best_effort();
                    return Err(error);
                }
                Ok(value)
            }
            Err(error) => {
                self.rollback_best_effort();
                Err(error)
            }
        }
    }

    /// Rolls back if a transaction is still open, logging failures.
    pub(crate) fn rollback_best_effort(&self) {
        if !self.in_transaction() {
            return;
        }
        if let Err(error) = self.rollback() {
            warn!(handle = %self.inner.label, %error, "rollback failed");
        }
    }

    /// Compiles `sql` into the session's statement cache and records one
    /// registration, returning the placeholder count.
    pub(crate) fn register_statement(&mut self, sql: &Arc<str>) -> Result<usize, StoreError> {
        let label = &self.inner.label;
        let state = &mut *self.state;
        let Some(connection) = state.connection.as_ref() else {
            return Err(StoreError::Invalid(format!("handle {label} is closed")));
        };
        if !state.registered.contains_key(sql) && state.registered.len() >= state.cache_capacity {
            state.cache_capacity = (state.registered.len() + 1).next_power_of_two();
            connection.set_prepared_statement_cache_capacity(state.cache_capacity);
        }
        let arity = connection
            .prepare_cached(sql)
            .map_err(|err| StoreError::Prepare {
                sql: sql.to_string(),
                message: err.to_string(),
            })?
            .parameter_count();
        *state.registered.entry(Arc::clone(sql)).or_insert(0) += 1;
        Ok(arity)
    }

    /// Drops one registration of `sql`, finalizing the compiled statement
    /// when no registrations remain.
    pub(crate) fn release_statement(&mut self, sql: &Arc<str>) -> Result<(), StoreError> {
        let state = &mut *self.state;
        let Some(count) = state.registered.get_mut(sql) else {
            return Ok(());
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return Ok(());
        }
        state.registered.remove(sql);
        if let Some(connection) = state.connection.as_ref() {
            connection
                .prepare_cached(sql)
                .map_err(|err| StoreError::Prepare {
                    sql: sql.to_string(),
                    message: err.to_string(),
                })?
                .discard();
        }
        Ok(())
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        *self.inner.owner() = None;
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Applies pragmas in the fixed order required at open.
fn apply_pragmas(connection: &Connection, config: &ConnectionConfig) -> Result<(), StoreError> {
    let requested = config.journal_mode.pragma_value();
    let applied: String = connection
        .query_row(&format!("PRAGMA journal_mode = {requested}"), [], |row| row.get(0))
        .map_err(|err| configuration_error("journal_mode", &err))?;
    if !applied.eq_ignore_ascii_case(requested) {
        return Err(StoreError::Configuration {
            setting: "journal_mode",
            message: format!("engine kept journal mode {applied} instead of {requested}"),
        });
    }
    connection
        .execute_batch(&format!("PRAGMA synchronous = {};", config.sync_mode.pragma_value()))
        .map_err(|err| configuration_error("synchronous", &err))?;
    connection
        .execute_batch(&format!("PRAGMA cache_size = {};", config.cache_size))
        .map_err(|err| configuration_error("cache_size", &err))?;
    connection
        .execute_batch(&format!("PRAGMA temp_store = {};", config.temp_store.pragma_value()))
        .map_err(|err| configuration_error("temp_store", &err))?;
    connection
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|err| configuration_error("busy_timeout", &err))?;
    let foreign_keys = if config.foreign_keys { "ON" } else { "OFF" };
    connection
        .execute_batch(&format!("PRAGMA foreign_keys = {foreign_keys};"))
        .map_err(|err| configuration_error("foreign_keys", &err))?;
    Ok(())
}

/// Builds a configuration error for a rejected pragma.
fn configuration_error(setting: &'static str, err: &rusqlite::Error) -> StoreError {
    StoreError::Configuration {
        setting,
        message: err.to_string(),
    }
}

/// Returns true when `path` names an on-disk database file.
fn is_disk_path(path: &Path) -> bool {
    let raw = path.to_string_lossy();
    !(raw.is_empty() || raw == ":memory:" || raw.starts_with("file:"))
}

/// Removes a database file created by a failed open, with its side files.
fn remove_created_files(path: &Path) {
    let mut targets = vec![path.to_path_buf()];
    for suffix in SIDE_FILE_SUFFIXES {
        let mut side = path.as_os_str().to_os_string();
        side.push(suffix);
        targets.push(PathBuf::from(side));
    }
    for target in targets {
        match fs::remove_file(&target) {
            Ok(()) => debug!(path = %target.display(), "removed file left by failed open"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %target.display(), error = %err, "cannot remove file"),
        }
    }
}

/// Shortens SQL text for error contexts.
fn summarize_sql(sql: &str) -> String {
    let line = sql.lines().map(str::trim).find(|line| !line.is_empty()).unwrap_or_default();
    if line.chars().count() > SQL_SUMMARY_CHARS {
        let mut summary: String = line.chars().take(SQL_SUMMARY_CHARS).collect();
        summary.push_str("...");
        summary
    } else {
        line.to_string()
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
