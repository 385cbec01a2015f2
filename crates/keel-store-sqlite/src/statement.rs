// crates/keel-store-sqlite/src/statement.rs
// ============================================================================
// Module: Statement Cache
// Description: Per-handle registry of compiled SQL statements.
// Purpose: Compile each SQL text once, execute it under the handle lock, and
//          finalize it before the owning connection closes.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! A [`StatementCache`] is bound to exactly one [`ConnectionHandle`]. It hands
//! out [`StatementId`] values for SQL text, checks bindings against the
//! placeholder count captured at prepare time, and returns typed
//! [`Execution`] results. The compiled statements live in the connection's
//! own prepared-statement cache; the handle tracks registrations so nothing a
//! cache registered is evicted until [`StatementCache::finalize_all`] runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use rusqlite::params_from_iter;
use rusqlite::types::Value;
use tracing::debug;
use tracing::warn;

use crate::error::StoreError;
use crate::handle::ConnectionHandle;
use crate::handle::HandleGuard;

/// Source of cache identities embedded in statement ids.
static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Opaque identifier of a statement registered in one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementId {
    /// Identity of the issuing cache.
    cache: u64,
    /// Position in the issuing cache.
    index: usize,
}

impl StatementId {
    /// Returns the position of the statement within its cache.
    #[must_use]
    pub const fn index(self) -> usize {
        self.index
    }
}

// ============================================================================
// SECTION: Results
// ============================================================================

/// Outcome of stepping a statement to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Execution {
    /// Mutation; number of rows changed.
    Changed(usize),
    /// Query; all produced rows.
    Rows(ResultSet),
}

impl Execution {
    /// Returns the changed-row count of a mutation.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when the statement produced rows.
    pub fn into_changed(self) -> Result<usize, StoreError> {
        match self {
            Self::Changed(rows) => Ok(rows),
            Self::Rows(_) => Err(StoreError::Decode("expected a mutation, got rows".to_string())),
        }
    }

    /// Returns the rows of a query.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when the statement was a mutation.
    pub fn into_rows(self) -> Result<ResultSet, StoreError> {
        match self {
            Self::Rows(rows) => Ok(rows),
            Self::Changed(_) => {
                Err(StoreError::Decode("expected rows, got a mutation".to_string()))
            }
        }
    }
}

/// Rows returned by a query, with their column names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    /// Column names in result order.
    pub columns: Vec<String>,
    /// Row values in result order.
    pub rows: Vec<Vec<Value>>,
}

impl ResultSet {
    /// Returns the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true when the query produced no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Iterates rows as typed views.
    pub fn iter(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows.iter().map(|values| RowView {
            columns: &self.columns,
            values,
        })
    }

    /// Returns the first row, if any.
    #[must_use]
    pub fn first(&self) -> Option<RowView<'_>> {
        self.iter().next()
    }

    /// Returns the integer in the first column of the first row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when there is no row or the value is
    /// not an integer.
    pub fn scalar_i64(&self) -> Result<i64, StoreError> {
        self.first()
            .ok_or_else(|| StoreError::Decode("expected one row, got none".to_string()))?
            .i64(0)
    }
}

/// Borrowed view over one result row.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'r> {
    /// Column names of the result set.
    columns: &'r [String],
    /// Values of this row.
    values: &'r [Value],
}

impl<'r> RowView<'r> {
    /// Returns the raw value at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when the column does not exist.
    pub fn value(&self, index: usize) -> Result<&'r Value, StoreError> {
        self.values
            .get(index)
            .ok_or_else(|| StoreError::Decode(format!("column {index} out of range")))
    }

    /// Decodes an integer column.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] on a type mismatch.
    pub fn i64(&self, index: usize) -> Result<i64, StoreError> {
        match self.value(index)? {
            Value::Integer(value) => Ok(*value),
            other => Err(self.mismatch(index, "integer", other)),
        }
    }

    /// Decodes a numeric column as a float; integers are widened.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] on a type mismatch.
    #[allow(
        clippy::cast_precision_loss,
        reason = "NUMERIC affinity stores whole amounts as integers"
    )]
    pub fn f64(&self, index: usize) -> Result<f64, StoreError> {
        match self.value(index)? {
            Value::Real(value) => Ok(*value),
            Value::Integer(value) => Ok(*value as f64),
            other => Err(self.mismatch(index, "real", other)),
        }
    }

    /// Decodes a text column.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] on a type mismatch.
    pub fn text(&self, index: usize) -> Result<&'r str, StoreError> {
        match self.value(index)? {
            Value::Text(value) => Ok(value),
            other => Err(self.mismatch(index, "text", other)),
        }
    }

    /// Decodes a nullable text column.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] on a type mismatch.
    pub fn opt_text(&self, index: usize) -> Result<Option<&'r str>, StoreError> {
        match self.value(index)? {
            Value::Null => Ok(None),
            Value::Text(value) => Ok(Some(value)),
            other => Err(self.mismatch(index, "text", other)),
        }
    }

    /// Builds a type-mismatch error for `index`.
    fn mismatch(&self, index: usize, expected: &str, found: &Value) -> StoreError {
        let column = self.columns.get(index).map_or("?", String::as_str);
        StoreError::Decode(format!(
            "column {column} expected {expected}, found {}",
            value_type_name(found)
        ))
    }
}

/// Returns the storage class name of a value.
const fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    }
}

// ============================================================================
// SECTION: Cache
// ============================================================================

/// Registered statement metadata.
#[derive(Debug)]
struct StatementEntry {
    /// SQL text.
    sql: Arc<str>,
    /// Placeholder count reported at prepare time.
    arity: usize,
}

/// Registry of compiled statements bound to one handle.
///
/// # Invariants
/// - Every statement belongs to exactly one handle and is only executed while
///   that handle's lock is held.
/// - `finalize_all` runs before this cache releases its handle reference.
#[derive(Debug)]
pub struct StatementCache {
    /// Handle the statements are compiled against.
    handle: ConnectionHandle,
    /// Identity embedded in issued ids.
    cache_id: u64,
    /// Registered statements in id order.
    entries: Vec<StatementEntry>,
    /// Lookup from SQL text to id.
    by_sql: HashMap<Arc<str>, StatementId>,
    /// Set once `finalize_all` has run.
    finalized: bool,
}

impl StatementCache {
    /// Creates an empty cache bound to `handle`.
    #[must_use]
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            cache_id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            entries: Vec::new(),
            by_sql: HashMap::new(),
            finalized: false,
        }
    }

    /// Returns the bound handle.
    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Compiles `sql` once and returns its id; repeated calls with the same
    /// text return the existing id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Prepare`] when compilation fails and
    /// [`StoreError::Finalized`] after `finalize_all`.
    pub fn prepare(&mut self, sql: &str) -> Result<StatementId, StoreError> {
        if self.finalized {
            return Err(StoreError::Finalized);
        }
        if let Some(id) = self.by_sql.get(sql) {
            return Ok(*id);
        }
        let sql: Arc<str> = Arc::from(sql);
        let arity = {
            let mut guard = self.handle.lock()?;
            guard.register_statement(&sql)?
        };
        let id = StatementId {
            cache: self.cache_id,
            index: self.entries.len(),
        };
        debug!(handle = self.handle.label(), statement = id.index, arity, "prepared statement");
        self.entries.push(StatementEntry {
            sql: Arc::clone(&sql),
            arity,
        });
        self.by_sql.insert(sql, id);
        Ok(id)
    }

    /// Returns the id previously issued for `sql`.
    #[must_use]
    pub fn statement_id(&self, sql: &str) -> Option<StatementId> {
        self.by_sql.get(sql).copied()
    }

    /// Returns the SQL text of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownStatement`] for foreign or stale ids.
    pub fn sql(&self, id: StatementId) -> Result<&str, StoreError> {
        Ok(self.entry(id)?.sql.as_ref())
    }

    /// Returns the placeholder count of `id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownStatement`] for foreign or stale ids.
    pub fn arity(&self, id: StatementId) -> Result<usize, StoreError> {
        Ok(self.entry(id)?.arity)
    }

    /// Returns the number of registered statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when no statements are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns true once `finalize_all` has run.
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Executes `id` with `bindings` under a freshly acquired handle lock.
    ///
    /// # Errors
    ///
    /// See [`StatementCache::execute_in`].
    pub fn execute(&self, id: StatementId, bindings: &[Value]) -> Result<Execution, StoreError> {
        let guard = self.handle.lock()?;
        self.execute_in(&guard, id, bindings)
    }

    /// Executes `id` with `bindings` under an already-held handle lock.
    ///
    /// Bindings are positional. `SQLite` placeholders carry no declared type
    /// and columns apply affinity on storage, so only the number of bindings
    /// is checked here; binding values in the right order and of the right
    /// kind is the caller's contract.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BindingMismatch`] when the number of bindings
    /// differs from the placeholder count, [`StoreError::ForeignSession`] for
    /// a guard of another handle, and [`StoreError::Exec`] for engine
    /// failures.
    pub fn execute_in(
        &self,
        session: &HandleGuard<'_>,
        id: StatementId,
        bindings: &[Value],
    ) -> Result<Execution, StoreError> {
        if self.finalized {
            return Err(StoreError::Finalized);
        }
        if !self.handle.owns(session) {
            return Err(StoreError::ForeignSession {
                expected: self.handle.label().to_string(),
                actual: session.label().to_string(),
            });
        }
        let entry = self.entry(id)?;
        if bindings.len() != entry.arity {
            return Err(StoreError::BindingMismatch {
                sql: entry.sql.to_string(),
                expected: entry.arity,
                actual: bindings.len(),
            });
        }
        let mut statement =
            session.connection()?.prepare_cached(&entry.sql).map_err(|err| StoreError::Prepare {
                sql: entry.sql.to_string(),
                message: err.to_string(),
            })?;
        if statement.column_count() == 0 {
            let changed = statement
                .execute(params_from_iter(bindings))
                .map_err(|err| StoreError::exec(entry.sql.as_ref(), &err))?;
            return Ok(Execution::Changed(changed));
        }
        let columns: Vec<String> =
            statement.column_names().into_iter().map(str::to_string).collect();
        let width = columns.len();
        let mut rows = statement
            .query(params_from_iter(bindings))
            .map_err(|err| StoreError::exec(entry.sql.as_ref(), &err))?;
        let mut collected = Vec::new();
        while let Some(row) =
            rows.next().map_err(|err| StoreError::exec(entry.sql.as_ref(), &err))?
        {
            let mut values = Vec::with_capacity(width);
            for index in 0 .. width {
                values.push(
                    row.get::<_, Value>(index)
                        .map_err(|err| StoreError::Decode(err.to_string()))?,
                );
            }
            collected.push(values);
        }
        Ok(Execution::Rows(ResultSet {
            columns,
            rows: collected,
        }))
    }

    /// Releases every statement this cache registered. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns the first release failure; the cache is finalized regardless.
    pub fn finalize_all(&mut self) -> Result<(), StoreError> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        let entries = std::mem::take(&mut self.entries);
        self.by_sql.clear();
        let mut guard = self.handle.lock()?;
        let mut first_error = None;
        for entry in &entries {
            if let Err(error) = guard.release_statement(&entry.sql) {
                first_error.get_or_insert(error);
            }
        }
        debug!(handle = self.handle.label(), statements = entries.len(), "finalized statements");
        first_error.map_or(Ok(()), Err)
    }

    /// Resolves `id` to its entry.
    fn entry(&self, id: StatementId) -> Result<&StatementEntry, StoreError> {
        if id.cache != self.cache_id {
            return Err(StoreError::UnknownStatement(id.index));
        }
        self.entries.get(id.index).ok_or(StoreError::UnknownStatement(id.index))
    }
}

impl Drop for StatementCache {
    fn drop(&mut self) {
        if let Err(error) = self.finalize_all() {
            warn!(handle = self.handle.label(), %error, "statement finalization failed");
        }
    }
}
