// crates/keel-store-sqlite/src/record.rs
// ============================================================================
// Module: Record Store
// Description: Generic CRUD contract over one handle and one statement cache.
// Purpose: Let business schemas supply SQL, binders and decoders while the
//          store owns locking, statement reuse and transactions.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! A [`RecordSchema`] describes one table: its DDL, SQL templates, how drafts,
//! patches and filters bind to placeholders, and how a row decodes into a
//! typed record. [`RecordStore`] binds a schema to one handle, prepares every
//! template eagerly, and runs each operation as one lock-reset-bind-step
//! cycle. The `*_in` variants run under a session the caller already holds,
//! which is how records take part in batches and distributed transactions.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::marker::PhantomData;

use rusqlite::types::Value;
use tracing::debug;

use crate::error::StoreError;
use crate::handle::BeginMode;
use crate::handle::ConnectionHandle;
use crate::handle::HandleGuard;
use crate::statement::Execution;
use crate::statement::RowView;
use crate::statement::StatementCache;
use crate::statement::StatementId;

// ============================================================================
// SECTION: Contract
// ============================================================================

/// Row identifier assigned by the engine.
pub type RecordKey = i64;

/// SQL templates of one record schema.
///
/// Placeholders are positional. `select_one`, `update` and `delete` take the
/// key as their last (or only) placeholder; `count` takes none.
#[derive(Debug, Clone, Copy)]
pub struct RecordTemplates {
    /// Inserts one draft.
    pub insert: &'static str,
    /// Selects one row by key.
    pub select_one: &'static str,
    /// Selects every row.
    pub select_all: &'static str,
    /// Updates one row by key.
    pub update: &'static str,
    /// Deletes one row by key.
    pub delete: &'static str,
    /// Counts every row.
    pub count: &'static str,
    /// Filter, aggregate and other schema-specific statements, all prepared
    /// at attach time.
    pub queries: &'static [&'static str],
}

/// A filtered select: template plus its bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterQuery {
    /// One of the schema's filter templates.
    pub sql: &'static str,
    /// Positional bindings.
    pub bindings: Vec<Value>,
}

/// Table description supplied by a business store.
pub trait RecordSchema {
    /// Decoded row.
    type Record;
    /// Values of a row to insert.
    type Draft;
    /// Values of a row update.
    type Patch;
    /// Read filter.
    type Filter;

    /// Schema name for logs.
    const NAME: &'static str;
    /// Idempotent table DDL.
    const DDL: &'static str;
    /// SQL templates.
    const TEMPLATES: RecordTemplates;

    /// Binds an insert.
    fn bind_draft(draft: &Self::Draft) -> Vec<Value>;
    /// Binds an update; the key must be the last binding.
    fn bind_patch(key: RecordKey, patch: &Self::Patch) -> Vec<Value>;
    /// Selects the filter template and its bindings.
    fn filter_query(filter: &Self::Filter) -> FilterQuery;
    /// Decodes one row produced by the select templates.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Decode`] when a column has an unexpected type.
    fn decode(row: RowView<'_>) -> Result<Self::Record, StoreError>;
}

/// Outcome of an update or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// At least one row changed.
    Applied {
        /// Rows changed.
        rows: usize,
    },
    /// No row matched the key.
    NotFound,
}

impl WriteOutcome {
    /// Classifies a changed-row count.
    #[must_use]
    pub const fn from_rows(rows: usize) -> Self {
        if rows == 0 {
            Self::NotFound
        } else {
            Self::Applied {
                rows,
            }
        }
    }

    /// Returns true when a row changed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// One operation of a record batch.
pub enum RecordOp<S: RecordSchema> {
    /// Insert a draft.
    Create(S::Draft),
    /// Update a row.
    Update(RecordKey, S::Patch),
    /// Delete a row.
    Delete(RecordKey),
}

/// Result of one batch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOpOutcome {
    /// Key of the inserted row.
    Created(RecordKey),
    /// Update outcome.
    Updated(WriteOutcome),
    /// Delete outcome.
    Deleted(WriteOutcome),
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Statement ids of the fixed templates.
#[derive(Debug, Clone, Copy)]
struct TemplateIds {
    /// Insert template.
    insert: StatementId,
    /// Select-one template.
    select_one: StatementId,
    /// Select-all template.
    select_all: StatementId,
    /// Update template.
    update: StatementId,
    /// Delete template.
    delete: StatementId,
    /// Count template.
    count: StatementId,
}

/// CRUD client of one schema bound to one handle.
///
/// The plain methods lock the handle for one call. Inside a transaction body
/// or an open distributed transaction the calling thread already holds that
/// lock; use the `*_in` forms with the held guard there. The plain forms
/// return [`StoreError::Invalid`] in that situation.
pub struct RecordStore<S: RecordSchema> {
    /// Statements of this store, bound to its handle.
    cache: StatementCache,
    /// Ids of the fixed templates.
    ids: TemplateIds,
    /// Schema marker.
    schema: PhantomData<fn() -> S>,
}

impl<S: RecordSchema> RecordStore<S> {
    /// Binds the schema to `handle` and prepares every template.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Prepare`] when a template does not compile,
    /// e.g. because the table does not exist.
    pub fn attach(handle: ConnectionHandle) -> Result<Self, StoreError> {
        let templates = S::TEMPLATES;
        let mut cache = StatementCache::new(handle);
        let ids = TemplateIds {
            insert: cache.prepare(templates.insert)?,
            select_one: cache.prepare(templates.select_one)?,
            select_all: cache.prepare(templates.select_all)?,
            update: cache.prepare(templates.update)?,
            delete: cache.prepare(templates.delete)?,
            count: cache.prepare(templates.count)?,
        };
        for query in templates.queries {
            cache.prepare(query)?;
        }
        debug!(
            store = S::NAME,
            handle = cache.handle().label(),
            statements = cache.len(),
            "record store attached"
        );
        Ok(Self {
            cache,
            ids,
            schema: PhantomData,
        })
    }

    /// Returns the bound handle.
    #[must_use]
    pub const fn handle(&self) -> &ConnectionHandle {
        self.cache.handle()
    }

    /// Returns the store's statement cache.
    #[must_use]
    pub const fn statements(&self) -> &StatementCache {
        &self.cache
    }

    /// Inserts a row and returns its key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] on engine failure, e.g. a constraint
    /// violation.
    pub fn create(&self, draft: &S::Draft) -> Result<RecordKey, StoreError> {
        let guard = self.handle().lock()?;
        self.create_in(&guard, draft)
    }

    /// Inserts a row under a held session.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::create`].
    pub fn create_in(
        &self,
        session: &HandleGuard<'_>,
        draft: &S::Draft,
    ) -> Result<RecordKey, StoreError> {
        self.cache.execute_in(session, self.ids.insert, &S::bind_draft(draft))?.into_changed()?;
        session.last_insert_rowid()
    }

    /// Reads one row by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] or [`StoreError::Decode`].
    pub fn read_one(&self, key: RecordKey) -> Result<Option<S::Record>, StoreError> {
        let guard = self.handle().lock()?;
        self.read_one_in(&guard, key)
    }

    /// Reads one row by key under a held session.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::read_one`].
    pub fn read_one_in(
        &self,
        session: &HandleGuard<'_>,
        key: RecordKey,
    ) -> Result<Option<S::Record>, StoreError> {
        let rows = self
            .cache
            .execute_in(session, self.ids.select_one, &[Value::Integer(key)])?
            .into_rows()?;
        rows.first().map(S::decode).transpose()
    }

    /// Reads every row, or the rows matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] or [`StoreError::Decode`].
    pub fn read_all(&self, filter: Option<&S::Filter>) -> Result<Vec<S::Record>, StoreError> {
        let guard = self.handle().lock()?;
        self.read_all_in(&guard, filter)
    }

    /// Reads rows under a held session.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::read_all`].
    pub fn read_all_in(
        &self,
        session: &HandleGuard<'_>,
        filter: Option<&S::Filter>,
    ) -> Result<Vec<S::Record>, StoreError> {
        let execution = match filter {
            None => self.cache.execute_in(session, self.ids.select_all, &[])?,
            Some(filter) => {
                let query = S::filter_query(filter);
                let id = self.cache.statement_id(query.sql).ok_or_else(|| {
                    StoreError::Invalid(format!(
                        "{} filter template not registered: {}",
                        S::NAME,
                        query.sql
                    ))
                })?;
                self.cache.execute_in(session, id, &query.bindings)?
            }
        };
        Self::decode_rows(execution)
    }

    /// Runs one of the schema's registered extra statements.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when `sql` is not a registered
    /// template, otherwise as [`RecordStore::read_all`].
    pub fn query_in(
        &self,
        session: &HandleGuard<'_>,
        sql: &str,
        bindings: &[Value],
    ) -> Result<Execution, StoreError> {
        let id = self.cache.statement_id(sql).ok_or_else(|| {
            StoreError::Invalid(format!("{} template not registered: {sql}", S::NAME))
        })?;
        self.cache.execute_in(session, id, bindings)
    }

    /// Updates one row by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] on engine failure.
    pub fn update(&self, key: RecordKey, patch: &S::Patch) -> Result<WriteOutcome, StoreError> {
        let guard = self.handle().lock()?;
        self.update_in(&guard, key, patch)
    }

    /// Updates one row under a held session.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::update`].
    pub fn update_in(
        &self,
        session: &HandleGuard<'_>,
        key: RecordKey,
        patch: &S::Patch,
    ) -> Result<WriteOutcome, StoreError> {
        let changed = self
            .cache
            .execute_in(session, self.ids.update, &S::bind_patch(key, patch))?
            .into_changed()?;
        Ok(WriteOutcome::from_rows(changed))
    }

    /// Deletes one row by key.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] on engine failure.
    pub fn delete(&self, key: RecordKey) -> Result<WriteOutcome, StoreError> {
        let guard = self.handle().lock()?;
        self.delete_in(&guard, key)
    }

    /// Deletes one row under a held session.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::delete`].
    pub fn delete_in(
        &self,
        session: &HandleGuard<'_>,
        key: RecordKey,
    ) -> Result<WriteOutcome, StoreError> {
        let changed = self
            .cache
            .execute_in(session, self.ids.delete, &[Value::Integer(key)])?
            .into_changed()?;
        Ok(WriteOutcome::from_rows(changed))
    }

    /// Counts every row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Exec`] or [`StoreError::Decode`].
    pub fn count(&self) -> Result<u64, StoreError> {
        let guard = self.handle().lock()?;
        self.count_in(&guard)
    }

    /// Counts every row under a held session.
    ///
    /// # Errors
    ///
    /// See [`RecordStore::count`].
    pub fn count_in(&self, session: &HandleGuard<'_>) -> Result<u64, StoreError> {
        let count = self.cache.execute_in(session, self.ids.count, &[])?.into_rows()?.scalar_i64()?;
        u64::try_from(count).map_err(|_| StoreError::Decode(format!("negative count {count}")))
    }

    /// Runs `ops` in order inside one local transaction on the bound handle,
    /// rolling back at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the first failing operation's error or the commit failure.
    pub fn batch(&self, ops: Vec<RecordOp<S>>) -> Result<Vec<RecordOpOutcome>, StoreError> {
        self.handle().transaction(BeginMode::Deferred, |session| {
            ops.into_iter().map(|op| self.apply_in(session, op)).collect()
        })
    }

    /// Applies one batch operation under a held session.
    ///
    /// # Errors
    ///
    /// Returns the operation's error.
    pub fn apply_in(
        &self,
        session: &HandleGuard<'_>,
        op: RecordOp<S>,
    ) -> Result<RecordOpOutcome, StoreError> {
        match op {
            RecordOp::Create(draft) => {
                self.create_in(session, &draft).map(RecordOpOutcome::Created)
            }
            RecordOp::Update(key, patch) => {
                self.update_in(session, key, &patch).map(RecordOpOutcome::Updated)
            }
            RecordOp::Delete(key) => self.delete_in(session, key).map(RecordOpOutcome::Deleted),
        }
    }

    /// Releases the store's statements ahead of drop.
    ///
    /// # Errors
    ///
    /// Returns the first release failure.
    pub fn finalize(&mut self) -> Result<(), StoreError> {
        self.cache.finalize_all()
    }

    /// Decodes every row of a select.
    fn decode_rows(execution: Execution) -> Result<Vec<S::Record>, StoreError> {
        execution.into_rows()?.iter().map(S::decode).collect()
    }
}
