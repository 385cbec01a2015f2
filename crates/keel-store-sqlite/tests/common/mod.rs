// crates/keel-store-sqlite/tests/common/mod.rs
// ============================================================================
// Module: Test Fixtures
// Description: Shared schema and configuration helpers for integration tests.
// Purpose: Give every suite the same small record schema to drive stores with.
// Dependencies: keel-store-sqlite
// ============================================================================

//! ## Overview
//! A minimal `notes` table implementing the record-store contract, plus
//! handle helpers for in-memory databases.

#![allow(
    dead_code,
    clippy::expect_used,
    reason = "Test helpers are selectively used across suites and may panic."
)]

use keel_store_sqlite::ConnectionConfig;
use keel_store_sqlite::ConnectionHandle;
use keel_store_sqlite::FilterQuery;
use keel_store_sqlite::JournalMode;
use keel_store_sqlite::RecordKey;
use keel_store_sqlite::RecordSchema;
use keel_store_sqlite::RecordTemplates;
use keel_store_sqlite::RowView;
use keel_store_sqlite::StoreError;
use keel_store_sqlite::ThreadMode;
use keel_store_sqlite::Value;

// ============================================================================
// SECTION: Notes Schema
// ============================================================================

/// Idempotent DDL of the notes table.
pub const NOTES_DDL: &str = "CREATE TABLE IF NOT EXISTS notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL UNIQUE,
    body TEXT
);";

/// Filter template selecting notes by title prefix.
const TITLE_PREFIX: &str =
    "SELECT id, title, body FROM notes WHERE title LIKE ?1 || '%' ORDER BY id";

/// Decoded note row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub id: RecordKey,
    pub title: String,
    pub body: Option<String>,
}

/// Insert values of a note.
#[derive(Debug, Clone)]
pub struct NoteDraft {
    pub title: String,
    pub body: Option<String>,
}

/// Update values of a note.
#[derive(Debug, Clone)]
pub struct NotePatch {
    pub body: Option<String>,
}

/// Read filters of notes.
#[derive(Debug, Clone)]
pub enum NoteFilter {
    /// Titles starting with the prefix.
    TitlePrefix(String),
}

/// Notes schema marker.
pub struct Notes;

impl RecordSchema for Notes {
    type Draft = NoteDraft;
    type Filter = NoteFilter;
    type Patch = NotePatch;
    type Record = Note;

    const DDL: &'static str = NOTES_DDL;
    const NAME: &'static str = "notes";
    const TEMPLATES: RecordTemplates = RecordTemplates {
        insert: "INSERT INTO notes (title, body) VALUES (?1, ?2)",
        select_one: "SELECT id, title, body FROM notes WHERE id = ?1",
        select_all: "SELECT id, title, body FROM notes ORDER BY id",
        update: "UPDATE notes SET body = ?1 WHERE id = ?2",
        delete: "DELETE FROM notes WHERE id = ?1",
        count: "SELECT COUNT(*) FROM notes",
        queries: &[TITLE_PREFIX],
    };

    fn bind_draft(draft: &NoteDraft) -> Vec<Value> {
        vec![Value::Text(draft.title.clone()), optional_text(draft.body.as_deref())]
    }

    fn bind_patch(key: RecordKey, patch: &NotePatch) -> Vec<Value> {
        vec![optional_text(patch.body.as_deref()), Value::Integer(key)]
    }

    fn filter_query(filter: &NoteFilter) -> FilterQuery {
        match filter {
            NoteFilter::TitlePrefix(prefix) => FilterQuery {
                sql: TITLE_PREFIX,
                bindings: vec![Value::Text(prefix.clone())],
            },
        }
    }

    fn decode(row: RowView<'_>) -> Result<Note, StoreError> {
        Ok(Note {
            id: row.i64(0)?,
            title: row.text(1)?.to_string(),
            body: row.opt_text(2)?.map(str::to_string),
        })
    }
}

/// Binds an optional string as text or null.
fn optional_text(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |text| Value::Text(text.to_string()))
}

/// Builds a draft with a derived body.
pub fn draft(title: &str) -> NoteDraft {
    NoteDraft {
        title: title.to_string(),
        body: Some(format!("body of {title}")),
    }
}

// ============================================================================
// SECTION: Handles
// ============================================================================

/// Configuration usable with `:memory:` databases.
pub fn memory_config() -> ConnectionConfig {
    ConnectionConfig {
        journal_mode: JournalMode::Memory,
        ..ConnectionConfig::default()
    }
}

/// Opens an in-memory handle with the notes table.
pub fn memory_notes_handle(label: &str) -> ConnectionHandle {
    let handle =
        ConnectionHandle::open(label, ":memory:", &memory_config(), ThreadMode::Serialized)
            .expect("open memory handle");
    handle.with_lock(|guard| guard.execute_batch(NOTES_DDL)).expect("notes schema");
    handle
}
