// crates/keel-records/src/users.rs
// ============================================================================
// Module: User Records
// Description: User accounts with unique username and email.
// Purpose: Describe the users table to the generic record store.
// Dependencies: keel-store-sqlite, serde
// ============================================================================

//! ## Overview
//! Users carry a unique username and a unique email. Reads can be narrowed
//! to one username or one email.

// ============================================================================
// SECTION: Imports
// ============================================================================

use keel_store_sqlite::FilterQuery;
use keel_store_sqlite::RecordKey;
use keel_store_sqlite::RecordSchema;
use keel_store_sqlite::RecordStore;
use keel_store_sqlite::RecordTemplates;
use keel_store_sqlite::RowView;
use keel_store_sqlite::StoreError;
use keel_store_sqlite::Value;
use serde::Serialize;

// ============================================================================
// SECTION: SQL
// ============================================================================

/// Idempotent DDL of the users table.
pub const USERS_DDL: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT UNIQUE NOT NULL,
    email TEXT UNIQUE NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);";

/// Columns selected by every user read.
macro_rules! user_columns {
    () => {
        "SELECT id, username, email, created_at, updated_at FROM users"
    };
}

/// Users with one username.
const SELECT_BY_USERNAME: &str = concat!(user_columns!(), " WHERE username = ?1");
/// Users with one email.
const SELECT_BY_EMAIL: &str = concat!(user_columns!(), " WHERE email = ?1");

// ============================================================================
// SECTION: Types
// ============================================================================

/// Stored user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    /// Row id.
    pub id: RecordKey,
    /// Unique login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
    /// Creation timestamp (UTC, engine format).
    pub created_at: String,
    /// Last update timestamp (UTC, engine format).
    pub updated_at: String,
}

/// Values of a new user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    /// Unique login name.
    pub username: String,
    /// Unique email address.
    pub email: String,
}

impl NewUser {
    /// Builds a new user draft.
    #[must_use]
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
        }
    }
}

/// Replacement values of a user update.
pub type UserUpdate = NewUser;

/// User read filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserFilter {
    /// Exact username.
    Username(String),
    /// Exact email.
    Email(String),
}

/// Users table schema.
#[derive(Debug, Clone, Copy)]
pub struct Users;

/// Record store of users.
pub type UserStore = RecordStore<Users>;

impl RecordSchema for Users {
    type Draft = NewUser;
    type Filter = UserFilter;
    type Patch = UserUpdate;
    type Record = User;

    const DDL: &'static str = USERS_DDL;
    const NAME: &'static str = "users";
    const TEMPLATES: RecordTemplates = RecordTemplates {
        insert: "INSERT INTO users (username, email) VALUES (?1, ?2)",
        select_one: concat!(user_columns!(), " WHERE id = ?1"),
        select_all: concat!(user_columns!(), " ORDER BY id"),
        update: "UPDATE users SET username = ?1, email = ?2, updated_at = CURRENT_TIMESTAMP \
                 WHERE id = ?3",
        delete: "DELETE FROM users WHERE id = ?1",
        count: "SELECT COUNT(*) FROM users",
        queries: &[SELECT_BY_USERNAME, SELECT_BY_EMAIL],
    };

    fn bind_draft(draft: &NewUser) -> Vec<Value> {
        vec![Value::Text(draft.username.clone()), Value::Text(draft.email.clone())]
    }

    fn bind_patch(key: RecordKey, patch: &UserUpdate) -> Vec<Value> {
        vec![
            Value::Text(patch.username.clone()),
            Value::Text(patch.email.clone()),
            Value::Integer(key),
        ]
    }

    fn filter_query(filter: &UserFilter) -> FilterQuery {
        match filter {
            UserFilter::Username(username) => FilterQuery {
                sql: SELECT_BY_USERNAME,
                bindings: vec![Value::Text(username.clone())],
            },
            UserFilter::Email(email) => FilterQuery {
                sql: SELECT_BY_EMAIL,
                bindings: vec![Value::Text(email.clone())],
            },
        }
    }

    fn decode(row: RowView<'_>) -> Result<User, StoreError> {
        Ok(User {
            id: row.i64(0)?,
            username: row.text(1)?.to_string(),
            email: row.text(2)?.to_string(),
            created_at: row.text(3)?.to_string(),
            updated_at: row.text(4)?.to_string(),
        })
    }
}
