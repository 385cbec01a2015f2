// crates/keel-store-sqlite/src/config.rs
// ============================================================================
// Module: Connection Configuration
// Description: Pragma and thread-mode settings applied when a handle opens.
// Purpose: Capture the immutable per-handle configuration snapshot.
// Dependencies: rusqlite, serde
// ============================================================================

//! ## Overview
//! [`ConnectionConfig`] is applied exactly once, at open time, in a fixed
//! order: journal mode, synchronous mode, cache size, temp store, busy
//! timeout, foreign keys. [`ThreadMode`] selects the engine's internal
//! locking for the handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::OpenFlags;
use serde::Deserialize;
use serde::Serialize;

use crate::error::StoreError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 30_000;
/// Default page cache size (pages when positive, KiB when negative).
pub const DEFAULT_CACHE_SIZE: i64 = 10_000;
/// Default prepared-statement cache capacity per connection.
const DEFAULT_STATEMENT_CACHE_CAPACITY: usize = 32;
/// Upper bound on the configured busy timeout (10 minutes).
const MAX_BUSY_TIMEOUT_MS: u64 = 600_000;

// ============================================================================
// SECTION: Pragma Settings
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// Write-ahead log (recommended for concurrent readers).
    #[default]
    Wal,
    /// Rollback journal deleted at commit.
    Delete,
    /// Rollback journal truncated at commit.
    Truncate,
    /// Rollback journal held in memory.
    Memory,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
            Self::Truncate => "truncate",
            Self::Memory => "memory",
        }
    }
}

/// `SQLite` sync mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `synchronous` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Full synchronous mode (safest).
    Full,
    /// Normal synchronous mode (balanced; durable under WAL).
    #[default]
    Normal,
    /// No syncing (unsafe on power loss).
    Off,
}

impl SyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Normal => "normal",
            Self::Off => "off",
        }
    }
}

/// Location of temporary tables and indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TempStore {
    /// Compile-time default.
    Default,
    /// Temporary files on disk.
    File,
    /// In memory.
    #[default]
    Memory,
}

impl TempStore {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

// ============================================================================
// SECTION: Thread Mode
// ============================================================================

/// Engine-internal thread-safety mode of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadMode {
    /// Engine guards every call with its own mutex (`SQLITE_OPEN_FULLMUTEX`).
    Serialized,
    /// No engine-internal locking (`SQLITE_OPEN_NOMUTEX`).
    Unsynchronized,
}

impl ThreadMode {
    /// Returns the open flags for this mode.
    #[must_use]
    pub fn open_flags(self) -> OpenFlags {
        let base = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI;
        match self {
            Self::Serialized => base | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            Self::Unsynchronized => base | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        }
    }

    /// Returns a short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serialized => "serialized",
            Self::Unsynchronized => "unsynchronized",
        }
    }
}

// ============================================================================
// SECTION: Config
// ============================================================================

/// Configuration snapshot applied to a handle at open time.
///
/// # Invariants
/// - `busy_timeout_ms` is interpreted as milliseconds and bounded.
/// - `statement_cache_capacity` is greater than zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// Page cache size passed to `PRAGMA cache_size`.
    #[serde(default = "default_cache_size")]
    pub cache_size: i64,
    /// Temp store location.
    #[serde(default)]
    pub temp_store: TempStore,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Enforce foreign keys.
    #[serde(default = "default_foreign_keys")]
    pub foreign_keys: bool,
    /// Initial prepared-statement cache capacity of the connection.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            cache_size: DEFAULT_CACHE_SIZE,
            temp_store: TempStore::default(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
            statement_cache_capacity: DEFAULT_STATEMENT_CACHE_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    /// Returns a copy with a different page cache size.
    #[must_use]
    pub const fn with_cache_size(mut self, cache_size: i64) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Returns a copy with a different busy timeout.
    #[must_use]
    pub const fn with_busy_timeout_ms(mut self, busy_timeout_ms: u64) -> Self {
        self.busy_timeout_ms = busy_timeout_ms;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] when a value is out of range.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(StoreError::Invalid(format!(
                "busy_timeout_ms out of range: {} (max {MAX_BUSY_TIMEOUT_MS})",
                self.busy_timeout_ms
            )));
        }
        if self.statement_cache_capacity == 0 {
            return Err(StoreError::Invalid(
                "statement_cache_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Returns the default busy timeout for connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default page cache size.
const fn default_cache_size() -> i64 {
    DEFAULT_CACHE_SIZE
}

/// Returns the default foreign key enforcement.
const fn default_foreign_keys() -> bool {
    true
}

/// Returns the default statement cache capacity.
const fn default_statement_cache_capacity() -> usize {
    DEFAULT_STATEMENT_CACHE_CAPACITY
}
