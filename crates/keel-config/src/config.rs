// crates/keel-config/src/config.rs
// ============================================================================
// Module: Keel Configuration
// Description: Configuration loading and validation for Keel.
// Purpose: Strict keel.toml parsing with hard limits and layout defaults.
// Dependencies: keel-store-sqlite, keel-records, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with size and path limits. An
//! explicitly named file must exist; when no path is given and `keel.toml`
//! is absent, the defaults apply. Unknown keys are rejected.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use keel_records::TableDomain;
use keel_store_sqlite::ConnectionConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "keel.toml";
/// Environment variable naming the configuration file.
pub const CONFIG_ENV_VAR: &str = "KEEL_CONFIG";
/// Maximum configuration file size in bytes.
pub(crate) const MAX_CONFIG_FILE_SIZE: usize = 64 * 1024;
/// Maximum length of a single path component.
pub(crate) const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
pub(crate) const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Page cache size of the single-file layout.
pub(crate) const DEFAULT_SINGLE_CACHE_SIZE: i64 = 10_000;
/// Page cache size of each partition file.
pub(crate) const DEFAULT_MULTI_CACHE_SIZE: i64 = 5_000;
/// Default demo worker threads.
pub(crate) const DEFAULT_THREADS: usize = 4;
/// Upper bound on demo worker threads.
pub(crate) const MAX_THREADS: usize = 64;
/// Default operations per demo worker.
pub(crate) const DEFAULT_OPERATIONS: usize = 100;
/// Upper bound on operations per demo worker.
pub(crate) const MAX_OPERATIONS: usize = 100_000;
/// Default log filter directive.
const DEFAULT_LOG_FILTER: &str = "info";
/// Upper bound on the log filter length.
pub(crate) const MAX_LOG_FILTER_LENGTH: usize = 1024;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Keel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KeelConfig {
    /// Connection settings shared by every handle.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Single-file layout.
    #[serde(default)]
    pub single: SingleConfig,
    /// Partitioned layout.
    #[serde(default)]
    pub multi: MultiConfig,
    /// Demo workload sizing.
    #[serde(default)]
    pub workload: WorkloadConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl KeelConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (resolved, explicit) = resolve_path(path)?;
        validate_path(&resolved)?;
        if !explicit && !resolved.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        Self::from_bytes(&bytes)
    }

    /// Parses and validates configuration bytes.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the content is oversized, not UTF-8,
    /// malformed or invalid.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection
            .validate()
            .map_err(|err| ConfigError::Invalid(format!("connection: {err}")))?;
        self.single.validate()?;
        self.multi.validate()?;
        self.workload.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Returns the connection settings of the single-file layout.
    #[must_use]
    pub fn single_connection(&self) -> ConnectionConfig {
        self.connection.clone().with_cache_size(self.single.cache_size)
    }

    /// Returns the connection settings of each partition file.
    #[must_use]
    pub fn multi_connection(&self) -> ConnectionConfig {
        self.connection.clone().with_cache_size(self.multi.cache_size)
    }
}

/// Single-file layout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SingleConfig {
    /// Database file path.
    #[serde(default = "default_single_path")]
    pub path: PathBuf,
    /// Page cache size of the shared handle.
    #[serde(default = "default_single_cache_size")]
    pub cache_size: i64,
}

impl Default for SingleConfig {
    fn default() -> Self {
        Self {
            path: default_single_path(),
            cache_size: DEFAULT_SINGLE_CACHE_SIZE,
        }
    }
}

impl SingleConfig {
    /// Validates the single-file section.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("single.path", &self.path.to_string_lossy())
    }
}

/// Partitioned layout configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MultiConfig {
    /// Directory holding the partition files.
    #[serde(default = "default_multi_directory")]
    pub directory: PathBuf,
    /// Page cache size of each partition handle.
    #[serde(default = "default_multi_cache_size")]
    pub cache_size: i64,
    /// Users partition file name.
    #[serde(default = "default_users_file")]
    pub users_file: String,
    /// Orders partition file name.
    #[serde(default = "default_orders_file")]
    pub orders_file: String,
    /// Products partition file name.
    #[serde(default = "default_products_file")]
    pub products_file: String,
}

impl Default for MultiConfig {
    fn default() -> Self {
        Self {
            directory: default_multi_directory(),
            cache_size: DEFAULT_MULTI_CACHE_SIZE,
            users_file: default_users_file(),
            orders_file: default_orders_file(),
            products_file: default_products_file(),
        }
    }
}

impl MultiConfig {
    /// Returns the configured file name of a partition.
    #[must_use]
    pub fn file_name(&self, domain: TableDomain) -> &str {
        match domain {
            TableDomain::Users => &self.users_file,
            TableDomain::Orders => &self.orders_file,
            TableDomain::Products => &self.products_file,
        }
    }

    /// Returns the full path of a partition file.
    #[must_use]
    pub fn partition_path(&self, domain: TableDomain) -> PathBuf {
        self.directory.join(self.file_name(domain))
    }

    /// Validates the partitioned section.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_path_string("multi.directory", &self.directory.to_string_lossy())?;
        let mut seen: Vec<&str> = Vec::with_capacity(TableDomain::ALL.len());
        for domain in TableDomain::ALL {
            let name = self.file_name(domain);
            let field = format!("multi.{domain}_file");
            validate_file_name(&field, name)?;
            if seen.contains(&name) {
                return Err(ConfigError::Invalid(format!("{field} duplicates another partition")));
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// Demo workload sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Concurrent worker threads.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Operations per worker thread.
    #[serde(default = "default_operations")]
    pub operations: usize,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            operations: DEFAULT_OPERATIONS,
        }
    }
}

impl WorkloadConfig {
    /// Validates workload bounds.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.threads == 0 || self.threads > MAX_THREADS {
            return Err(ConfigError::Invalid(format!(
                "workload.threads must be between 1 and {MAX_THREADS}"
            )));
        }
        if self.operations == 0 || self.operations > MAX_OPERATIONS {
            return Err(ConfigError::Invalid(format!(
                "workload.operations must be between 1 and {MAX_OPERATIONS}"
            )));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` filter directive, e.g. `info,keel_store_sqlite=debug`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl LoggingConfig {
    /// Validates the filter directive length.
    fn validate(&self) -> Result<(), ConfigError> {
        let trimmed = self.filter.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::Invalid("logging.filter must be non-empty".to_string()));
        }
        if trimmed.len() > MAX_LOG_FILTER_LENGTH {
            return Err(ConfigError::Invalid("logging.filter exceeds max length".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment, reporting whether the
/// caller named it explicitly.
fn resolve_path(path: Option<&Path>) -> Result<(PathBuf, bool), ConfigError> {
    if let Some(path) = path {
        return Ok((path.to_path_buf(), true));
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok((PathBuf::from(env_path), true));
    }
    Ok((PathBuf::from(DEFAULT_CONFIG_NAME), false))
}

/// Validates the resolved path against length limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    validate_path_string("config path", &path.to_string_lossy())
}

/// Validates a path string against length constraints.
pub(crate) fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        if component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a bare partition file name.
fn validate_file_name(field: &str, value: &str) -> Result<(), ConfigError> {
    validate_path_string(field, value)?;
    if value.contains('/') || value.contains('\\') || value == "." || value == ".." {
        return Err(ConfigError::Invalid(format!("{field} must be a bare file name")));
    }
    Ok(())
}

/// Returns the default single-file database path.
fn default_single_path() -> PathBuf {
    PathBuf::from("keel.db")
}

/// Returns the default single-file page cache size.
const fn default_single_cache_size() -> i64 {
    DEFAULT_SINGLE_CACHE_SIZE
}

/// Returns the default partition directory.
fn default_multi_directory() -> PathBuf {
    PathBuf::from(".")
}

/// Returns the default partition page cache size.
const fn default_multi_cache_size() -> i64 {
    DEFAULT_MULTI_CACHE_SIZE
}

/// Returns the default users partition file name.
fn default_users_file() -> String {
    TableDomain::Users.default_file_name().to_string()
}

/// Returns the default orders partition file name.
fn default_orders_file() -> String {
    TableDomain::Orders.default_file_name().to_string()
}

/// Returns the default products partition file name.
fn default_products_file() -> String {
    TableDomain::Products.default_file_name().to_string()
}

/// Returns the default worker thread count.
const fn default_threads() -> usize {
    DEFAULT_THREADS
}

/// Returns the default operations per worker.
const fn default_operations() -> usize {
    DEFAULT_OPERATIONS
}

/// Returns the default log filter.
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

// ============================================================================
// SECTION: Tests
// ============================================================================
