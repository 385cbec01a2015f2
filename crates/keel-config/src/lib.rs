// crates/keel-config/src/lib.rs
// ============================================================================
// Module: Keel Config Library
// Description: Canonical keel.toml model and validation.
// Purpose: Single source of truth for coordinator and demo settings.
// Dependencies: keel-store-sqlite, keel-records, serde, toml
// ============================================================================

//! ## Overview
//! `keel-config` loads `keel.toml`, applies defaults for every section and
//! rejects out-of-range values before any database is opened.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
