// crates/keel-cli/src/lib.rs
// ============================================================================
// Module: Keel CLI Library
// Description: Demo workloads driven by the keel binary.
// Purpose: Keep workloads testable outside the command dispatcher.
// Dependencies: keel-config, keel-records, keel-store-sqlite, serde
// ============================================================================

//! ## Overview
//! Shared workload runners for the `keel` binary. Each runner returns a
//! serializable report that the binary prints as JSON.

pub mod workload;
