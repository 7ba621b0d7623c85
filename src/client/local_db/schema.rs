//! Schema Versioning
//!
//! The table definitions live in `schema.sql` and are applied idempotently on
//! every open. This module only tracks which numbered revisions a database
//! file has recorded in `schema_migrations`.

/// Current schema revision
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Recorded revisions, oldest first
///
/// 1: entity tables, sync cursors, pending mutation queue.
/// 2: optimistic overlay columns, resume tokens, daily activity.
pub const MIGRATION_VERSIONS: &[i32] = &[1, 2];

/// Check if database needs migration
pub fn needs_migration(current_version: i32) -> bool {
    current_version < CURRENT_SCHEMA_VERSION
}

/// Revisions newer than `current_version`
pub fn get_pending_migrations(current_version: i32) -> Vec<i32> {
    MIGRATION_VERSIONS
        .iter()
        .filter(|&&v| v > current_version)
        .copied()
        .collect()
}
