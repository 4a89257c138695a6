//! Database schema migrations for SQLite.
//!
//! We use a simple versioned migration system. Each migration is a SQL string
//! that transforms the schema from version N to N+1.

use rusqlite::Connection;
use tracing::info;

use grainkeeper_core::now_millis;

use crate::error::{Result, StoreError};

/// Current schema version.
pub const CURRENT_VERSION: u32 = 1;

/// Initialize or migrate the database schema.
///
/// This function is idempotent - it can be called multiple times safely.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    // Create migrations table if it doesn't exist
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
        [],
    )?;

    // Get current version
    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    // Apply migrations
    if current < CURRENT_VERSION {
        let tx = conn.transaction()?;

        for version in (current + 1)..=CURRENT_VERSION {
            apply_migration(&tx, version)?;

            tx.execute(
                "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
                rusqlite::params![version, now_millis()],
            )?;
            info!(version, "applied schema migration");
        }

        tx.commit()?;
    }

    Ok(())
}

/// Apply a specific migration version.
fn apply_migration(conn: &Connection, version: u32) -> Result<()> {
    match version {
        1 => apply_v1(conn),
        _ => Err(StoreError::Migration(format!(
            "unknown migration version: {}",
            version
        ))),
    }
}

/// Migration v1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Grains: ownership and trash state only
        CREATE TABLE grains (
            grain_id TEXT PRIMARY KEY,
            owner TEXT NOT NULL,
            title TEXT NOT NULL,
            trashed INTEGER NOT NULL DEFAULT 0,
            created INTEGER NOT NULL,
            cached_view BLOB NOT NULL               -- CBOR ViewInfo
        );

        -- Share edges: active and inactive role assignments
        CREATE TABLE share_edges (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,  -- insertion order
            edge_id TEXT NOT NULL UNIQUE,
            grain_id TEXT NOT NULL,
            sharer TEXT NOT NULL,
            recipient TEXT NOT NULL,
            role_assignment BLOB NOT NULL,          -- CBOR RoleAssignment
            add_permissions BLOB NOT NULL,          -- CBOR bool array
            remove_permissions BLOB NOT NULL,       -- CBOR bool array
            active INTEGER NOT NULL,
            created INTEGER NOT NULL,
            petname TEXT
        );

        -- Open UI sessions
        CREATE TABLE sessions (
            session_id TEXT PRIMARY KEY,
            grain_id TEXT NOT NULL,
            principal TEXT NOT NULL,
            created INTEGER NOT NULL
        );

        -- Sturdy-ref records, keyed by secret hash; the secret is never stored
        CREATE TABLE tokens (
            token_hash BLOB PRIMARY KEY,            -- 32 bytes, Blake3 of secret
            notification_id TEXT,                   -- set for notification handles
            record BLOB NOT NULL,                   -- CBOR TokenRecord
            created INTEGER NOT NULL
        );

        -- Notifications shown to grain owners
        CREATE TABLE notifications (
            notification_id TEXT PRIMARY KEY,
            grain_id TEXT NOT NULL,
            account TEXT NOT NULL,
            text TEXT NOT NULL,
            ongoing BLOB,                           -- wakelock secret, frontend-owned
            timestamp INTEGER NOT NULL,
            is_unread INTEGER NOT NULL DEFAULT 1
        );

        -- Indexes for common queries
        CREATE INDEX idx_edges_grain ON share_edges(grain_id);
        CREATE INDEX idx_sessions_grain ON sessions(grain_id);
        CREATE INDEX idx_tokens_notification ON tokens(notification_id);
        CREATE INDEX idx_notifications_account ON notifications(account);
        "#,
    )?;

    Ok(())
}
