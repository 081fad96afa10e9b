//! Local SQLite database layer for Shop Manager.
//!
//! Uses rusqlite with WAL mode. The local tables are an offline mirror of
//! the remote record store plus the operation queue; the remote store
//! remains the source of truth. Provides schema migrations, settings
//! helpers, and managed state for use across Tauri commands.

use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Tauri managed state holding the database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

impl DbState {
    /// Directory holding attachment files, next to the database file.
    pub fn attachments_dir(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(|p| p.join("attachments"))
            .unwrap_or_else(|| PathBuf::from("attachments"))
    }
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{app_data_dir}/shop.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once.
pub fn init(app_data_dir: &Path) -> Result<DbState, String> {
    fs::create_dir_all(app_data_dir).map_err(|e| format!("Failed to create data dir: {e}"))?;

    let db_path = app_data_dir.join("shop.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                // Also remove WAL/SHM files if present
                let wal = db_path.with_extension("db-wal");
                let shm = db_path.with_extension("db-shm");
                let _ = fs::remove_file(&wal);
                let _ = fs::remove_file(&shm);
            }
            open_and_configure(&db_path)
                .map_err(|e| format!("Database open failed after retry: {e}"))?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// Open the database file and apply pragmas.
fn open_and_configure(path: &Path) -> Result<Connection, String> {
    let conn = Connection::open(path).map_err(|e| format!("sqlite open: {e}"))?;

    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .map_err(|e| format!("pragma setup: {e}"))?;

    Ok(conn)
}

/// Run all pending migrations up to `CURRENT_SCHEMA_VERSION`.
fn run_migrations(conn: &Connection) -> Result<(), String> {
    // Ensure schema_version table exists first
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("create schema_version: {e}"))?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        info!("Database schema up to date (v{current})");
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: ledger mirror tables, operation queue, settings.
fn migrate_v1(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        -- local_settings (category/key/value store)
        CREATE TABLE IF NOT EXISTS local_settings (
            id TEXT PRIMARY KEY DEFAULT (lower(hex(randomblob(16)))),
            setting_category TEXT NOT NULL,
            setting_key TEXT NOT NULL,
            setting_value TEXT NOT NULL,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            UNIQUE(setting_category, setting_key)
        );

        -- suppliers (parent of transactions)
        CREATE TABLE IF NOT EXISTS suppliers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            address TEXT,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- customers (parent of udhar and income)
        CREATE TABLE IF NOT EXISTS customers (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            phone TEXT,
            address TEXT,
            notes TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- transactions (owed to supplier)
        CREATE TABLE IF NOT EXISTS transactions (
            id TEXT PRIMARY KEY,
            supplier_id TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL DEFAULT 0,
            paid_amount REAL NOT NULL DEFAULT 0,
            cash_amount REAL NOT NULL DEFAULT 0,
            online_amount REAL NOT NULL DEFAULT 0,
            date TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- udhar (owed by customer)
        CREATE TABLE IF NOT EXISTS udhar (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            description TEXT,
            amount REAL NOT NULL DEFAULT 0,
            paid_amount REAL NOT NULL DEFAULT 0,
            cash_amount REAL NOT NULL DEFAULT 0,
            online_amount REAL NOT NULL DEFAULT 0,
            date TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- income
        CREATE TABLE IF NOT EXISTS income (
            id TEXT PRIMARY KEY,
            customer_id TEXT NOT NULL,
            source TEXT,
            amount REAL NOT NULL DEFAULT 0,
            date TEXT,
            created_at TEXT,
            updated_at TEXT
        );

        -- sync_queue (append-only operation queue)
        CREATE TABLE IF NOT EXISTS sync_queue (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            payload TEXT,
            idempotency_key TEXT UNIQUE NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER DEFAULT 0,
            max_retries INTEGER DEFAULT 5,
            last_error TEXT,
            created_at TEXT DEFAULT (datetime('now')),
            updated_at TEXT DEFAULT (datetime('now')),
            synced_at TEXT
        );

        -- Indexes
        CREATE INDEX IF NOT EXISTS idx_transactions_supplier ON transactions(supplier_id);
        CREATE INDEX IF NOT EXISTS idx_udhar_customer ON udhar(customer_id);
        CREATE INDEX IF NOT EXISTS idx_income_customer ON income(customer_id);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_status ON sync_queue(status);
        CREATE INDEX IF NOT EXISTS idx_sync_queue_kind ON sync_queue(entity_kind, status);
        CREATE INDEX IF NOT EXISTS idx_local_settings_cat_key ON local_settings(setting_category, setting_key);

        -- Record migration
        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        format!("migration v1: {e}")
    })?;

    info!("Applied migration v1");
    Ok(())
}

/// Migration v2: image attachment metadata.
fn migrate_v2(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS attachments (
            id TEXT PRIMARY KEY,
            entity_kind TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content_hash TEXT,
            byte_size INTEGER DEFAULT 0,
            created_at TEXT DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_attachments_entity ON attachments(entity_kind, entity_id);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_attachments_file ON attachments(file_name);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        format!("migration v2: {e}")
    })?;

    info!("Applied migration v2");
    Ok(())
}

// ---------------------------------------------------------------------------
// Settings helpers
// ---------------------------------------------------------------------------

/// Read a value from local_settings. Returns None when absent.
pub fn get_setting(conn: &Connection, category: &str, key: &str) -> Option<String> {
    conn.query_row(
        "SELECT setting_value FROM local_settings \
         WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
        |row| row.get(0),
    )
    .ok()
}

/// Upsert a value into local_settings.
pub fn set_setting(conn: &Connection, category: &str, key: &str, value: &str) -> Result<(), String> {
    conn.execute(
        "INSERT INTO local_settings (setting_category, setting_key, setting_value, updated_at) \
         VALUES (?1, ?2, ?3, datetime('now')) \
         ON CONFLICT(setting_category, setting_key) DO UPDATE SET \
            setting_value = excluded.setting_value, updated_at = excluded.updated_at",
        params![category, key, value],
    )
    .map_err(|e| format!("set_setting: {e}"))?;
    Ok(())
}

/// Delete a setting. Deleting an absent key is a no-op.
pub fn delete_setting(conn: &Connection, category: &str, key: &str) -> Result<(), String> {
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = ?1 AND setting_key = ?2",
        params![category, key],
    )
    .map_err(|e| format!("delete_setting: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

/// Apply the full schema to an in-memory connection for tests.
#[cfg(test)]
pub fn run_migrations_for_test(conn: &Connection) {
    run_migrations(conn).expect("test migrations");
}

#[cfg(test)]
pub fn test_db_state() -> DbState {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )
    .expect("pragma setup");
    run_migrations_for_test(&conn);
    DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_create_all_ledger_tables() {
        let db = test_db_state();
        let conn = db.conn.lock().unwrap();
        for table in [
            "suppliers",
            "customers",
            "transactions",
            "udhar",
            "income",
            "sync_queue",
            "local_settings",
            "attachments",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }

    #[test]
    fn settings_round_trip_and_delete() {
        let db = test_db_state();
        let conn = db.conn.lock().unwrap();

        assert!(get_setting(&conn, "shop", "currency").is_none());
        set_setting(&conn, "shop", "currency", "INR").unwrap();
        assert_eq!(
            get_setting(&conn, "shop", "currency").as_deref(),
            Some("INR")
        );
        set_setting(&conn, "shop", "currency", "USD").unwrap();
        assert_eq!(
            get_setting(&conn, "shop", "currency").as_deref(),
            Some("USD")
        );
        delete_setting(&conn, "shop", "currency").unwrap();
        assert!(get_setting(&conn, "shop", "currency").is_none());
    }
}
