//! Diagnostics for Shop Manager.
//!
//! Provides:
//! - **About info**: version, build timestamp, git SHA, platform
//! - **System health**: schema version, sync backlog, record counts,
//!   database and attachment footprint
//! - **Diagnostics export**: packages logs, health, backlog, and the last
//!   sync errors into a zip bundle for support, optionally redacted.
//! - **Log rotation helpers**: used by `lib.rs` for rolling log files.

use crate::db::DbState;
use crate::records::KINDS_PARENTS_FIRST;
use rusqlite::params;
use serde_json::{json, Value};
use std::fs;
use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of log files to retain.
pub const MAX_LOG_FILES: usize = 10;

/// Maximum size per log file in bytes (5 MB).
pub const MAX_LOG_SIZE: u64 = 5 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsExportOptions {
    pub include_logs: bool,
    pub redact_sensitive: bool,
}

impl Default for DiagnosticsExportOptions {
    fn default() -> Self {
        Self {
            include_logs: true,
            redact_sensitive: false,
        }
    }
}

// ---------------------------------------------------------------------------
// About info
// ---------------------------------------------------------------------------

pub fn get_about_info() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "buildTimestamp": env!("BUILD_TIMESTAMP"),
        "gitSha": env!("BUILD_GIT_SHA"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "rustVersion": env!("CARGO_PKG_RUST_VERSION"),
    })
}

// ---------------------------------------------------------------------------
// System health
// ---------------------------------------------------------------------------

/// Health snapshot for the System Health screen.
pub fn get_system_health(db: &DbState) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(get_system_health_locked(db, &conn))
}

fn get_system_health_locked(db: &DbState, conn: &rusqlite::Connection) -> Value {
    let schema_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let sync_backlog = get_sync_backlog(&conn);
    let last_sync_times = get_last_sync_times(&conn);

    let pending_ops: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sync_queue WHERE status IN ('pending', 'syncing')",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let mut record_counts = json!({});
    for kind in KINDS_PARENTS_FIRST {
        let count: i64 = conn
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", kind.table()),
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);
        record_counts[kind.as_str()] = json!(count);
    }

    let attachment_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM attachments", [], |row| row.get(0))
        .unwrap_or(0);
    let attachment_bytes: i64 = conn
        .query_row(
            "SELECT COALESCE(SUM(byte_size), 0) FROM attachments",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let db_size = fs::metadata(&db.db_path).map(|m| m.len()).unwrap_or(0);

    json!({
        "schemaVersion": schema_version,
        "syncBacklog": sync_backlog,
        "lastSyncTimes": last_sync_times,
        "pendingOps": pending_ops,
        "recordCounts": record_counts,
        "attachments": {
            "count": attachment_count,
            "totalBytes": attachment_bytes,
        },
        "dbSizeBytes": db_size,
        "serverConfigured": crate::storage::is_configured(),
    })
}

fn get_sync_backlog(conn: &rusqlite::Connection) -> Value {
    let mut result = json!({});
    if let Ok(mut stmt) = conn.prepare(
        "SELECT entity_kind, status, COUNT(*) FROM sync_queue GROUP BY entity_kind, status",
    ) {
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .ok();
        if let Some(rows) = rows {
            for (entity_kind, status, count) in rows.flatten() {
                let entry = result
                    .as_object_mut()
                    .unwrap()
                    .entry(&entity_kind)
                    .or_insert_with(|| json!({}));
                entry[&status] = json!(count);
            }
        }
    }
    result
}

fn get_last_sync_times(conn: &rusqlite::Connection) -> Value {
    let mut result = json!({});
    if let Ok(mut stmt) = conn.prepare(
        "SELECT entity_kind, MAX(synced_at) FROM sync_queue \
         WHERE status = 'synced' GROUP BY entity_kind",
    ) {
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .ok();
        if let Some(rows) = rows {
            for (entity_kind, ts) in rows.flatten() {
                result[entity_kind] = json!(ts);
            }
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Diagnostics export (zip bundle)
// ---------------------------------------------------------------------------

pub fn export_diagnostics(db: &DbState, output_dir: &Path) -> Result<String, String> {
    export_diagnostics_with_options(db, output_dir, DiagnosticsExportOptions::default())
}

/// Collect diagnostics data and write a zip file into `output_dir`.
/// Returns the path to the zip file.
pub fn export_diagnostics_with_options(
    db: &DbState,
    output_dir: &Path,
    export_options: DiagnosticsExportOptions,
) -> Result<String, String> {
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
    let zip_name = format!("shop-manager-diagnostics-{timestamp}.zip");
    let zip_path = output_dir.join(&zip_name);

    let file = fs::File::create(&zip_path)
        .map_err(|e| format!("Failed to create diagnostics zip: {e}"))?;
    let mut zip = zip::ZipWriter::new(file);

    let zip_options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let sections: Vec<(&str, Value)> = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        vec![
            ("about.json", get_about_info()),
            ("system_health.json", get_system_health_locked(db, &conn)),
            ("sync_backlog.json", get_sync_backlog(&conn)),
            ("sync_errors.json", json!(get_recent_sync_errors(&conn, 20))),
        ]
    };

    for (name, section) in sections {
        let section = redact_value_for_export(section, export_options.redact_sensitive);
        zip.start_file(name, zip_options).map_err(|e| e.to_string())?;
        zip.write_all(serde_json::to_string_pretty(&section).unwrap().as_bytes())
            .map_err(|e| e.to_string())?;
    }

    // Redacted bundles never carry raw logs; log lines may quote payloads.
    if export_options.include_logs && !export_options.redact_sensitive {
        bundle_log_files(&mut zip, zip_options);
    }

    zip.finish().map_err(|e| e.to_string())?;

    Ok(zip_path.to_string_lossy().to_string())
}

/// Copy log files into the archive under `logs/`, each capped at
/// `MAX_LOG_SIZE` so one runaway file cannot bloat the bundle.
fn bundle_log_files(
    zip: &mut zip::ZipWriter<fs::File>,
    zip_options: zip::write::SimpleFileOptions,
) {
    let log_dir = get_log_dir();
    let Ok(entries) = fs::read_dir(&log_dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) if n.starts_with("shop.") => n.to_string(),
            Some(n) if path.extension().and_then(|e| e.to_str()) == Some("log") => n.to_string(),
            _ => continue,
        };
        if zip.start_file(format!("logs/{name}"), zip_options).is_err() {
            continue;
        }
        if let Ok(f) = fs::File::open(&path) {
            let mut buf = Vec::new();
            let _ = f.take(MAX_LOG_SIZE).read_to_end(&mut buf);
            let _ = zip.write_all(&buf);
        }
    }
}

fn redact_value_for_export(value: Value, enabled: bool) -> Value {
    if !enabled {
        return value;
    }
    redact_sensitive_fields(value)
}

fn redact_sensitive_fields(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, value) in map {
                if should_redact_key(&key) {
                    redacted.insert(key, Value::String("[REDACTED]".to_string()));
                } else {
                    redacted.insert(key, redact_sensitive_fields(value));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(redact_sensitive_fields).collect())
        }
        other => other,
    }
}

fn should_redact_key(key: &str) -> bool {
    let normalized = key.to_ascii_lowercase();
    let sensitive_markers = [
        "api_key",
        "apikey",
        "secret",
        "password",
        "token",
        "authorization",
        "cookie",
        "pin",
    ];
    sensitive_markers
        .iter()
        .any(|marker| normalized.contains(marker))
}

fn get_recent_sync_errors(conn: &rusqlite::Connection, limit: i64) -> Vec<Value> {
    let mut errors = Vec::new();
    if let Ok(mut stmt) = conn.prepare(
        "SELECT id, entity_kind, entity_id, status, last_error, retry_count, created_at, updated_at \
         FROM sync_queue \
         WHERE last_error IS NOT NULL AND last_error != '' \
         ORDER BY updated_at DESC LIMIT ?1",
    ) {
        if let Ok(rows) = stmt.query_map(params![limit], |row| {
            Ok(json!({
                "id": row.get::<_, i64>(0)?,
                "entityKind": row.get::<_, String>(1)?,
                "entityId": row.get::<_, String>(2)?,
                "status": row.get::<_, String>(3)?,
                "lastError": row.get::<_, String>(4)?,
                "retryCount": row.get::<_, i64>(5)?,
                "createdAt": row.get::<_, Option<String>>(6)?,
                "updatedAt": row.get::<_, Option<String>>(7)?,
            }))
        }) {
            for row in rows.flatten() {
                errors.push(row);
            }
        }
    }
    errors
}

// ---------------------------------------------------------------------------
// Log rotation
// ---------------------------------------------------------------------------

/// The log directory path (same location used by `lib.rs`).
pub fn get_log_dir() -> PathBuf {
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            #[cfg(target_os = "windows")]
            {
                PathBuf::from(std::env::var("USERPROFILE").unwrap_or_else(|_| ".".into()))
                    .join("AppData")
                    .join("Local")
            }
            #[cfg(not(target_os = "windows"))]
            {
                PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                    .join(".local")
                    .join("share")
            }
        });
    base.join("com.shopmanager.app").join("logs")
}

/// Prune old log files, keeping only the most recent `MAX_LOG_FILES`.
pub fn prune_old_logs() {
    let log_dir = get_log_dir();
    if !log_dir.exists() {
        return;
    }

    let Ok(entries) = fs::read_dir(&log_dir) else {
        return;
    };

    let mut log_files: Vec<(PathBuf, std::time::SystemTime)> = entries
        .flatten()
        .filter_map(|entry| {
            let path = entry.path();
            let name = path.file_name()?.to_str()?;
            if !path.is_file() || !name.starts_with("shop.") {
                return None;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::UNIX_EPOCH);
            Some((path, modified))
        })
        .collect();

    log_files.sort_by(|a, b| b.1.cmp(&a.1));

    for (path, _) in log_files.iter().skip(MAX_LOG_FILES) {
        if let Err(e) = fs::remove_file(path) {
            warn!("Failed to prune log file {}: {e}", path.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn about_info_has_required_fields() {
        let info = get_about_info();
        assert!(info.get("version").is_some());
        assert!(info.get("buildTimestamp").is_some());
        assert!(info.get("gitSha").is_some());
        assert!(info.get("platform").is_some());
        assert!(info.get("arch").is_some());
    }

    #[test]
    fn log_dir_is_stable() {
        let d1 = get_log_dir();
        let d2 = get_log_dir();
        assert_eq!(d1, d2);
        assert!(d1.to_string_lossy().contains("com.shopmanager.app"));
    }

    #[test]
    fn system_health_with_empty_db() {
        let dir = std::env::temp_dir().join(format!("diag_test_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_state = crate::db::init(&dir).unwrap();
        let health = get_system_health(&db_state).unwrap();
        assert_eq!(health["schemaVersion"], 2);
        assert_eq!(health["pendingOps"], 0);
        assert_eq!(health["recordCounts"]["suppliers"], 0);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn export_diagnostics_creates_zip() {
        let dir = std::env::temp_dir().join(format!("diag_export_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let db_state = crate::db::init(&dir).unwrap();
        let result = export_diagnostics(&db_state, &dir);
        assert!(result.is_ok());
        let zip_path = result.unwrap();
        assert!(std::path::Path::new(&zip_path).exists());
        let file = std::fs::File::open(&zip_path).unwrap();
        let archive = zip::ZipArchive::new(file).unwrap();
        assert!(archive.len() >= 4); // about, health, backlog, errors
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn should_redact_key_matches_sensitive_markers() {
        assert!(should_redact_key("api_key"));
        assert!(should_redact_key("Authorization"));
        assert!(should_redact_key("owner_pin"));
        assert!(!should_redact_key("status"));
    }

    #[test]
    fn redact_sensitive_fields_recurses_through_objects() {
        let value = json!({
            "token": "tk-val",
            "nested": {
                "api_key": "key-value",
                "status": "ok"
            },
            "items": [
                { "password": "1234" },
                { "name": "safe" }
            ]
        });

        let redacted = redact_sensitive_fields(value);
        assert_eq!(redacted["token"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["api_key"], json!("[REDACTED]"));
        assert_eq!(redacted["nested"]["status"], json!("ok"));
        assert_eq!(redacted["items"][0]["password"], json!("[REDACTED]"));
        assert_eq!(redacted["items"][1]["name"], json!("safe"));
    }
}
