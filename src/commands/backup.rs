use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tauri::Emitter;
use tracing::warn;

use crate::records::KINDS_PARENTS_FIRST;
use crate::store::RemoteStore;
use crate::{backup, db, ledger};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackupPathPayload {
    #[serde(alias = "file_path", alias = "filePath", alias = "target")]
    path: String,
}

fn parse_path_payload(arg0: Option<Value>) -> Result<PathBuf, String> {
    let payload = match arg0 {
        Some(Value::String(path)) => serde_json::json!({ "path": path }),
        Some(Value::Object(obj)) => Value::Object(obj),
        Some(v) => v,
        None => serde_json::json!({}),
    };
    let parsed: BackupPathPayload =
        serde_json::from_value(payload).map_err(|e| format!("Invalid backup path payload: {e}"))?;
    let trimmed = parsed.path.trim();
    if trimmed.is_empty() {
        return Err("Missing backup file path".into());
    }
    Ok(PathBuf::from(trimmed))
}

/// Restore payloads carry the mode next to either an inline envelope or a
/// file path. Mode defaults to merge, the non-destructive option.
fn parse_restore_mode(arg0: &Option<Value>) -> Result<backup::RestoreMode, String> {
    let raw = arg0
        .as_ref()
        .and_then(|v| v.get("mode"))
        .and_then(Value::as_str)
        .unwrap_or("merge");
    backup::RestoreMode::parse(raw)
}

/// The server copy just changed underneath the local mirror; reload every
/// kind so the UI reflects the restored data immediately.
fn refresh_local_mirrors(db: &db::DbState, store: &RemoteStore) -> Result<(), String> {
    use crate::store::RecordStore;

    for kind in KINDS_PARENTS_FIRST {
        let records = store.load(kind).map_err(|e| e.to_string())?;
        let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
        ledger::replace_mirror(&conn, kind, &records)?;
    }
    Ok(())
}

#[tauri::command]
pub async fn backup_export(
    store: tauri::State<'_, Arc<RemoteStore>>,
) -> Result<Value, String> {
    let store = store.inner().clone();
    tokio::task::spawn_blocking(move || backup::export_backup(store.as_ref()))
        .await
        .map_err(|e| format!("backup task panicked: {e}"))?
}

#[tauri::command]
pub async fn backup_save_to_file(
    arg0: Option<Value>,
    store: tauri::State<'_, Arc<RemoteStore>>,
) -> Result<Value, String> {
    let path = parse_path_payload(arg0)?;
    let store = store.inner().clone();
    tokio::task::spawn_blocking(move || backup::save_backup_to_file(store.as_ref(), &path))
        .await
        .map_err(|e| format!("backup task panicked: {e}"))?
}

#[tauri::command]
pub async fn backup_upload_cloud(
    store: tauri::State<'_, Arc<RemoteStore>>,
) -> Result<Value, String> {
    let store = store.inner().clone();
    tokio::task::spawn_blocking(move || backup::upload_backup_to_cloud(store.as_ref()))
        .await
        .map_err(|e| format!("backup task panicked: {e}"))?
}

/// Restore from an inline envelope: `{ "mode": "merge"|"replace",
/// "backup": { ...envelope... } }`.
#[tauri::command]
pub async fn backup_restore(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    store: tauri::State<'_, Arc<RemoteStore>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let mode = parse_restore_mode(&arg0)?;
    let envelope = arg0
        .as_ref()
        .and_then(|v| v.get("backup").or_else(|| v.get("envelope")))
        .cloned()
        .ok_or("Missing backup envelope")?;

    let db = db.inner().clone();
    let store = store.inner().clone();

    let result = tokio::task::spawn_blocking(move || {
        let outcome = backup::restore_backup(store.as_ref(), &envelope, mode)?;
        if let Err(e) = refresh_local_mirrors(&db, &store) {
            warn!("mirror refresh after restore failed: {e}");
        }
        Ok::<Value, String>(outcome)
    })
    .await
    .map_err(|e| format!("restore task panicked: {e}"))?;

    if result.is_ok() {
        let _ = app.emit("backup_restored", serde_json::json!({ "mode": mode.as_str() }));
    }
    result
}

#[tauri::command]
pub async fn backup_list_cloud(
    store: tauri::State<'_, Arc<RemoteStore>>,
) -> Result<Value, String> {
    let store = store.inner().clone();
    tokio::task::spawn_blocking(move || backup::list_cloud_backups(store.as_ref()))
        .await
        .map_err(|e| format!("backup task panicked: {e}"))?
}

/// Restore a backup stored on the shop server:
/// `{ "backupId": "...", "mode": "merge"|"replace" }`.
#[tauri::command]
pub async fn backup_restore_from_cloud(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    store: tauri::State<'_, Arc<RemoteStore>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let mode = parse_restore_mode(&arg0)?;
    let backup_id = arg0
        .as_ref()
        .and_then(|v| v.get("backupId").or_else(|| v.get("backup_id")).or_else(|| v.get("id")))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or("Missing backupId")?;

    let db = db.inner().clone();
    let store = store.inner().clone();

    let result = tokio::task::spawn_blocking(move || {
        let outcome = backup::restore_backup_from_cloud(store.as_ref(), &backup_id, mode)?;
        if let Err(e) = refresh_local_mirrors(&db, &store) {
            warn!("mirror refresh after restore failed: {e}");
        }
        Ok::<Value, String>(outcome)
    })
    .await
    .map_err(|e| format!("restore task panicked: {e}"))?;

    if result.is_ok() {
        let _ = app.emit("backup_restored", serde_json::json!({ "mode": mode.as_str() }));
    }
    result
}

/// Restore from a backup file on disk: `{ "path": "...", "mode": "merge" }`.
#[tauri::command]
pub async fn backup_restore_from_file(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    store: tauri::State<'_, Arc<RemoteStore>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let mode = parse_restore_mode(&arg0)?;
    let path = parse_path_payload(arg0)?;

    let db = db.inner().clone();
    let store = store.inner().clone();

    let result = tokio::task::spawn_blocking(move || {
        let outcome = backup::restore_backup_from_file(store.as_ref(), &path, mode)?;
        if let Err(e) = refresh_local_mirrors(&db, &store) {
            warn!("mirror refresh after restore failed: {e}");
        }
        Ok::<Value, String>(outcome)
    })
    .await
    .map_err(|e| format!("restore task panicked: {e}"))?;

    if result.is_ok() {
        let _ = app.emit("backup_restored", serde_json::json!({ "mode": mode.as_str() }));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_payload_forms() {
        assert_eq!(
            parse_path_payload(Some(serde_json::json!("/tmp/shop.json"))).unwrap(),
            PathBuf::from("/tmp/shop.json")
        );
        assert_eq!(
            parse_path_payload(Some(serde_json::json!({ "filePath": "/tmp/b.json" }))).unwrap(),
            PathBuf::from("/tmp/b.json")
        );
        assert!(parse_path_payload(None).is_err());
    }

    #[test]
    fn restore_mode_defaults_to_merge() {
        let payload = Some(serde_json::json!({ "backup": {} }));
        assert_eq!(parse_restore_mode(&payload).unwrap(), backup::RestoreMode::Merge);

        let payload = Some(serde_json::json!({ "mode": "replace" }));
        assert_eq!(parse_restore_mode(&payload).unwrap(), backup::RestoreMode::Replace);

        let payload = Some(serde_json::json!({ "mode": "wipe" }));
        assert!(parse_restore_mode(&payload).is_err());
    }
}
