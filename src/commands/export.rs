use serde::Deserialize;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

use crate::records::EntityKind;
use crate::{db, export};

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct ExportPayload {
    #[serde(default, alias = "entity_kind", alias = "entityKind")]
    kind: Option<String>,
    #[serde(default, alias = "file_path", alias = "filePath")]
    path: Option<String>,
    #[serde(default, alias = "from_date", alias = "startDate")]
    from: Option<String>,
    #[serde(default, alias = "to_date", alias = "endDate")]
    to: Option<String>,
}

fn parse_export_payload(arg0: Option<Value>) -> Result<ExportPayload, String> {
    let payload = match arg0 {
        Some(Value::String(kind)) => serde_json::json!({ "kind": kind }),
        Some(Value::Object(obj)) => Value::Object(obj),
        Some(v) => v,
        None => serde_json::json!({}),
    };
    serde_json::from_value(payload).map_err(|e| format!("Invalid export payload: {e}"))
}

fn require_kind(payload: &ExportPayload) -> Result<EntityKind, String> {
    let raw = payload.kind.as_deref().ok_or("Missing record kind")?;
    EntityKind::parse(raw).ok_or_else(|| format!("Unknown record kind: {raw}"))
}

fn require_path(payload: &ExportPayload) -> Result<PathBuf, String> {
    payload
        .path
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .ok_or("Missing export file path".into())
}

/// Render one kind as CSV and return the text to the frontend, which
/// hands it to the OS save dialog.
#[tauri::command]
pub async fn export_csv_text(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = parse_export_payload(arg0)?;
    let kind = require_kind(&payload)?;
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    let text = export::export_csv(&conn, kind, payload.from.as_deref(), payload.to.as_deref())?;
    Ok(serde_json::json!({ "success": true, "csv": text }))
}

#[tauri::command]
pub async fn export_csv_file(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = parse_export_payload(arg0)?;
    let kind = require_kind(&payload)?;
    let path = require_path(&payload)?;
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    export::save_csv_to_file(&conn, kind, &path, payload.from.as_deref(), payload.to.as_deref())
}

/// Write every kind into one workbook, a sheet per kind.
#[tauri::command]
pub async fn export_xlsx_file(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = parse_export_payload(arg0)?;
    let path = require_path(&payload)?;
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    export::export_xlsx(&conn, &path, payload.from.as_deref(), payload.to.as_deref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_payload_forms() {
        let payload = parse_export_payload(Some(serde_json::json!("udhar"))).unwrap();
        assert_eq!(require_kind(&payload).unwrap(), EntityKind::Udhar);

        let payload = parse_export_payload(Some(serde_json::json!({
            "entityKind": "income",
            "filePath": "/tmp/income.csv",
            "startDate": "2026-01-01",
            "endDate": "2026-03-31",
        })))
        .unwrap();
        assert_eq!(require_kind(&payload).unwrap(), EntityKind::Income);
        assert_eq!(require_path(&payload).unwrap(), PathBuf::from("/tmp/income.csv"));
        assert_eq!(payload.from.as_deref(), Some("2026-01-01"));
    }

    #[test]
    fn missing_kind_or_path_is_rejected() {
        let payload = parse_export_payload(None).unwrap();
        assert!(require_kind(&payload).is_err());
        assert!(require_path(&payload).is_err());
    }
}
