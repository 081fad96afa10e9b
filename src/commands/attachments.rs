use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::records::EntityKind;
use crate::{attachments, db};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentSavePayload {
    #[serde(alias = "entity_kind", alias = "kind")]
    entity_kind: String,
    #[serde(alias = "entity_id", alias = "id")]
    entity_id: String,
    #[serde(alias = "image", alias = "payload")]
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttachmentListPayload {
    #[serde(alias = "entity_kind", alias = "kind")]
    entity_kind: String,
    #[serde(alias = "entity_id", alias = "id")]
    entity_id: String,
}

fn parse_kind(raw: &str) -> Result<EntityKind, String> {
    EntityKind::parse(raw).ok_or_else(|| format!("Unknown record kind: {raw}"))
}

fn parse_attachment_id(arg0: Option<Value>) -> Result<String, String> {
    let id = match arg0 {
        Some(Value::String(id)) => Some(id),
        Some(Value::Object(map)) => ["attachmentId", "attachment_id", "id"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .map(|s| s.to_string()),
        _ => None,
    };
    id.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("Missing attachment id".into())
}

#[tauri::command]
pub async fn attachment_save(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing attachment payload")?;
    let parsed: AttachmentSavePayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid attachment payload: {e}"))?;
    let kind = parse_kind(&parsed.entity_kind)?;
    attachments::save_attachment(&db, kind, parsed.entity_id.trim(), &parsed.data)
}

#[tauri::command]
pub async fn attachment_list(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing attachment payload")?;
    let parsed: AttachmentListPayload = serde_json::from_value(payload)
        .map_err(|e| format!("Invalid attachment payload: {e}"))?;
    let kind = parse_kind(&parsed.entity_kind)?;
    Ok(Value::Array(attachments::list_attachments(
        &db,
        kind,
        parsed.entity_id.trim(),
    )?))
}

#[tauri::command]
pub async fn attachment_read(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let id = parse_attachment_id(arg0)?;
    attachments::read_attachment(&db, &id)
}

#[tauri::command]
pub async fn attachment_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let id = parse_attachment_id(arg0)?;
    attachments::delete_attachment(&db, &id)?;
    Ok(serde_json::json!({ "success": true }))
}

/// Sweep the attachments directory: delete files with no database row and
/// rows whose file disappeared.
#[tauri::command]
pub async fn attachment_cleanup_orphans(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    attachments::cleanup_orphans(&db)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_id_payload_forms() {
        assert_eq!(
            parse_attachment_id(Some(serde_json::json!("att-1"))).unwrap(),
            "att-1"
        );
        assert_eq!(
            parse_attachment_id(Some(serde_json::json!({ "attachmentId": "att-2" }))).unwrap(),
            "att-2"
        );
        assert!(parse_attachment_id(Some(serde_json::json!(42))).is_err());
    }

    #[test]
    fn save_payload_accepts_aliases() {
        let parsed: AttachmentSavePayload = serde_json::from_value(serde_json::json!({
            "kind": "suppliers",
            "id": "sup-1",
            "image": "data:image/png;base64,AAAA",
        }))
        .unwrap();
        assert_eq!(parsed.entity_kind, "suppliers");
        assert_eq!(parsed.entity_id, "sup-1");
        assert!(parse_kind(&parsed.entity_kind).is_ok());
        assert!(parse_kind("invoices").is_err());
    }
}
