//! Image attachments for ledger records.
//!
//! Receipt photos arrive from the frontend as base64 payloads, are
//! validated as PNG or JPEG, and are stored on disk next to the database
//! under `attachments/`, named by entity id plus an md5 content hash so
//! re-uploading the same image is a no-op. Metadata lives in the
//! `attachments` table.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use image::ImageFormat;
use rusqlite::params;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::DbState;
use crate::records::EntityKind;

/// Attachments past this size are refused outright.
const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

fn decode_payload(data: &str) -> Result<Vec<u8>, String> {
    // Accept both bare base64 and data-URL form
    let raw = match data.find(";base64,") {
        Some(idx) => &data[idx + ";base64,".len()..],
        None => data,
    };
    BASE64
        .decode(raw.trim())
        .map_err(|e| format!("Attachment is not valid base64: {e}"))
}

fn validate_image(bytes: &[u8]) -> Result<&'static str, String> {
    if bytes.len() > MAX_ATTACHMENT_BYTES {
        return Err("Attachment exceeds the 10 MB limit".into());
    }
    match image::guess_format(bytes) {
        Ok(ImageFormat::Png) => Ok("png"),
        Ok(ImageFormat::Jpeg) => Ok("jpg"),
        Ok(other) => Err(format!("Unsupported image format: {other:?}")),
        Err(_) => Err("Attachment is not a recognizable image".into()),
    }
}

/// Store one attachment for a record. Returns the attachment metadata.
/// Saving the same bytes for the same record twice is idempotent.
pub fn save_attachment(
    db: &DbState,
    kind: EntityKind,
    entity_id: &str,
    data: &str,
) -> Result<Value, String> {
    let bytes = decode_payload(data)?;
    let ext = validate_image(&bytes)?;

    let hash = format!("{:x}", md5::compute(&bytes));
    let file_name = format!("{entity_id}-{hash}.{ext}");

    let dir = db.attachments_dir();
    fs::create_dir_all(&dir).map_err(|e| format!("create attachments dir: {e}"))?;
    let path = dir.join(&file_name);

    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attachments WHERE file_name = ?1",
            params![file_name],
            |row| row.get(0),
        )
        .ok();
    if let Some(id) = existing {
        return Ok(json!({
            "id": id,
            "fileName": file_name,
            "contentHash": hash,
            "byteSize": bytes.len(),
            "deduplicated": true,
        }));
    }

    fs::write(&path, &bytes).map_err(|e| format!("write attachment: {e}"))?;

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO attachments (id, entity_kind, entity_id, file_name, content_hash, byte_size) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, kind.as_str(), entity_id, file_name, hash, bytes.len() as i64],
    )
    .map_err(|e| format!("insert attachment: {e}"))?;

    info!("Saved attachment {} for {} {}", file_name, kind, entity_id);
    Ok(json!({
        "id": id,
        "fileName": file_name,
        "contentHash": hash,
        "byteSize": bytes.len(),
        "deduplicated": false,
    }))
}

/// Attachment metadata for one record.
pub fn list_attachments(db: &DbState, kind: EntityKind, entity_id: &str) -> Result<Vec<Value>, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let mut stmt = conn
        .prepare(
            "SELECT id, file_name, content_hash, byte_size, created_at \
             FROM attachments WHERE entity_kind = ?1 AND entity_id = ?2 \
             ORDER BY created_at",
        )
        .map_err(|e| format!("list attachments: {e}"))?;
    let rows = stmt
        .query_map(params![kind.as_str(), entity_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "fileName": row.get::<_, String>(1)?,
                "contentHash": row.get::<_, Option<String>>(2)?,
                "byteSize": row.get::<_, i64>(3)?,
                "createdAt": row.get::<_, Option<String>>(4)?,
            }))
        })
        .map_err(|e| format!("list attachments: {e}"))?
        .collect::<rusqlite::Result<Vec<Value>>>()
        .map_err(|e| format!("list attachments: {e}"))?;
    Ok(rows)
}

/// Read one attachment's bytes back as base64 for display.
pub fn read_attachment(db: &DbState, attachment_id: &str) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let file_name: String = conn
        .query_row(
            "SELECT file_name FROM attachments WHERE id = ?1",
            params![attachment_id],
            |row| row.get(0),
        )
        .map_err(|_| format!("No attachment with id {attachment_id}"))?;
    drop(conn);

    let path = db.attachments_dir().join(&file_name);
    let bytes = fs::read(&path).map_err(|e| format!("read attachment: {e}"))?;
    Ok(json!({
        "id": attachment_id,
        "fileName": file_name,
        "data": BASE64.encode(&bytes),
    }))
}

/// Remove one attachment: file first, then the row. A missing file is
/// logged and the row still goes.
pub fn delete_attachment(db: &DbState, attachment_id: &str) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    let file_name: Option<String> = conn
        .query_row(
            "SELECT file_name FROM attachments WHERE id = ?1",
            params![attachment_id],
            |row| row.get(0),
        )
        .ok();
    let Some(file_name) = file_name else {
        return Err(format!("No attachment with id {attachment_id}"));
    };

    let path = db.attachments_dir().join(&file_name);
    if let Err(e) = fs::remove_file(&path) {
        warn!("Attachment file {} missing on delete: {e}", path.display());
    }
    conn.execute(
        "DELETE FROM attachments WHERE id = ?1",
        params![attachment_id],
    )
    .map_err(|e| format!("delete attachment: {e}"))?;
    Ok(())
}

/// Remove every attachment belonging to a record; called when the record
/// itself is deleted. Returns how many were removed.
pub fn delete_for_entity(db: &DbState, kind: EntityKind, entity_id: &str) -> Result<u64, String> {
    let ids: Vec<String> = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare("SELECT id FROM attachments WHERE entity_kind = ?1 AND entity_id = ?2")
            .map_err(|e| format!("select attachments: {e}"))?;
        let ids = stmt
            .query_map(params![kind.as_str(), entity_id], |row| row.get(0))
            .map_err(|e| format!("select attachments: {e}"))?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(|e| format!("select attachments: {e}"))?;
        ids
    };

    let mut removed = 0u64;
    for id in ids {
        delete_attachment(db, &id)?;
        removed += 1;
    }
    Ok(removed)
}

/// Sweep the attachments directory for files no metadata row points at,
/// and metadata rows whose file is gone.
pub fn cleanup_orphans(db: &DbState) -> Result<Value, String> {
    let dir = db.attachments_dir();
    let mut scanned = 0u64;
    let mut removed = 0u64;
    let mut errors = 0u64;

    let known: HashSet<String> = {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        let mut stmt = conn
            .prepare("SELECT file_name FROM attachments")
            .map_err(|e| format!("select attachments: {e}"))?;
        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| format!("select attachments: {e}"))?
            .collect::<rusqlite::Result<HashSet<String>>>()
            .map_err(|e| format!("select attachments: {e}"))?;
        names
    };

    if dir.is_dir() {
        let entries = fs::read_dir(&dir).map_err(|e| format!("read attachments dir: {e}"))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            scanned += 1;
            if !known.contains(&name) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => removed += 1,
                    Err(e) => {
                        warn!("Failed to remove orphan attachment {name}: {e}");
                        errors += 1;
                    }
                }
            }
        }
    }

    // Rows whose file is gone
    let mut dangling = 0u64;
    {
        let conn = db.conn.lock().map_err(|e| e.to_string())?;
        for name in &known {
            if !dir.join(name).is_file() {
                conn.execute(
                    "DELETE FROM attachments WHERE file_name = ?1",
                    params![name],
                )
                .map_err(|e| format!("delete dangling attachment row: {e}"))?;
                dangling += 1;
            }
        }
    }

    info!("Attachment cleanup: scanned {scanned}, removed {removed} orphans, {dangling} dangling rows");
    Ok(json!({
        "scanned": scanned,
        "removed": removed,
        "danglingRows": dangling,
        "errors": errors,
    }))
}
