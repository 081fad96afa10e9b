//! Backup and restore.
//!
//! A backup is a single JSON envelope holding every record of every kind,
//! built from the remote store (the source of truth). Restore replays an
//! envelope back into the store record by record, parents before
//! children, in one of two modes: `merge` keeps existing records and
//! skips id collisions, `replace` clears every table first. Restore never
//! aborts on a bad record; it tallies inserted/skipped/errors per kind
//! and reports the totals.

use serde_json::{json, Map, Value};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::records::{now_timestamp, EntityKind, KINDS_CHILDREN_FIRST, KINDS_PARENTS_FIRST};
use crate::store::{RecordStore, RemoteStore, StoreError};

/// Envelope format version. Bump on a breaking layout change.
pub const BACKUP_VERSION: &str = "1.0";

/// Restores with more than this share of failed records are reported as
/// unsuccessful overall.
const ERROR_SUCCESS_THRESHOLD: f64 = 0.5;

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Build a backup envelope from the remote store.
pub fn export_backup(store: &dyn RecordStore) -> Result<Value, String> {
    let mut data = Map::new();
    let mut counts = Map::new();

    for kind in KINDS_PARENTS_FIRST {
        let records = store.load(kind).map_err(|e| e.to_string())?;
        counts.insert(kind.as_str().to_string(), Value::from(records.len() as u64));
        data.insert(kind.as_str().to_string(), Value::Array(records));
    }

    info!("Backup exported: {:?}", counts);
    Ok(json!({
        "version": BACKUP_VERSION,
        "exportedAt": now_timestamp(),
        "data": Value::Object(data),
        "counts": Value::Object(counts),
    }))
}

/// Export and write the envelope to a file as pretty-printed JSON.
pub fn save_backup_to_file(store: &dyn RecordStore, path: &Path) -> Result<Value, String> {
    let envelope = export_backup(store)?;
    let text = serde_json::to_string_pretty(&envelope)
        .map_err(|e| format!("serialize backup: {e}"))?;
    fs::write(path, text).map_err(|e| format!("write backup file: {e}"))?;
    info!("Backup saved to {}", path.display());
    Ok(json!({
        "success": true,
        "path": path.display().to_string(),
        "counts": envelope["counts"].clone(),
    }))
}

/// Export, zstd-compress, and upload the envelope to the shop server.
pub fn upload_backup_to_cloud(store: &RemoteStore) -> Result<Value, String> {
    let envelope = export_backup(store)?;
    let exported_at = envelope["exportedAt"].as_str().unwrap_or_default().to_string();
    let raw = serde_json::to_vec(&envelope).map_err(|e| format!("serialize backup: {e}"))?;
    let compressed =
        zstd::encode_all(raw.as_slice(), 3).map_err(|e| format!("compress backup: {e}"))?;

    info!(
        "Uploading backup ({} bytes compressed from {})",
        compressed.len(),
        raw.len()
    );
    store.upload_backup(compressed, &exported_at)
}

/// List backups available on the shop server.
pub fn list_cloud_backups(store: &RemoteStore) -> Result<Value, String> {
    let backups = store.list_backups()?;
    Ok(json!({ "success": true, "backups": backups }))
}

/// Download a cloud backup, decompress it, and replay it.
pub fn restore_backup_from_cloud(
    store: &RemoteStore,
    backup_id: &str,
    mode: RestoreMode,
) -> Result<Value, String> {
    let compressed = store.fetch_backup(backup_id)?;
    let raw = zstd::decode_all(compressed.as_slice())
        .map_err(|e| format!("decompress backup: {e}"))?;
    let envelope: Value =
        serde_json::from_slice(&raw).map_err(|e| format!("Backup is not valid JSON: {e}"))?;
    restore_backup(store, &envelope, mode)
}

// ---------------------------------------------------------------------------
// Restore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreMode {
    Merge,
    Replace,
}

impl RestoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestoreMode::Merge => "merge",
            RestoreMode::Replace => "replace",
        }
    }

    pub fn parse(raw: &str) -> Result<RestoreMode, String> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "merge" => Ok(RestoreMode::Merge),
            "replace" => Ok(RestoreMode::Replace),
            other => Err(format!("Unknown restore mode: {other}")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct RestoreCounts {
    inserted: u64,
    skipped: u64,
    errors: u64,
}

impl RestoreCounts {
    fn to_json(self) -> Value {
        json!({
            "inserted": self.inserted,
            "skipped": self.skipped,
            "errors": self.errors,
        })
    }
}

fn validate_envelope(envelope: &Value) -> Result<&Map<String, Value>, String> {
    let version = envelope
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| "Backup file missing version".to_string())?;
    if version != BACKUP_VERSION {
        return Err(format!("Unsupported backup version: {version}"));
    }
    envelope
        .get("data")
        .and_then(Value::as_object)
        .ok_or_else(|| "Backup file missing data section".to_string())
}

/// Replay a backup envelope into the record store.
///
/// Kinds restore parents-first so child records never precede the parent
/// they reference; replace mode clears children-first for the same
/// reason. Every record inserts independently; one bad record never stops
/// the rest.
pub fn restore_backup(
    store: &dyn RecordStore,
    envelope: &Value,
    mode: RestoreMode,
) -> Result<Value, String> {
    let data = validate_envelope(envelope)?;

    if mode == RestoreMode::Replace {
        for kind in KINDS_CHILDREN_FIRST {
            let removed = store.clear(kind).map_err(|e| e.to_string())?;
            info!("Cleared {removed} {kind} records for replace restore");
        }
    }

    let mut results = Map::new();
    let mut totals = RestoreCounts::default();

    for kind in KINDS_PARENTS_FIRST {
        let records = data
            .get(kind.as_str())
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut counts = RestoreCounts::default();
        for record in &records {
            if record.get("id").and_then(Value::as_str).is_none() {
                warn!("Skipping {} record without id during restore", kind);
                counts.errors += 1;
                continue;
            }
            match store.insert(kind, record) {
                Ok(()) => counts.inserted += 1,
                Err(StoreError::Conflict { .. }) => counts.skipped += 1,
                Err(e) => {
                    warn!("Restore insert failed for {kind}: {e}");
                    counts.errors += 1;
                }
            }
        }

        totals.inserted += counts.inserted;
        totals.skipped += counts.skipped;
        totals.errors += counts.errors;
        results.insert(kind.as_str().to_string(), counts.to_json());
    }

    let attempted = totals.inserted + totals.skipped + totals.errors;
    let success =
        attempted == 0 || (totals.errors as f64) < (attempted as f64) * ERROR_SUCCESS_THRESHOLD;

    let summary = format!(
        "Restored {} records ({} skipped, {} errors)",
        totals.inserted, totals.skipped, totals.errors
    );
    info!("{summary}");

    Ok(json!({
        "success": success,
        "results": Value::Object(results),
        "totals": totals.to_json(),
        "summary": summary,
    }))
}

/// Read an envelope from disk and restore it.
pub fn restore_backup_from_file(
    store: &dyn RecordStore,
    path: &Path,
    mode: RestoreMode,
) -> Result<Value, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("read backup file: {e}"))?;
    let envelope: Value =
        serde_json::from_str(&text).map_err(|e| format!("Backup file is not valid JSON: {e}"))?;
    restore_backup(store, &envelope, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::MemoryStore;

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            EntityKind::Suppliers,
            vec![json!({ "id": "s1", "name": "Anand Traders", "updatedAt": "2024-01-01" })],
        );
        store.seed(
            EntityKind::Customers,
            vec![json!({ "id": "c1", "name": "Ravi", "updatedAt": "2024-01-01" })],
        );
        store.seed(
            EntityKind::Transactions,
            vec![json!({
                "id": "t1", "supplierId": "s1", "amount": 500.0,
                "paidAmount": 0.0, "updatedAt": "2024-01-02"
            })],
        );
        store
    }

    #[test]
    fn export_envelope_carries_version_counts_and_all_kinds() {
        let store = seeded_store();
        let envelope = export_backup(&store).unwrap();

        assert_eq!(envelope["version"], BACKUP_VERSION);
        assert!(envelope["exportedAt"].is_string());
        for kind in KINDS_PARENTS_FIRST {
            assert!(envelope["data"][kind.as_str()].is_array());
        }
        assert_eq!(envelope["counts"]["suppliers"], 1);
        assert_eq!(envelope["counts"]["transactions"], 1);
        assert_eq!(envelope["counts"]["income"], 0);
    }

    #[test]
    fn merge_restore_skips_existing_ids_and_inserts_new() {
        let source = seeded_store();
        let envelope = export_backup(&source).unwrap();

        let target = MemoryStore::new();
        target.seed(
            EntityKind::Suppliers,
            vec![json!({ "id": "s1", "name": "Already here" })],
        );

        let result = restore_backup(&target, &envelope, RestoreMode::Merge).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["results"]["suppliers"]["skipped"], 1);
        assert_eq!(result["results"]["customers"]["inserted"], 1);
        assert_eq!(result["results"]["transactions"]["inserted"], 1);

        // The existing record was not overwritten
        let suppliers = target.snapshot(EntityKind::Suppliers);
        assert_eq!(suppliers.len(), 1);
        assert_eq!(suppliers[0]["name"], "Already here");
    }

    #[test]
    fn replace_restore_clears_then_loads_envelope() {
        let source = seeded_store();
        let envelope = export_backup(&source).unwrap();

        let target = MemoryStore::new();
        target.seed(
            EntityKind::Suppliers,
            vec![
                json!({ "id": "old-1", "name": "Stale" }),
                json!({ "id": "old-2", "name": "Staler" }),
            ],
        );

        let result = restore_backup(&target, &envelope, RestoreMode::Replace).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["results"]["suppliers"]["inserted"], 1);

        let suppliers = target.snapshot(EntityKind::Suppliers);
        assert_eq!(suppliers.len(), 1);
        assert_eq!(suppliers[0]["id"], "s1");
    }

    #[test]
    fn restore_continues_past_bad_records_and_tallies_errors() {
        let envelope = json!({
            "version": BACKUP_VERSION,
            "exportedAt": "2024-01-01T00:00:00Z",
            "data": {
                "suppliers": [
                    { "name": "No id at all" },
                    { "id": "good", "name": "Good Supplier" },
                ],
            },
        });

        let target = MemoryStore::new();
        let result = restore_backup(&target, &envelope, RestoreMode::Merge).unwrap();
        assert_eq!(result["results"]["suppliers"]["errors"], 1);
        assert_eq!(result["results"]["suppliers"]["inserted"], 1);
        assert_eq!(target.snapshot(EntityKind::Suppliers).len(), 1);
    }

    #[test]
    fn restore_rejects_unknown_version_and_missing_data() {
        let target = MemoryStore::new();
        let wrong_version = json!({ "version": "9.9", "data": {} });
        assert!(restore_backup(&target, &wrong_version, RestoreMode::Merge).is_err());

        let no_data = json!({ "version": BACKUP_VERSION });
        assert!(restore_backup(&target, &no_data, RestoreMode::Merge).is_err());
        assert_eq!(target.write_count(), 0);
    }

    #[test]
    fn file_round_trip() {
        let store = seeded_store();
        let dir = std::env::temp_dir().join(format!("shop-backup-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("backup.json");

        let saved = save_backup_to_file(&store, &path).unwrap();
        assert_eq!(saved["success"], true);

        let target = MemoryStore::new();
        let result = restore_backup_from_file(&target, &path, RestoreMode::Merge).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(target.snapshot(EntityKind::Transactions).len(), 1);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn restore_mode_parse() {
        assert_eq!(RestoreMode::parse("merge").unwrap(), RestoreMode::Merge);
        assert_eq!(RestoreMode::parse(" Replace ").unwrap(), RestoreMode::Replace);
        assert!(RestoreMode::parse("upsert").is_err());
    }
}
