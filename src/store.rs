//! Remote record store adapter.
//!
//! The hosted database is treated as an opaque key-addressed record set per
//! entity kind, behind the [`RecordStore`] trait: load the full set,
//! replace it wholesale, insert one record, or clear the kind. The sync
//! merge and backup/restore paths are written against the trait so tests
//! can substitute an in-memory store and assert, among other things, that a
//! failed load never reaches a write.
//!
//! Field-name casing is translated here and only here: the wire speaks
//! snake_case (hosted relational DB), everything in-process speaks
//! camelCase.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::api;
use crate::records::EntityKind;
use crate::storage;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure taxonomy for remote store access. `Load` and `Persist` are kept
/// distinct because the sync merge must fail closed on the former and
/// propagate the latter as fatal for the call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("shop server not configured: {0}")]
    NotConfigured(String),

    #[error("failed to load {kind} from server: {message}")]
    Load { kind: EntityKind, message: String },

    #[error("failed to persist {kind} to server: {message}")]
    Persist { kind: EntityKind, message: String },

    /// Insert hit an existing id. Expected during merge-mode restore;
    /// counted as "skipped", never treated as fatal.
    #[error("record already exists in {kind}")]
    Conflict { kind: EntityKind },

    #[error("malformed {kind} record from server: {message}")]
    Malformed { kind: EntityKind, message: String },
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Key-addressed record-set access for one entity kind. Records cross this
/// boundary as already-normalized (camelCase) JSON objects.
pub trait RecordStore: Send + Sync {
    /// Load the full record set. Must return a concrete (possibly empty)
    /// list; an error here means "do not write anything".
    fn load(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError>;

    /// Replace the full record set in a single write.
    fn replace(&self, kind: EntityKind, records: &[Value]) -> Result<(), StoreError>;

    /// Insert one record; `StoreError::Conflict` when the id exists.
    fn insert(&self, kind: EntityKind, record: &Value) -> Result<(), StoreError>;

    /// Delete every record of the kind, returning how many were removed.
    fn clear(&self, kind: EntityKind) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// Typed helpers over the Value-level trait
// ---------------------------------------------------------------------------

/// Load and deserialize the full set for a kind. A record that fails to
/// deserialize poisons the whole load: the merge contract cannot
/// distinguish "partial" from "complete", so it must not proceed.
pub fn load_records<R: DeserializeOwned>(
    store: &dyn RecordStore,
    kind: EntityKind,
) -> Result<Vec<R>, StoreError> {
    let raw = store.load(kind)?;
    raw.into_iter()
        .map(|value| {
            serde_json::from_value(value).map_err(|e| StoreError::Malformed {
                kind,
                message: e.to_string(),
            })
        })
        .collect()
}

/// Serialize and persist the full set for a kind as one replacement write.
pub fn replace_records<R: Serialize>(
    store: &dyn RecordStore,
    kind: EntityKind,
    records: &[R],
) -> Result<(), StoreError> {
    let raw: Vec<Value> = records
        .iter()
        .map(|record| serde_json::to_value(record).unwrap_or(Value::Null))
        .collect();
    store.replace(kind, &raw)
}

// ---------------------------------------------------------------------------
// Wire field-name normalization
// ---------------------------------------------------------------------------

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(ch.to_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Normalize one wire record's top-level field names to camelCase.
pub fn normalize_wire_record(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut normalized = Map::with_capacity(map.len());
            for (key, field) in map {
                normalized.insert(snake_to_camel(&key), field);
            }
            Value::Object(normalized)
        }
        other => other,
    }
}

/// Translate one in-process record's top-level field names to the wire's
/// snake_case.
pub fn denormalize_wire_record(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut wire = Map::with_capacity(map.len());
            for (key, field) in map {
                wire.insert(camel_to_snake(&key), field);
            }
            Value::Object(wire)
        }
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Remote implementation (blocking HTTP)
// ---------------------------------------------------------------------------

/// `RecordStore` over the shop server's REST API. Uses the blocking
/// reqwest client; callers in async context wrap store work in
/// `spawn_blocking` (the sync cycle and the backup commands do).
pub struct RemoteStore {
    client: Client,
}

impl RemoteStore {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(api::DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Resolve connection material at call time so credential changes take
    /// effect without restarting anything.
    fn connection(&self) -> Result<(String, String), StoreError> {
        let (url, key) = storage::server_connection().ok_or_else(|| {
            StoreError::NotConfigured("missing server URL or API key".to_string())
        })?;
        Ok((api::normalize_server_url(&url), key))
    }

    fn request(
        &self,
        kind: EntityKind,
        method: reqwest::Method,
        body: Option<Value>,
    ) -> Result<Value, (String, Option<reqwest::StatusCode>)> {
        let (base, key) = self.connection().map_err(|e| (e.to_string(), None))?;
        let url = format!("{base}{}", kind.api_path());
        let shop_id = storage::get_credential("shop_id").unwrap_or_default();

        let mut req = self
            .client
            .request(method, &url)
            .header(api::API_KEY_HEADER, key.trim())
            .header(api::SHOP_ID_HEADER, &shop_id);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let resp = req
            .send()
            .map_err(|e| (api::friendly_error(&base, &e), None))?;
        let status = resp.status();
        let text = resp.text().unwrap_or_default();

        if !status.is_success() {
            return Err((api::response_error_detail(status, &text), Some(status)));
        }
        if text.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| (format!("Invalid JSON from shop server: {e}"), None))
    }

    /// List backups stored on the server, newest first.
    pub fn list_backups(&self) -> Result<Vec<Value>, String> {
        let (base, key) = self.connection().map_err(|e| e.to_string())?;
        let url = format!("{base}/api/shop/backups");
        let shop_id = storage::get_credential("shop_id").unwrap_or_default();

        let resp = self
            .client
            .get(&url)
            .header(api::API_KEY_HEADER, key.trim())
            .header(api::SHOP_ID_HEADER, &shop_id)
            .send()
            .map_err(|e| api::friendly_error(&base, &e))?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(api::response_error_detail(status, &text));
        }
        let body: Value = serde_json::from_str(&text)
            .map_err(|e| format!("Invalid JSON from shop server: {e}"))?;
        Ok(body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    /// Download one compressed backup envelope by id.
    pub fn fetch_backup(&self, backup_id: &str) -> Result<Vec<u8>, String> {
        let (base, key) = self.connection().map_err(|e| e.to_string())?;
        let url = format!("{base}/api/shop/backups/{backup_id}");
        let shop_id = storage::get_credential("shop_id").unwrap_or_default();

        let resp = self
            .client
            .get(&url)
            .header(api::API_KEY_HEADER, key.trim())
            .header(api::SHOP_ID_HEADER, &shop_id)
            .send()
            .map_err(|e| api::friendly_error(&base, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            return Err(api::response_error_detail(status, &text));
        }
        let bytes = resp
            .bytes()
            .map_err(|e| format!("Failed to read backup body: {e}"))?;
        Ok(bytes.to_vec())
    }

    /// Upload a compressed backup envelope to the server's backup endpoint.
    pub fn upload_backup(&self, compressed: Vec<u8>, exported_at: &str) -> Result<Value, String> {
        let (base, key) = self.connection().map_err(|e| e.to_string())?;
        let url = format!("{base}/api/shop/backups");
        let shop_id = storage::get_credential("shop_id").unwrap_or_default();

        let resp = self
            .client
            .post(&url)
            .header(api::API_KEY_HEADER, key.trim())
            .header(api::SHOP_ID_HEADER, &shop_id)
            .header("Content-Type", "application/zstd")
            .header("X-Backup-Exported-At", exported_at)
            .body(compressed)
            .send()
            .map_err(|e| api::friendly_error(&base, &e))?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(api::response_error_detail(status, &text));
        }
        if text.is_empty() {
            return Ok(serde_json::json!({ "success": true }));
        }
        serde_json::from_str(&text).map_err(|e| format!("Invalid JSON from shop server: {e}"))
    }
}

impl Default for RemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore for RemoteStore {
    fn load(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError> {
        let body = self
            .request(kind, reqwest::Method::GET, None)
            .map_err(|(message, _)| match storage::server_connection() {
                None => StoreError::NotConfigured(message),
                Some(_) => StoreError::Load { kind, message },
            })?;

        let rows = body
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| StoreError::Load {
                kind,
                message: "response missing data array".to_string(),
            })?;

        Ok(rows.into_iter().map(normalize_wire_record).collect())
    }

    fn replace(&self, kind: EntityKind, records: &[Value]) -> Result<(), StoreError> {
        let wire: Vec<Value> = records
            .iter()
            .cloned()
            .map(denormalize_wire_record)
            .collect();
        self.request(
            kind,
            reqwest::Method::PUT,
            Some(serde_json::json!({ "records": wire })),
        )
        .map_err(|(message, _)| StoreError::Persist { kind, message })?;
        Ok(())
    }

    fn insert(&self, kind: EntityKind, record: &Value) -> Result<(), StoreError> {
        let wire = denormalize_wire_record(record.clone());
        match self.request(kind, reqwest::Method::POST, Some(wire)) {
            Ok(_) => Ok(()),
            Err((_, Some(status))) if status.as_u16() == 409 => Err(StoreError::Conflict { kind }),
            Err((message, _)) => Err(StoreError::Persist { kind, message }),
        }
    }

    fn clear(&self, kind: EntityKind) -> Result<u64, StoreError> {
        let body = self
            .request(kind, reqwest::Method::DELETE, None)
            .map_err(|(message, _)| StoreError::Persist { kind, message })?;
        let removed = body
            .get("deleted")
            .or_else(|| body.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or_else(|| {
                warn!(kind = %kind, "clear response missing deleted count");
                0
            });
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory store for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory `RecordStore` with a load-failure switch and write-spy
    /// counters, for exercising the fail-closed merge contract.
    #[derive(Default)]
    pub struct MemoryStore {
        records: Mutex<HashMap<EntityKind, Vec<Value>>>,
        failing_loads: Mutex<HashSet<EntityKind>>,
        failing_writes: Mutex<HashSet<EntityKind>>,
        pub loads: AtomicUsize,
        pub writes: AtomicUsize,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, kind: EntityKind, records: Vec<Value>) {
            self.records.lock().unwrap().insert(kind, records);
        }

        pub fn fail_loads_for(&self, kind: EntityKind) {
            self.failing_loads.lock().unwrap().insert(kind);
        }

        pub fn fail_writes_for(&self, kind: EntityKind) {
            self.failing_writes.lock().unwrap().insert(kind);
        }

        pub fn snapshot(&self, kind: EntityKind) -> Vec<Value> {
            self.records
                .lock()
                .unwrap()
                .get(&kind)
                .cloned()
                .unwrap_or_default()
        }

        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl RecordStore for MemoryStore {
        fn load(&self, kind: EntityKind) -> Result<Vec<Value>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.failing_loads.lock().unwrap().contains(&kind) {
                return Err(StoreError::Load {
                    kind,
                    message: "simulated load failure".to_string(),
                });
            }
            Ok(self.snapshot(kind))
        }

        fn replace(&self, kind: EntityKind, records: &[Value]) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.failing_writes.lock().unwrap().contains(&kind) {
                return Err(StoreError::Persist {
                    kind,
                    message: "simulated persist failure".to_string(),
                });
            }
            self.records
                .lock()
                .unwrap()
                .insert(kind, records.to_vec());
            Ok(())
        }

        fn insert(&self, kind: EntityKind, record: &Value) -> Result<(), StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut guard = self.records.lock().unwrap();
            let set = guard.entry(kind).or_default();
            let id = record.get("id").and_then(Value::as_str).unwrap_or_default();
            if set
                .iter()
                .any(|existing| existing.get("id").and_then(Value::as_str) == Some(id))
            {
                return Err(StoreError::Conflict { kind });
            }
            set.push(record.clone());
            Ok(())
        }

        fn clear(&self, kind: EntityKind) -> Result<u64, StoreError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let removed = self
                .records
                .lock()
                .unwrap()
                .insert(kind, Vec::new())
                .map(|old| old.len() as u64)
                .unwrap_or(0);
            Ok(removed)
        }
    }
}
