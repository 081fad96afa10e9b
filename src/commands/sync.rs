use serde_json::Value;
use std::sync::Arc;
use tauri::Emitter;

use crate::store::RemoteStore;
use crate::{db, sync};

#[tauri::command]
pub async fn sync_get_status(
    db: tauri::State<'_, Arc<db::DbState>>,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
) -> Result<Value, String> {
    sync::get_sync_status(&db, &sync_state)
}

#[tauri::command]
pub async fn sync_get_network_status(app: tauri::AppHandle) -> Result<Value, String> {
    let status = sync::check_network_status().await;
    let _ = app.emit("network_status", status.clone());
    Ok(status)
}

/// Drain the pending queue right now instead of waiting for the next
/// background cycle. The store client is blocking, so the work runs off
/// the async runtime.
#[tauri::command]
pub async fn sync_force(
    db: tauri::State<'_, Arc<db::DbState>>,
    store: tauri::State<'_, Arc<RemoteStore>>,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let db = db.inner().clone();
    let store = store.inner().clone();
    let state = sync_state.inner().clone();

    let result = tokio::task::spawn_blocking(move || sync::force_sync(&db, store.as_ref(), &state))
        .await
        .map_err(|e| format!("sync task panicked: {e}"))?;

    match result {
        Ok(synced) => {
            let _ = app.emit(
                "sync_complete",
                serde_json::json!({ "trigger": "manual", "synced": synced }),
            );
            Ok(serde_json::json!({ "success": true, "synced": synced }))
        }
        Err(e) => {
            let _ = app.emit("sync_error", serde_json::json!({ "error": e }));
            Err(e)
        }
    }
}

/// Full reconciliation: drain the queue, then merge every kind two-sided
/// with last-write-wins and push the result back.
#[tauri::command]
pub async fn sync_full(
    db: tauri::State<'_, Arc<db::DbState>>,
    store: tauri::State<'_, Arc<RemoteStore>>,
    sync_state: tauri::State<'_, Arc<sync::SyncState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let db = db.inner().clone();
    let store = store.inner().clone();
    let state = sync_state.inner().clone();

    let result = tokio::task::spawn_blocking(move || {
        let outcome = sync::full_sync(&db, store.as_ref())?;
        if let Ok(mut guard) = state.last_sync.lock() {
            *guard = Some(crate::records::now_timestamp());
        }
        Ok::<Value, String>(outcome)
    })
    .await
    .map_err(|e| format!("sync task panicked: {e}"))?;

    match result {
        Ok(outcome) => {
            let _ = app.emit("sync_complete", serde_json::json!({ "trigger": "full" }));
            Ok(outcome)
        }
        Err(e) => {
            let _ = app.emit("sync_error", serde_json::json!({ "error": e }));
            Err(e)
        }
    }
}
