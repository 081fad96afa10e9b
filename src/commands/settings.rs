use serde_json::Value;
use std::sync::Arc;
use tauri::Emitter;
use tracing::info;

use crate::{api, db, storage};

struct SettingsSetPayload {
    category: String,
    key: String,
    value: String,
}

fn value_to_settings_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Setting writes arrive as `{ category, key, value }`, as a dotted
/// `"category.key"` string plus a second value argument, or as a bare key
/// that lands in the `general` category.
fn parse_settings_set_payload(
    arg0: Option<Value>,
    arg1: Option<Value>,
) -> Result<SettingsSetPayload, String> {
    let mut category = "general".to_string();
    let mut key: Option<String> = None;
    let mut value_node = arg1.unwrap_or(Value::Null);

    if let Some(Value::Object(obj)) = arg0.as_ref() {
        if let Some(cat) = obj
            .get("category")
            .or_else(|| obj.get("settingType"))
            .and_then(|v| v.as_str())
        {
            if !cat.trim().is_empty() {
                category = cat.trim().to_string();
            }
        }
        key = obj
            .get("key")
            .or_else(|| obj.get("settingKey"))
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string());
        if value_node.is_null() {
            value_node = obj
                .get("value")
                .or_else(|| obj.get("settingValue"))
                .cloned()
                .unwrap_or(Value::Null);
        }
    }

    if key.is_none() {
        if let Some(Value::String(raw)) = arg0.as_ref() {
            let trimmed = raw.trim();
            if let Some((cat, k)) = trimmed.split_once('.') {
                category = cat.to_string();
                key = Some(k.to_string());
            } else if !trimmed.is_empty() {
                key = Some(trimmed.to_string());
            }
        }
    }

    let key = key.ok_or("Missing setting key")?;
    Ok(SettingsSetPayload {
        category,
        key,
        value: value_to_settings_string(&value_node),
    })
}

fn parse_settings_get_payload(arg0: Option<Value>) -> Result<(String, String), String> {
    match arg0 {
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            match trimmed.split_once('.') {
                Some((cat, key)) => Ok((cat.to_string(), key.to_string())),
                None if !trimmed.is_empty() => Ok(("general".to_string(), trimmed.to_string())),
                None => Err("Missing setting key".into()),
            }
        }
        Some(Value::Object(obj)) => {
            let category = obj
                .get("category")
                .or_else(|| obj.get("settingType"))
                .and_then(|v| v.as_str())
                .unwrap_or("general")
                .trim()
                .to_string();
            let key = obj
                .get("key")
                .or_else(|| obj.get("settingKey"))
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .ok_or("Missing setting key")?;
            Ok((category, key))
        }
        _ => Err("Missing setting key".into()),
    }
}

/// Credentials plus the PIN flag, everything the onboarding and settings
/// screens need in one call. Secrets never cross this boundary.
#[tauri::command]
pub async fn get_settings(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let mut config = storage::get_full_config();
    let pin_configured = crate::auth::is_pin_configured(&db).unwrap_or(false);
    if let Some(obj) = config.as_object_mut() {
        obj.insert("pinConfigured".to_string(), Value::Bool(pin_configured));
    }
    Ok(config)
}

#[tauri::command]
pub async fn settings_is_configured() -> Result<bool, String> {
    Ok(storage::is_configured())
}

#[tauri::command]
pub async fn settings_get(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let (category, key) = parse_settings_get_payload(arg0)?;
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    match db::get_setting(&conn, &category, &key) {
        Some(value) => Ok(Value::String(value)),
        None => Ok(Value::Null),
    }
}

#[tauri::command]
pub async fn settings_set(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let payload = parse_settings_set_payload(arg0, arg1)?;
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    db::set_setting(&conn, &payload.category, &payload.key, &payload.value)?;
    Ok(serde_json::json!({ "success": true }))
}

#[tauri::command]
pub async fn settings_update_server_credentials(
    arg0: Option<Value>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing credentials payload")?;
    let result = storage::update_server_credentials(&payload)?;
    let _ = app.emit("server_configured", serde_json::json!({ "configured": true }));
    Ok(result)
}

/// Probe the shop server health endpoint. Credentials may come inline
/// (testing before save) or from the stored connection.
#[tauri::command]
pub async fn settings_test_connection(arg0: Option<Value>) -> Result<Value, String> {
    let inline = |key_camel: &str, key_snake: &str| -> Option<String> {
        arg0.as_ref()
            .and_then(|v| v.get(key_camel).or_else(|| v.get(key_snake)))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let (server_url, api_key) = match (
        inline("serverUrl", "server_url"),
        inline("apiKey", "api_key"),
    ) {
        (Some(url), Some(key)) => (url, key),
        _ => storage::server_connection().ok_or("Shop server not configured")?,
    };

    let result = api::test_connectivity(&server_url, &api_key).await;
    serde_json::to_value(result).map_err(|e| e.to_string())
}

/// Drop PIN hashes and lockout state from local_settings.
fn clear_auth_settings(db: &db::DbState) -> Result<(), String> {
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    conn.execute(
        "DELETE FROM local_settings WHERE setting_category = 'auth'",
        [],
    )
    .map_err(|e| format!("clear auth settings: {e}"))?;
    Ok(())
}

/// Wipe credentials and local auth material. Ledger data stays; the next
/// onboarding reconnects to the same shop or a fresh one.
#[tauri::command]
pub async fn settings_factory_reset(
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let result = storage::factory_reset()?;
    clear_auth_settings(&db)?;
    info!("factory reset complete");
    let _ = app.emit("server_configured", serde_json::json!({ "configured": false }));
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_set_payload_forms() {
        let payload = parse_settings_set_payload(
            Some(serde_json::json!({ "category": "ui", "key": "language", "value": "ur" })),
            None,
        )
        .unwrap();
        assert_eq!(payload.category, "ui");
        assert_eq!(payload.key, "language");
        assert_eq!(payload.value, "ur");

        let payload = parse_settings_set_payload(
            Some(serde_json::json!("ui.currency")),
            Some(serde_json::json!("PKR")),
        )
        .unwrap();
        assert_eq!(payload.category, "ui");
        assert_eq!(payload.key, "currency");
        assert_eq!(payload.value, "PKR");

        let payload = parse_settings_set_payload(
            Some(serde_json::json!("theme")),
            Some(serde_json::json!(true)),
        )
        .unwrap();
        assert_eq!(payload.category, "general");
        assert_eq!(payload.value, "true");

        assert!(parse_settings_set_payload(None, None).is_err());
    }

    #[test]
    fn factory_reset_clears_only_auth_settings() {
        let db = crate::db::test_db_state();
        {
            let conn = db.conn.lock().unwrap();
            crate::db::set_setting(&conn, "auth", "owner_pin_hash", "$2b$12$fake").unwrap();
            crate::db::set_setting(&conn, "auth", "lockout", "{}").unwrap();
            crate::db::set_setting(&conn, "ui", "language", "ur").unwrap();
        }

        clear_auth_settings(&db).unwrap();

        let conn = db.conn.lock().unwrap();
        assert!(crate::db::get_setting(&conn, "auth", "owner_pin_hash").is_none());
        assert!(crate::db::get_setting(&conn, "auth", "lockout").is_none());
        assert_eq!(
            crate::db::get_setting(&conn, "ui", "language").as_deref(),
            Some("ur")
        );
    }

    #[test]
    fn settings_get_payload_forms() {
        assert_eq!(
            parse_settings_get_payload(Some(serde_json::json!("ui.language"))).unwrap(),
            ("ui".to_string(), "language".to_string())
        );
        assert_eq!(
            parse_settings_get_payload(Some(serde_json::json!({ "key": "language" }))).unwrap(),
            ("general".to_string(), "language".to_string())
        );
        assert!(parse_settings_get_payload(None).is_err());
    }
}
