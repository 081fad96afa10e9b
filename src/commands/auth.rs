use serde_json::Value;
use std::sync::Arc;
use tauri::Emitter;

use crate::{auth, db};

fn parse_permission_payload(arg0: Option<Value>) -> Option<String> {
    let payload = arg0?;

    match payload {
        Value::String(permission) => {
            let trimmed = permission.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Value::Object(map) => ["permission", "name", "key", "arg0"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .and_then(|permission| {
                let trimmed = permission.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }),
        _ => None,
    }
}

#[tauri::command]
pub async fn auth_login(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    auth::login(arg0, &db, &auth_state)
}

#[tauri::command]
pub async fn auth_logout(
    auth_state: tauri::State<'_, auth::AuthState>,
    app: tauri::AppHandle,
) -> Result<(), String> {
    auth::logout(&auth_state);
    let _ = app.emit("session_timeout", serde_json::json!({ "reason": "logout" }));
    Ok(())
}

#[tauri::command]
pub async fn auth_get_current_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_json(&auth_state))
}

#[tauri::command]
pub async fn auth_validate_session(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::validate_session(&auth_state))
}

#[tauri::command]
pub async fn auth_has_permission(
    arg0: Option<Value>,
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<bool, String> {
    let permission = parse_permission_payload(arg0);
    Ok(auth::has_permission(&auth_state, permission.as_deref()))
}

#[tauri::command]
pub async fn auth_get_session_stats(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<Value, String> {
    Ok(auth::get_session_stats(&auth_state))
}

#[tauri::command]
pub async fn auth_is_configured(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<bool, String> {
    auth::is_pin_configured(&db)
}

#[tauri::command]
pub async fn auth_setup_pin(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    auth::setup_pin(arg0, &db)
}

#[tauri::command]
pub async fn auth_track_activity(
    auth_state: tauri::State<'_, auth::AuthState>,
) -> Result<(), String> {
    auth::track_activity(&auth_state);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permission_payload_forms() {
        assert_eq!(
            parse_permission_payload(Some(serde_json::json!("manage_backups"))).as_deref(),
            Some("manage_backups")
        );
        assert_eq!(
            parse_permission_payload(Some(serde_json::json!({ "permission": "view_ledger" })))
                .as_deref(),
            Some("view_ledger")
        );
        assert_eq!(parse_permission_payload(Some(serde_json::json!("  "))), None);
        assert_eq!(parse_permission_payload(None), None);
    }
}
