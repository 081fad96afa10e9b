use serde_json::Value;
use std::sync::atomic::Ordering;

use crate::APP_START_EPOCH;

#[tauri::command]
pub async fn app_get_version() -> Result<String, String> {
    Ok(env!("CARGO_PKG_VERSION").to_string())
}

#[tauri::command]
pub async fn system_get_info() -> Result<Value, String> {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let started = APP_START_EPOCH.load(Ordering::Relaxed);
    let uptime = if started > 0 { now.saturating_sub(started) } else { 0 };

    Ok(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "uptimeSeconds": uptime,
    }))
}
