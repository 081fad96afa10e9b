use serde_json::Value;
use std::sync::Arc;

use crate::{db, diagnostics};

fn parse_diagnostics_export_payload(arg0: Option<Value>) -> diagnostics::DiagnosticsExportOptions {
    let mut options = diagnostics::DiagnosticsExportOptions::default();

    match arg0 {
        Some(Value::Bool(include_logs)) => {
            options.include_logs = include_logs;
        }
        Some(Value::Object(obj)) => {
            if let Some(include_logs) = obj
                .get("includeLogs")
                .or_else(|| obj.get("include_logs"))
                .or_else(|| obj.get("logs"))
                .and_then(|v| v.as_bool())
            {
                options.include_logs = include_logs;
            }
            if let Some(redact_sensitive) = obj
                .get("redactSensitive")
                .or_else(|| obj.get("redact_sensitive"))
                .or_else(|| obj.get("redacted"))
                .and_then(|v| v.as_bool())
            {
                options.redact_sensitive = redact_sensitive;
            }
        }
        _ => {}
    }

    options
}

fn open_directory(dir: &std::path::Path) -> Result<(), String> {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("explorer")
            .arg(dir)
            .spawn()
            .map_err(|e| format!("Failed to open folder: {e}"))?;
        Ok(())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(dir)
            .spawn()
            .map_err(|e| format!("Failed to open folder: {e}"))?;
        Ok(())
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    {
        std::process::Command::new("xdg-open")
            .arg(dir)
            .spawn()
            .map_err(|e| format!("Failed to open folder: {e}"))?;
        Ok(())
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos", unix)))]
    {
        let _ = dir;
        Err("Opening the diagnostics folder is not supported on this platform".into())
    }
}

fn export_dir(db: &db::DbState) -> std::path::PathBuf {
    db.db_path
        .parent()
        .map(|p| p.join("diagnostics"))
        .unwrap_or_else(|| std::env::temp_dir().join("shop-manager-diagnostics"))
}

#[tauri::command]
pub async fn diagnostics_get_about() -> Result<Value, String> {
    Ok(diagnostics::get_about_info())
}

#[tauri::command]
pub async fn diagnostics_get_system_health(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    diagnostics::get_system_health(&db)
}

/// Bundle about info, system health, sync backlog, and optionally logs
/// into a zip the user can attach to a support request.
#[tauri::command]
pub async fn diagnostics_export(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let options = parse_diagnostics_export_payload(arg0);
    let dir = export_dir(&db);
    std::fs::create_dir_all(&dir).map_err(|e| format!("create diagnostics dir: {e}"))?;
    let path = diagnostics::export_diagnostics_with_options(&db, &dir, options)?;
    Ok(serde_json::json!({ "success": true, "path": path }))
}

#[tauri::command]
pub async fn diagnostics_open_export_dir(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<(), String> {
    let dir = export_dir(&db);
    std::fs::create_dir_all(&dir).map_err(|e| format!("create diagnostics dir: {e}"))?;
    open_directory(&dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_payload_forms() {
        let options = parse_diagnostics_export_payload(Some(serde_json::json!(false)));
        assert!(!options.include_logs);

        let options = parse_diagnostics_export_payload(Some(serde_json::json!({
            "includeLogs": true,
            "redactSensitive": true,
        })));
        assert!(options.include_logs);
        assert!(options.redact_sensitive);

        let defaults = parse_diagnostics_export_payload(None);
        assert_eq!(defaults.include_logs, diagnostics::DiagnosticsExportOptions::default().include_logs);
    }
}
