//! Secure server credential storage using the OS credential store.
//!
//! On Windows this uses DPAPI (via the `keyring` crate), on macOS Keychain,
//! and on Linux the Secret Service API. Holds the connection material for
//! the hosted record store; everything else lives in the SQLite
//! `local_settings` table.

use keyring::Entry;
use serde_json::Value;
use tracing::{info, warn};

const SERVICE_NAME: &str = "shop-manager";

// Credential keys
const KEY_SERVER_URL: &str = "server_url";
const KEY_API_KEY: &str = "api_key";
const KEY_SHOP_ID: &str = "shop_id";
const KEY_OWNER_EMAIL: &str = "owner_email";

/// All credential keys managed by this module.
const ALL_KEYS: &[&str] = &[KEY_SERVER_URL, KEY_API_KEY, KEY_SHOP_ID, KEY_OWNER_EMAIL];

// ---------------------------------------------------------------------------
// Low-level helpers
// ---------------------------------------------------------------------------

/// Retrieve a single credential from the OS keyring. Returns `None` when the
/// entry does not exist (or the platform returns a "not found" error).
pub fn get_credential(key: &str) -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, key) {
        Ok(e) => e,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to create entry");
            return None;
        }
    };
    match entry.get_password() {
        Ok(pw) => Some(pw),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            warn!(key, error = %e, "keyring: failed to read credential");
            None
        }
    }
}

/// Store a credential in the OS keyring.
pub fn set_credential(key: &str, value: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    entry.set_password(value).map_err(|e| e.to_string())?;
    Ok(())
}

/// Delete a credential from the OS keyring. Silently succeeds if the entry
/// does not exist.
pub fn delete_credential(key: &str) -> Result<(), String> {
    let entry = Entry::new(SERVICE_NAME, key).map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) => Ok(()),
        Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

pub fn has_credential(key: &str) -> bool {
    get_credential(key).is_some()
}

// ---------------------------------------------------------------------------
// High-level API
// ---------------------------------------------------------------------------

/// The shop is considered connected when server URL and API key are both
/// present in the credential store.
pub fn is_configured() -> bool {
    has_credential(KEY_SERVER_URL) && has_credential(KEY_API_KEY)
}

/// Return all stored server config as a JSON value for the settings screen.
/// The API key is intentionally omitted.
pub fn get_full_config() -> Value {
    serde_json::json!({
        "serverUrl":  get_credential(KEY_SERVER_URL),
        "shopId":     get_credential(KEY_SHOP_ID),
        "ownerEmail": get_credential(KEY_OWNER_EMAIL),
        "configured": is_configured(),
    })
}

/// Store server credentials received during onboarding.
///
/// Expected JSON shape (camelCase, snake_case accepted):
/// ```json
/// { "serverUrl": "...", "apiKey": "...", "shopId": "...", "ownerEmail": "..." }
/// ```
pub fn update_server_credentials(payload: &Value) -> Result<Value, String> {
    let api_key = payload
        .get("apiKey")
        .or_else(|| payload.get("api_key"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: apiKey")?;
    let server_url = payload
        .get("serverUrl")
        .or_else(|| payload.get("server_url"))
        .and_then(Value::as_str)
        .map(crate::api::normalize_server_url)
        .filter(|s| !s.is_empty())
        .ok_or("Missing required field: serverUrl")?;

    set_credential(KEY_SERVER_URL, &server_url)?;
    set_credential(KEY_API_KEY, api_key)?;

    if let Some(shop_id) = payload
        .get("shopId")
        .or_else(|| payload.get("shop_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        set_credential(KEY_SHOP_ID, shop_id)?;
    }
    if let Some(email) = payload
        .get("ownerEmail")
        .or_else(|| payload.get("owner_email"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        set_credential(KEY_OWNER_EMAIL, email)?;
    }

    info!(server_url = %server_url, "shop server credentials updated");
    Ok(serde_json::json!({ "success": true }))
}

/// Read the server URL and API key together, for call sites that need both.
pub fn server_connection() -> Option<(String, String)> {
    let url = get_credential(KEY_SERVER_URL)?;
    let key = get_credential(KEY_API_KEY)?;
    if url.trim().is_empty() || key.trim().is_empty() {
        return None;
    }
    Some((url, key))
}

/// Delete every stored credential (factory reset).
pub fn factory_reset() -> Result<Value, String> {
    info!("performing factory reset - deleting all credentials");
    for key in ALL_KEYS {
        delete_credential(key)?;
    }
    Ok(serde_json::json!({ "success": true }))
}
