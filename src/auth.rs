//! PIN-based local authentication with bcrypt.
//!
//! The shop has two local roles: the owner and an assistant. PIN hashes
//! live in `local_settings` (category "auth"), lockout state is persisted
//! there too so restarting the app never clears an active lockout.
//! Sessions are in-memory only and expire on inactivity or max duration.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroize;

use crate::{db, storage};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 15;
const SESSION_INACTIVITY_MINUTES: i64 = 30;
const SESSION_MAX_DURATION_HOURS: i64 = 2;
const LOCKOUT_ATTEMPTS_KEY: &str = "lockout_attempts";
const LOCKOUT_LAST_ATTEMPT_KEY: &str = "lockout_last_attempt";

/// Everything the owner can do.
const OWNER_PERMISSIONS: &[&str] = &[
    "view_ledger",
    "edit_records",
    "delete_records",
    "view_dashboard",
    "export_data",
    "manage_backups",
    "restore_backups",
    "manage_settings",
    "force_sync",
];

/// Day-to-day entry work for the assistant; no deletes, no restores.
const ASSISTANT_PERMISSIONS: &[&str] =
    &["view_ledger", "edit_records", "view_dashboard", "export_data"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct ShopSession {
    session_id: String,
    role: String,
    permissions: Vec<String>,
    login_time: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl ShopSession {
    fn is_expired(&self) -> bool {
        let now = Utc::now();
        if now >= self.expires_at {
            return true;
        }
        if now - self.last_activity > Duration::minutes(SESSION_INACTIVITY_MINUTES) {
            return true;
        }
        false
    }

    fn to_user_json(&self) -> Value {
        let shop_id = storage::get_credential("shop_id").unwrap_or_else(|| "default-shop".into());
        serde_json::json!({
            "role": {
                "name": self.role,
                "permissions": self.permissions,
            },
            "shopId": shop_id,
            "sessionId": self.session_id,
        })
    }
}

struct LockoutEntry {
    attempts: u32,
    last_attempt: DateTime<Utc>,
}

/// Tauri managed state for authentication.
pub struct AuthState {
    sessions: Mutex<HashMap<String, ShopSession>>,
    current_session_id: Mutex<Option<String>>,
    lockout: Mutex<LockoutEntry>,
}

impl AuthState {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            current_session_id: Mutex::new(None),
            lockout: Mutex::new(LockoutEntry {
                attempts: 0,
                last_attempt: Utc::now(),
            }),
        }
    }
}

impl Default for AuthState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Accept either a plain PIN string or `{"pin": "1234"}`.
fn extract_pin(arg: &Value) -> Option<String> {
    if let Some(s) = arg.as_str() {
        return Some(s.to_string());
    }
    arg.get("pin").and_then(Value::as_str).map(str::to_owned)
}

fn check_lockout(lockout: &LockoutEntry) -> Result<(), String> {
    if lockout.attempts >= MAX_FAILED_ATTEMPTS {
        let elapsed = Utc::now() - lockout.last_attempt;
        if elapsed < Duration::minutes(LOCKOUT_MINUTES) {
            let remaining = LOCKOUT_MINUTES - elapsed.num_minutes();
            return Err(format!(
                "Too many failed attempts. Try again in {remaining} minute(s)."
            ));
        }
        // Lockout window elapsed; counter resets on next successful login
    }
    Ok(())
}

fn record_failure(lockout: &mut LockoutEntry) {
    lockout.attempts += 1;
    lockout.last_attempt = Utc::now();
    warn!(attempts = lockout.attempts, "failed login attempt");
}

fn reset_lockout(lockout: &mut LockoutEntry) {
    lockout.attempts = 0;
    lockout.last_attempt = Utc::now();
}

fn load_lockout_from_db(conn: &rusqlite::Connection) -> LockoutEntry {
    let attempts = db::get_setting(conn, "auth", LOCKOUT_ATTEMPTS_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    let last_attempt = db::get_setting(conn, "auth", LOCKOUT_LAST_ATTEMPT_KEY)
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    LockoutEntry {
        attempts,
        last_attempt,
    }
}

fn persist_lockout_to_db(conn: &rusqlite::Connection, lockout: &LockoutEntry) {
    let _ = db::set_setting(
        conn,
        "auth",
        LOCKOUT_ATTEMPTS_KEY,
        &lockout.attempts.to_string(),
    );
    let _ = db::set_setting(
        conn,
        "auth",
        LOCKOUT_LAST_ATTEMPT_KEY,
        &lockout.last_attempt.to_rfc3339(),
    );
}

fn create_session(auth: &AuthState, role: &str) -> Value {
    let now = Utc::now();
    let permissions: Vec<String> = if role == "owner" {
        OWNER_PERMISSIONS.iter().map(|s| s.to_string()).collect()
    } else {
        ASSISTANT_PERMISSIONS.iter().map(|s| s.to_string()).collect()
    };

    let session = ShopSession {
        session_id: Uuid::new_v4().to_string(),
        role: role.to_string(),
        permissions,
        login_time: now,
        last_activity: now,
        expires_at: now + Duration::hours(SESSION_MAX_DURATION_HOURS),
    };

    let user_json = session.to_user_json();
    let sid = session.session_id.clone();

    {
        let mut sessions = auth.sessions.lock().unwrap();
        sessions.insert(sid.clone(), session);
    }
    {
        let mut current = auth.current_session_id.lock().unwrap();
        *current = Some(sid);
    }

    serde_json::json!({
        "success": true,
        "user": user_json,
    })
}

fn get_current_session(auth: &AuthState) -> Option<ShopSession> {
    let current_id = auth.current_session_id.lock().unwrap().clone()?;
    let sessions = auth.sessions.lock().unwrap();
    let session = sessions.get(&current_id)?.clone();
    if session.is_expired() {
        return None;
    }
    Some(session)
}

// ---------------------------------------------------------------------------
// Public command implementations
// ---------------------------------------------------------------------------

/// Verify the PIN against both role hashes, owner first, and open a
/// session for whichever matched.
pub fn login(arg0: Option<Value>, db: &db::DbState, auth: &AuthState) -> Result<Value, String> {
    let pin_val = arg0.ok_or("Missing login argument")?;
    let mut pin = extract_pin(&pin_val).ok_or("Invalid login payload: expected a PIN string")?;

    if pin.is_empty() {
        return Err("PIN is required".into());
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    let persisted_lockout = load_lockout_from_db(&conn);
    {
        let mut lockout = auth.lockout.lock().unwrap();
        *lockout = persisted_lockout;
        if let Err(e) = check_lockout(&lockout) {
            pin.zeroize();
            return Err(e);
        }
    }

    let owner_hash = db::get_setting(&conn, "auth", "owner_pin_hash");
    let assistant_hash = db::get_setting(&conn, "auth", "assistant_pin_hash");

    for (hash, role) in [(owner_hash, "owner"), (assistant_hash, "assistant")] {
        if let Some(ref hash) = hash {
            if bcrypt::verify(&pin, hash).unwrap_or(false) {
                pin.zeroize();
                let mut lockout = auth.lockout.lock().unwrap();
                reset_lockout(&mut lockout);
                persist_lockout_to_db(&conn, &lockout);
                info!("{role} login successful");
                return Ok(create_session(auth, role));
            }
        }
    }
    pin.zeroize();

    let mut lockout = auth.lockout.lock().unwrap();
    record_failure(&mut lockout);
    persist_lockout_to_db(&conn, &lockout);
    Err("Invalid PIN".into())
}

/// Invalidate the current session.
pub fn logout(auth: &AuthState) {
    let mut current = auth.current_session_id.lock().unwrap();
    if let Some(sid) = current.take() {
        let mut sessions = auth.sessions.lock().unwrap();
        sessions.remove(&sid);
        info!(session_id = %sid, "session logged out");
    }
}

/// Current session as JSON, or null.
pub fn get_session_json(auth: &AuthState) -> Value {
    match get_current_session(auth) {
        Some(s) => s.to_user_json(),
        None => Value::Null,
    }
}

pub fn validate_session(auth: &AuthState) -> Value {
    match get_current_session(auth) {
        Some(_) => serde_json::json!({ "valid": true }),
        None => {
            // Sweep the expired session
            let mut current = auth.current_session_id.lock().unwrap();
            if let Some(sid) = current.take() {
                let mut sessions = auth.sessions.lock().unwrap();
                sessions.remove(&sid);
            }
            serde_json::json!({ "valid": false, "reason": "Session expired or not found" })
        }
    }
}

pub fn has_permission(auth: &AuthState, permission: Option<&str>) -> bool {
    let Some(perm) = permission else {
        return false;
    };
    match get_current_session(auth) {
        Some(s) => s.permissions.iter().any(|p| p == perm),
        None => false,
    }
}

pub fn get_session_stats(auth: &AuthState) -> Value {
    match get_current_session(auth) {
        Some(s) => serde_json::json!({
            "sessionId": s.session_id,
            "role": s.role,
            "loginTime": s.login_time.to_rfc3339(),
            "lastActivity": s.last_activity.to_rfc3339(),
            "expiresAt": s.expires_at.to_rfc3339(),
        }),
        None => serde_json::json!({}),
    }
}

/// Whether any PIN has been set up yet; the frontend routes to first-run
/// setup when false.
pub fn is_pin_configured(db: &db::DbState) -> Result<bool, String> {
    let conn = db.conn.lock().map_err(|e| e.to_string())?;
    Ok(db::get_setting(&conn, "auth", "owner_pin_hash").is_some())
}

/// Validate, hash, and store owner/assistant PINs.
pub fn setup_pin(arg0: Option<Value>, db: &db::DbState) -> Result<Value, String> {
    let payload = arg0.ok_or("Missing PIN setup payload")?;

    let owner_pin = payload.get("ownerPin").and_then(Value::as_str);
    let assistant_pin = payload.get("assistantPin").and_then(Value::as_str);

    if owner_pin.is_none() && assistant_pin.is_none() {
        return Err("At least one PIN (ownerPin or assistantPin) is required".into());
    }

    fn validate_pin(pin: &str, label: &str) -> Result<(), String> {
        if pin.len() < 4 {
            return Err(format!("{label} must be at least 4 digits"));
        }
        if !pin.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("{label} must contain only digits"));
        }
        Ok(())
    }

    let conn = db.conn.lock().map_err(|e| e.to_string())?;

    if let Some(pin) = owner_pin {
        validate_pin(pin, "Owner PIN")?;
        let hash = bcrypt::hash(pin, bcrypt::DEFAULT_COST)
            .map_err(|e| format!("Failed to hash owner PIN: {e}"))?;
        db::set_setting(&conn, "auth", "owner_pin_hash", &hash)?;
        info!("owner PIN set");
    }

    if let Some(pin) = assistant_pin {
        validate_pin(pin, "Assistant PIN")?;
        let hash = bcrypt::hash(pin, bcrypt::DEFAULT_COST)
            .map_err(|e| format!("Failed to hash assistant PIN: {e}"))?;
        db::set_setting(&conn, "auth", "assistant_pin_hash", &hash)?;
        info!("assistant PIN set");
    }

    Ok(serde_json::json!({ "success": true }))
}

/// Refresh the inactivity timer on user interaction.
pub fn track_activity(auth: &AuthState) {
    let current_id = auth.current_session_id.lock().unwrap().clone();
    if let Some(sid) = current_id {
        let mut sessions = auth.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(&sid) {
            session.last_activity = Utc::now();
        }
    }
}
