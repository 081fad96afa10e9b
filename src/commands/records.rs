use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tauri::Emitter;

use crate::records::EntityKind;
use crate::{attachments, db, ledger};

/// Accept a bare id string, `{ "id": ... }`, or any object carrying one of
/// the aliased id keys. The React bridge sends all three shapes depending
/// on which screen made the call.
fn parse_id_payload(arg0: Option<Value>, err_msg: &str) -> Result<String, String> {
    let id = match arg0 {
        Some(Value::String(id)) => Some(id),
        Some(Value::Object(map)) => ["id", "entityId", "entity_id", "arg0"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .map(|s| s.to_string()),
        _ => None,
    };
    id.map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| err_msg.to_string())
}

fn parse_input<T: DeserializeOwned>(arg0: Option<Value>, what: &str) -> Result<T, String> {
    let payload = match arg0 {
        Some(Value::Object(obj)) => Value::Object(obj),
        Some(v) => v,
        None => serde_json::json!({}),
    };
    serde_json::from_value(payload).map_err(|e| format!("Invalid {what} payload: {e}"))
}

/// Update calls arrive either as `(id, changes)` or as a single object
/// with the id embedded next to the changed fields.
fn parse_update_payload(
    arg0: Option<Value>,
    arg1: Option<Value>,
) -> Result<(String, Value), String> {
    if let Some(changes) = arg1 {
        let id = parse_id_payload(arg0, "Missing record id")?;
        return Ok((id, changes));
    }

    let mut obj = match arg0 {
        Some(Value::Object(obj)) => obj,
        _ => return Err("Missing record id".into()),
    };
    let id = ["id", "entityId", "entity_id"]
        .iter()
        .find_map(|key| obj.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or("Missing record id")?;
    for key in ["entityId", "entity_id"] {
        obj.remove(key);
    }
    Ok((id, Value::Object(obj)))
}

fn emit_changed(app: &tauri::AppHandle, kind: EntityKind, operation: &str, id: &str) {
    let _ = app.emit(
        "records_changed",
        serde_json::json!({
            "kind": kind.as_str(),
            "operation": operation,
            "id": id,
        }),
    );
}

fn list_kind(db: &db::DbState, kind: EntityKind) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    Ok(Value::Array(ledger::list(&conn, kind)?))
}

fn get_kind(db: &db::DbState, kind: EntityKind, arg0: Option<Value>) -> Result<Value, String> {
    let id = parse_id_payload(arg0, "Missing record id")?;
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    ledger::get(&conn, kind, &id)?.ok_or_else(|| format!("{} not found: {id}", kind.as_str()))
}

fn update_kind(
    db: &db::DbState,
    app: &tauri::AppHandle,
    kind: EntityKind,
    arg0: Option<Value>,
    arg1: Option<Value>,
) -> Result<Value, String> {
    let (id, changes) = parse_update_payload(arg0, arg1)?;
    let updated = ledger::update_record(db, kind, &id, changes)?;
    emit_changed(app, kind, "update", &id);
    Ok(updated)
}

/// Delete a record, its child records, and any image attachments hanging
/// off the deleted rows. Attachment cleanup is best-effort; the record
/// delete has already been queued by the time it runs.
fn delete_kind(
    db: &db::DbState,
    app: &tauri::AppHandle,
    kind: EntityKind,
    arg0: Option<Value>,
) -> Result<Value, String> {
    let id = parse_id_payload(arg0, "Missing record id")?;
    let removed = ledger::delete_record(db, kind, &id)?;
    if let Err(e) = attachments::delete_for_entity(db, kind, &id) {
        tracing::warn!("attachment cleanup after delete failed: {e}");
    }
    emit_changed(app, kind, "delete", &id);
    Ok(serde_json::json!({ "success": true, "removed": removed }))
}

// -- Suppliers ---------------------------------------------------------------

#[tauri::command]
pub async fn supplier_get_all(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    list_kind(&db, EntityKind::Suppliers)
}

#[tauri::command]
pub async fn supplier_get_by_id(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    get_kind(&db, EntityKind::Suppliers, arg0)
}

#[tauri::command]
pub async fn supplier_create(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let input: ledger::PartyInput = parse_input(arg0, "supplier")?;
    let created = ledger::create_supplier(&db, input)?;
    let id = created.get("id").and_then(Value::as_str).unwrap_or("");
    emit_changed(&app, EntityKind::Suppliers, "create", id);
    Ok(created)
}

#[tauri::command]
pub async fn supplier_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    update_kind(&db, &app, EntityKind::Suppliers, arg0, arg1)
}

#[tauri::command]
pub async fn supplier_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    delete_kind(&db, &app, EntityKind::Suppliers, arg0)
}

// -- Customers ---------------------------------------------------------------

#[tauri::command]
pub async fn customer_get_all(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    list_kind(&db, EntityKind::Customers)
}

#[tauri::command]
pub async fn customer_get_by_id(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    get_kind(&db, EntityKind::Customers, arg0)
}

#[tauri::command]
pub async fn customer_create(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let input: ledger::PartyInput = parse_input(arg0, "customer")?;
    let created = ledger::create_customer(&db, input)?;
    let id = created.get("id").and_then(Value::as_str).unwrap_or("");
    emit_changed(&app, EntityKind::Customers, "create", id);
    Ok(created)
}

#[tauri::command]
pub async fn customer_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    update_kind(&db, &app, EntityKind::Customers, arg0, arg1)
}

#[tauri::command]
pub async fn customer_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    delete_kind(&db, &app, EntityKind::Customers, arg0)
}

// -- Transactions (amounts owed to suppliers) --------------------------------

#[tauri::command]
pub async fn transaction_get_all(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    list_kind(&db, EntityKind::Transactions)
}

#[tauri::command]
pub async fn transaction_get_by_id(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    get_kind(&db, EntityKind::Transactions, arg0)
}

#[tauri::command]
pub async fn transaction_create(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let input: ledger::TransactionInput = parse_input(arg0, "transaction")?;
    let created = ledger::create_transaction(&db, input)?;
    let id = created.get("id").and_then(Value::as_str).unwrap_or("");
    emit_changed(&app, EntityKind::Transactions, "create", id);
    Ok(created)
}

#[tauri::command]
pub async fn transaction_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    update_kind(&db, &app, EntityKind::Transactions, arg0, arg1)
}

#[tauri::command]
pub async fn transaction_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    delete_kind(&db, &app, EntityKind::Transactions, arg0)
}

// -- Udhar (amounts owed by customers) ---------------------------------------

#[tauri::command]
pub async fn udhar_get_all(db: tauri::State<'_, Arc<db::DbState>>) -> Result<Value, String> {
    list_kind(&db, EntityKind::Udhar)
}

#[tauri::command]
pub async fn udhar_get_by_id(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    get_kind(&db, EntityKind::Udhar, arg0)
}

#[tauri::command]
pub async fn udhar_create(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let input: ledger::UdharInput = parse_input(arg0, "udhar")?;
    let created = ledger::create_udhar(&db, input)?;
    let id = created.get("id").and_then(Value::as_str).unwrap_or("");
    emit_changed(&app, EntityKind::Udhar, "create", id);
    Ok(created)
}

#[tauri::command]
pub async fn udhar_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    update_kind(&db, &app, EntityKind::Udhar, arg0, arg1)
}

#[tauri::command]
pub async fn udhar_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    delete_kind(&db, &app, EntityKind::Udhar, arg0)
}

// -- Income ------------------------------------------------------------------

#[tauri::command]
pub async fn income_get_all(db: tauri::State<'_, Arc<db::DbState>>) -> Result<Value, String> {
    list_kind(&db, EntityKind::Income)
}

#[tauri::command]
pub async fn income_get_by_id(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    get_kind(&db, EntityKind::Income, arg0)
}

#[tauri::command]
pub async fn income_create(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    let input: ledger::IncomeInput = parse_input(arg0, "income")?;
    let created = ledger::create_income(&db, input)?;
    let id = created.get("id").and_then(Value::as_str).unwrap_or("");
    emit_changed(&app, EntityKind::Income, "create", id);
    Ok(created)
}

#[tauri::command]
pub async fn income_update(
    arg0: Option<Value>,
    arg1: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    update_kind(&db, &app, EntityKind::Income, arg0, arg1)
}

#[tauri::command]
pub async fn income_delete(
    arg0: Option<Value>,
    db: tauri::State<'_, Arc<db::DbState>>,
    app: tauri::AppHandle,
) -> Result<Value, String> {
    delete_kind(&db, &app, EntityKind::Income, arg0)
}

// -- Dashboard ---------------------------------------------------------------

#[tauri::command]
pub async fn dashboard_get_totals(
    db: tauri::State<'_, Arc<db::DbState>>,
) -> Result<Value, String> {
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    ledger::dashboard_totals(&conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_payload_accepts_string_and_object_forms() {
        assert_eq!(
            parse_id_payload(Some(serde_json::json!("sup-1")), "missing").unwrap(),
            "sup-1"
        );
        assert_eq!(
            parse_id_payload(Some(serde_json::json!({ "entityId": " sup-2 " })), "missing")
                .unwrap(),
            "sup-2"
        );
        assert!(parse_id_payload(Some(serde_json::json!({})), "missing").is_err());
        assert!(parse_id_payload(None, "missing").is_err());
    }

    #[test]
    fn update_payload_splits_embedded_id_from_changes() {
        let (id, changes) = parse_update_payload(
            Some(serde_json::json!({ "id": "txn-1", "paidAmount": 50.0 })),
            None,
        )
        .unwrap();
        assert_eq!(id, "txn-1");
        assert_eq!(changes.get("paidAmount").unwrap().as_f64(), Some(50.0));
        // The id stays in the object; the ledger layer refuses to rewrite it.
        assert_eq!(changes.get("id").unwrap().as_str(), Some("txn-1"));
    }

    #[test]
    fn update_payload_two_arg_form() {
        let (id, changes) = parse_update_payload(
            Some(serde_json::json!("udr-9")),
            Some(serde_json::json!({ "amount": 120.0 })),
        )
        .unwrap();
        assert_eq!(id, "udr-9");
        assert_eq!(changes.get("amount").unwrap().as_f64(), Some(120.0));
    }
}
