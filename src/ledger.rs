//! Ledger CRUD over the local mirror.
//!
//! Every write lands in two places inside one connection lock: the mirror
//! table (so the UI reads fresh data immediately) and the sync_queue (so
//! the change reaches the remote store on the next cycle). Deleting a
//! parent cascades to its children, queueing one delete operation per
//! child so the remote side replays the same cascade.

use crate::db::DbState;
use crate::records::{
    now_timestamp, pending_amount, Customer, EntityKind, Income, Supplier, SyncRecord,
    Transaction, Udhar,
};
use rusqlite::{params, Connection};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Input payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartyInput {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInput {
    pub supplier_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub cash_amount: f64,
    #[serde(default)]
    pub online_amount: f64,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UdharInput {
    pub customer_id: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub cash_amount: f64,
    #[serde(default)]
    pub online_amount: f64,
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeInput {
    pub customer_id: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub date: Option<String>,
}

fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name is required".into());
    }
    Ok(())
}

fn validate_amounts(amounts: &[(&str, f64)]) -> Result<(), String> {
    for (label, value) in amounts {
        if *value < 0.0 || !value.is_finite() {
            return Err(format!("{label} must be a non-negative amount"));
        }
    }
    Ok(())
}

fn require_parent(conn: &Connection, kind: EntityKind, id: &str) -> Result<(), String> {
    let exists: i64 = conn
        .query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", kind.table()),
            params![id],
            |row| row.get(0),
        )
        .map_err(|e| format!("parent lookup: {e}"))?;
    if exists == 0 {
        return Err(format!("Unknown {} id: {id}", kind.as_str().trim_end_matches('s')));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Operation queue
// ---------------------------------------------------------------------------

/// Queue one operation for the background sync. The idempotency key makes
/// accidental double-enqueue harmless.
pub fn enqueue_operation(
    conn: &Connection,
    kind: EntityKind,
    entity_id: &str,
    operation: &str,
    payload: Option<&Value>,
) -> Result<(), String> {
    let payload_text = payload.map(|p| p.to_string());
    conn.execute(
        "INSERT OR IGNORE INTO sync_queue \
         (entity_kind, entity_id, operation, payload, idempotency_key) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            kind.as_str(),
            entity_id,
            operation,
            payload_text,
            Uuid::new_v4().to_string()
        ],
    )
    .map_err(|e| format!("enqueue {operation} {kind}: {e}"))?;
    debug!("Queued {} {} {}", operation, kind, entity_id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Mirror row mapping
// ---------------------------------------------------------------------------

fn row_to_value(kind: EntityKind, row: &rusqlite::Row<'_>) -> rusqlite::Result<Value> {
    let value = match kind {
        EntityKind::Suppliers | EntityKind::Customers => json!({
            "id": row.get::<_, String>(0)?,
            "name": row.get::<_, String>(1)?,
            "phone": row.get::<_, Option<String>>(2)?,
            "address": row.get::<_, Option<String>>(3)?,
            "notes": row.get::<_, Option<String>>(4)?,
            "createdAt": row.get::<_, Option<String>>(5)?,
            "updatedAt": row.get::<_, Option<String>>(6)?,
        }),
        EntityKind::Transactions | EntityKind::Udhar => {
            let amount: f64 = row.get(3)?;
            let paid: f64 = row.get(4)?;
            let parent_key = if kind == EntityKind::Transactions {
                "supplierId"
            } else {
                "customerId"
            };
            json!({
                "id": row.get::<_, String>(0)?,
                parent_key: row.get::<_, String>(1)?,
                "description": row.get::<_, Option<String>>(2)?,
                "amount": amount,
                "paidAmount": paid,
                "cashAmount": row.get::<_, f64>(5)?,
                "onlineAmount": row.get::<_, f64>(6)?,
                "pendingAmount": pending_amount(amount, paid),
                "date": row.get::<_, Option<String>>(7)?,
                "createdAt": row.get::<_, Option<String>>(8)?,
                "updatedAt": row.get::<_, Option<String>>(9)?,
            })
        }
        EntityKind::Income => json!({
            "id": row.get::<_, String>(0)?,
            "customerId": row.get::<_, String>(1)?,
            "source": row.get::<_, Option<String>>(2)?,
            "amount": row.get::<_, f64>(3)?,
            "date": row.get::<_, Option<String>>(4)?,
            "createdAt": row.get::<_, Option<String>>(5)?,
            "updatedAt": row.get::<_, Option<String>>(6)?,
        }),
    };
    Ok(value)
}

fn select_columns(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Suppliers | EntityKind::Customers => {
            "id, name, phone, address, notes, created_at, updated_at"
        }
        EntityKind::Transactions => {
            "id, supplier_id, description, amount, paid_amount, cash_amount, online_amount, \
             date, created_at, updated_at"
        }
        EntityKind::Udhar => {
            "id, customer_id, description, amount, paid_amount, cash_amount, online_amount, \
             date, created_at, updated_at"
        }
        EntityKind::Income => "id, customer_id, source, amount, date, created_at, updated_at",
    }
}

/// List every mirror record of a kind, newest update first.
pub fn list(conn: &Connection, kind: EntityKind) -> Result<Vec<Value>, String> {
    let sql = format!(
        "SELECT {} FROM {} ORDER BY updated_at DESC, id",
        select_columns(kind),
        kind.table()
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| format!("list {kind}: {e}"))?;
    let rows = stmt
        .query_map([], |row| row_to_value(kind, row))
        .map_err(|e| format!("list {kind}: {e}"))?
        .collect::<rusqlite::Result<Vec<Value>>>()
        .map_err(|e| format!("list {kind}: {e}"))?;
    Ok(rows)
}

/// Fetch one mirror record by id.
pub fn get(conn: &Connection, kind: EntityKind, id: &str) -> Result<Option<Value>, String> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = ?1",
        select_columns(kind),
        kind.table()
    );
    let mut stmt = conn.prepare(&sql).map_err(|e| format!("get {kind}: {e}"))?;
    let mut rows = stmt
        .query_map(params![id], |row| row_to_value(kind, row))
        .map_err(|e| format!("get {kind}: {e}"))?;
    match rows.next() {
        Some(Ok(v)) => Ok(Some(v)),
        Some(Err(e)) => Err(format!("get {kind}: {e}")),
        None => Ok(None),
    }
}

fn value_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn value_f64(value: &Value, key: &str) -> f64 {
    value.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

/// Upsert one record into its mirror table from its wire (camelCase) form.
pub fn upsert_mirror(conn: &Connection, kind: EntityKind, record: &Value) -> Result<(), String> {
    let id = value_str(record, "id").ok_or_else(|| format!("{kind} record missing id"))?;
    match kind {
        EntityKind::Suppliers | EntityKind::Customers => {
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} \
                     (id, name, phone, address, notes, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    kind.table()
                ),
                params![
                    id,
                    value_str(record, "name").unwrap_or_default(),
                    value_str(record, "phone"),
                    value_str(record, "address"),
                    value_str(record, "notes"),
                    value_str(record, "createdAt"),
                    value_str(record, "updatedAt"),
                ],
            )
        }
        EntityKind::Transactions | EntityKind::Udhar => {
            let parent_key = if kind == EntityKind::Transactions {
                "supplierId"
            } else {
                "customerId"
            };
            conn.execute(
                &format!(
                    "INSERT OR REPLACE INTO {} \
                     (id, {}, description, amount, paid_amount, cash_amount, online_amount, \
                      date, created_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    kind.table(),
                    if kind == EntityKind::Transactions {
                        "supplier_id"
                    } else {
                        "customer_id"
                    }
                ),
                params![
                    id,
                    value_str(record, parent_key).unwrap_or_default(),
                    value_str(record, "description"),
                    value_f64(record, "amount"),
                    value_f64(record, "paidAmount"),
                    value_f64(record, "cashAmount"),
                    value_f64(record, "onlineAmount"),
                    value_str(record, "date"),
                    value_str(record, "createdAt"),
                    value_str(record, "updatedAt"),
                ],
            )
        }
        EntityKind::Income => conn.execute(
            "INSERT OR REPLACE INTO income \
             (id, customer_id, source, amount, date, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                value_str(record, "customerId").unwrap_or_default(),
                value_str(record, "source"),
                value_f64(record, "amount"),
                value_str(record, "date"),
                value_str(record, "createdAt"),
                value_str(record, "updatedAt"),
            ],
        ),
    }
    .map_err(|e| format!("upsert {kind}: {e}"))?;
    Ok(())
}

/// Replace the whole mirror table for a kind with the given records.
/// Used after a sync cycle or full reconciliation settles remote state.
pub fn replace_mirror(conn: &Connection, kind: EntityKind, records: &[Value]) -> Result<(), String> {
    conn.execute(&format!("DELETE FROM {}", kind.table()), [])
        .map_err(|e| format!("clear mirror {kind}: {e}"))?;
    for record in records {
        upsert_mirror(conn, kind, record)?;
    }
    debug!("Mirror {} refreshed with {} records", kind, records.len());
    Ok(())
}

fn delete_mirror_row(conn: &Connection, kind: EntityKind, id: &str) -> Result<(), String> {
    conn.execute(
        &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
        params![id],
    )
    .map_err(|e| format!("delete {kind}: {e}"))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Typed writes
// ---------------------------------------------------------------------------

fn write_record<R>(conn: &Connection, kind: EntityKind, record: &R, operation: &str) -> Result<Value, String>
where
    R: SyncRecord + serde::Serialize,
{
    let value = serde_json::to_value(record).map_err(|e| format!("serialize {kind}: {e}"))?;
    upsert_mirror(conn, kind, &value)?;
    enqueue_operation(conn, kind, record.id(), operation, Some(&value))?;
    Ok(value)
}

pub fn create_supplier(db: &DbState, input: PartyInput) -> Result<Value, String> {
    validate_name(&input.name)?;
    let now = now_timestamp();
    let record = Supplier {
        id: Uuid::new_v4().to_string(),
        name: input.name.trim().to_string(),
        phone: input.phone,
        address: input.address,
        notes: input.notes,
        created_at: Some(now.clone()),
        updated_at: Some(now),
    };
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    let value = write_record(&conn, EntityKind::Suppliers, &record, "create")?;
    info!("Created supplier {}", record.id);
    Ok(value)
}

pub fn create_customer(db: &DbState, input: PartyInput) -> Result<Value, String> {
    validate_name(&input.name)?;
    let now = now_timestamp();
    let record = Customer {
        id: Uuid::new_v4().to_string(),
        name: input.name.trim().to_string(),
        phone: input.phone,
        address: input.address,
        notes: input.notes,
        created_at: Some(now.clone()),
        updated_at: Some(now),
    };
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    let value = write_record(&conn, EntityKind::Customers, &record, "create")?;
    info!("Created customer {}", record.id);
    Ok(value)
}

pub fn create_transaction(db: &DbState, input: TransactionInput) -> Result<Value, String> {
    validate_amounts(&[
        ("Amount", input.amount),
        ("Paid amount", input.paid_amount),
        ("Cash amount", input.cash_amount),
        ("Online amount", input.online_amount),
    ])?;
    let now = now_timestamp();
    let record = Transaction {
        id: Uuid::new_v4().to_string(),
        supplier_id: input.supplier_id,
        description: input.description,
        amount: input.amount,
        paid_amount: input.paid_amount,
        cash_amount: input.cash_amount,
        online_amount: input.online_amount,
        date: input.date,
        created_at: Some(now.clone()),
        updated_at: Some(now),
    };
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    require_parent(&conn, EntityKind::Suppliers, &record.supplier_id)?;
    write_record(&conn, EntityKind::Transactions, &record, "create")
}

pub fn create_udhar(db: &DbState, input: UdharInput) -> Result<Value, String> {
    validate_amounts(&[
        ("Amount", input.amount),
        ("Paid amount", input.paid_amount),
        ("Cash amount", input.cash_amount),
        ("Online amount", input.online_amount),
    ])?;
    let now = now_timestamp();
    let record = Udhar {
        id: Uuid::new_v4().to_string(),
        customer_id: input.customer_id,
        description: input.description,
        amount: input.amount,
        paid_amount: input.paid_amount,
        cash_amount: input.cash_amount,
        online_amount: input.online_amount,
        date: input.date,
        created_at: Some(now.clone()),
        updated_at: Some(now),
    };
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    require_parent(&conn, EntityKind::Customers, &record.customer_id)?;
    write_record(&conn, EntityKind::Udhar, &record, "create")
}

pub fn create_income(db: &DbState, input: IncomeInput) -> Result<Value, String> {
    validate_amounts(&[("Amount", input.amount)])?;
    let now = now_timestamp();
    let record = Income {
        id: Uuid::new_v4().to_string(),
        customer_id: input.customer_id,
        source: input.source,
        amount: input.amount,
        date: input.date,
        created_at: Some(now.clone()),
        updated_at: Some(now),
    };
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    require_parent(&conn, EntityKind::Customers, &record.customer_id)?;
    write_record(&conn, EntityKind::Income, &record, "create")
}

/// Apply a partial update. Fields absent from `changes` keep their current
/// value; `updatedAt` is always stamped with the present moment so this
/// edit wins last-write-wins against anything older.
pub fn update_record(
    db: &DbState,
    kind: EntityKind,
    id: &str,
    changes: Value,
) -> Result<Value, String> {
    let changes = changes
        .as_object()
        .cloned()
        .ok_or_else(|| "Update payload must be an object".to_string())?;

    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    let mut current = get(&conn, kind, id)?
        .ok_or_else(|| format!("No {} with id {id}", kind.as_str().trim_end_matches('s')))?;

    let obj = current.as_object_mut().expect("mirror rows are objects");
    for (key, value) in changes {
        // id and bookkeeping fields are not caller-editable
        if key == "id" || key == "createdAt" || key == "pendingAmount" {
            continue;
        }
        obj.insert(key, value);
    }
    obj.insert("updatedAt".into(), Value::String(now_timestamp()));

    if let Some(name) = current.get("name").and_then(Value::as_str) {
        validate_name(name)?;
    }
    for money_key in ["amount", "paidAmount", "cashAmount", "onlineAmount"] {
        if let Some(v) = current.get(money_key).and_then(Value::as_f64) {
            validate_amounts(&[(money_key, v)])?;
        }
    }
    if let Some(parent) = kind.parent() {
        let parent_key = if kind == EntityKind::Transactions {
            "supplierId"
        } else {
            "customerId"
        };
        if let Some(parent_id) = current.get(parent_key).and_then(Value::as_str) {
            require_parent(&conn, parent, parent_id)?;
        }
    }

    upsert_mirror(&conn, kind, &current)?;
    enqueue_operation(&conn, kind, id, "update", Some(&current))?;
    Ok(current)
}

/// Delete a record, cascading to child records first. Each child delete is
/// queued as its own operation so the remote store replays the cascade.
pub fn delete_record(db: &DbState, kind: EntityKind, id: &str) -> Result<u64, String> {
    let conn = db.conn.lock().map_err(|_| "db lock poisoned".to_string())?;
    if get(&conn, kind, id)?.is_none() {
        return Err(format!("No {} with id {id}", kind.as_str().trim_end_matches('s')));
    }

    let mut removed = 0u64;
    for child in kind.children() {
        let parent_col = if *child == EntityKind::Transactions {
            "supplier_id"
        } else {
            "customer_id"
        };
        let child_ids: Vec<String> = {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT id FROM {} WHERE {} = ?1",
                    child.table(),
                    parent_col
                ))
                .map_err(|e| format!("cascade select {child}: {e}"))?;
            let ids = stmt
                .query_map(params![id], |row| row.get(0))
                .map_err(|e| format!("cascade select {child}: {e}"))?
                .collect::<rusqlite::Result<Vec<String>>>()
                .map_err(|e| format!("cascade select {child}: {e}"))?;
            ids
        };
        for child_id in child_ids {
            delete_mirror_row(&conn, *child, &child_id)?;
            enqueue_operation(&conn, *child, &child_id, "delete", None)?;
            removed += 1;
        }
    }

    delete_mirror_row(&conn, kind, id)?;
    enqueue_operation(&conn, kind, id, "delete", None)?;
    removed += 1;
    info!("Deleted {} {} ({} records including children)", kind, id, removed);
    Ok(removed)
}

// ---------------------------------------------------------------------------
// Dashboard
// ---------------------------------------------------------------------------

/// Aggregate figures the home screen shows: what the shop owes suppliers,
/// what customers owe the shop, and total recorded income.
pub fn dashboard_totals(conn: &Connection) -> Result<Value, String> {
    let sum_pending = |table: &str| -> Result<f64, String> {
        conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(MAX(amount - paid_amount, 0)), 0) FROM {table}"
            ),
            [],
            |row| row.get(0),
        )
        .map_err(|e| format!("dashboard {table}: {e}"))
    };
    let count = |table: &str| -> Result<i64, String> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(|e| format!("dashboard {table}: {e}"))
    };

    let total_income: f64 = conn
        .query_row("SELECT COALESCE(SUM(amount), 0) FROM income", [], |row| {
            row.get(0)
        })
        .map_err(|e| format!("dashboard income: {e}"))?;

    Ok(json!({
        "supplierPending": sum_pending("transactions")?,
        "udharPending": sum_pending("udhar")?,
        "totalIncome": total_income,
        "counts": {
            "suppliers": count("suppliers")?,
            "customers": count("customers")?,
            "transactions": count("transactions")?,
            "udhar": count("udhar")?,
            "income": count("income")?,
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;

    fn queue_rows(db: &DbState) -> Vec<(String, String, String)> {
        let conn = db.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT entity_kind, entity_id, operation FROM sync_queue ORDER BY id")
            .unwrap();
        stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })
        .unwrap()
        .collect::<rusqlite::Result<Vec<_>>>()
        .unwrap()
    }

    #[test]
    fn create_supplier_writes_mirror_and_queue() {
        let db = test_db_state();
        let created = create_supplier(
            &db,
            PartyInput {
                name: "  Sharma Traders ".into(),
                phone: Some("9876500000".into()),
                address: None,
                notes: None,
            },
        )
        .unwrap();
        assert_eq!(created["name"], "Sharma Traders");
        assert!(created["updatedAt"].is_string());

        let conn = db.conn.lock().unwrap();
        let listed = list(&conn, EntityKind::Suppliers).unwrap();
        assert_eq!(listed.len(), 1);
        drop(conn);

        let queue = queue_rows(&db);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].0, "suppliers");
        assert_eq!(queue[0].2, "create");
    }

    #[test]
    fn create_rejects_blank_name_and_negative_amounts() {
        let db = test_db_state();
        assert!(create_supplier(
            &db,
            PartyInput {
                name: "   ".into(),
                phone: None,
                address: None,
                notes: None,
            }
        )
        .is_err());

        let supplier = create_supplier(
            &db,
            PartyInput {
                name: "Gupta & Sons".into(),
                phone: None,
                address: None,
                notes: None,
            },
        )
        .unwrap();
        let err = create_transaction(
            &db,
            TransactionInput {
                supplier_id: supplier["id"].as_str().unwrap().into(),
                description: None,
                amount: -50.0,
                paid_amount: 0.0,
                cash_amount: 0.0,
                online_amount: 0.0,
                date: None,
            },
        )
        .unwrap_err();
        assert!(err.contains("non-negative"));
    }

    #[test]
    fn transaction_requires_existing_supplier() {
        let db = test_db_state();
        let err = create_transaction(
            &db,
            TransactionInput {
                supplier_id: "missing".into(),
                description: None,
                amount: 100.0,
                paid_amount: 0.0,
                cash_amount: 0.0,
                online_amount: 0.0,
                date: None,
            },
        )
        .unwrap_err();
        assert!(err.contains("Unknown supplier"));
    }

    #[test]
    fn update_merges_fields_and_stamps_updated_at() {
        let db = test_db_state();
        let supplier = create_supplier(
            &db,
            PartyInput {
                name: "Verma Stores".into(),
                phone: Some("111".into()),
                address: None,
                notes: None,
            },
        )
        .unwrap();
        let id = supplier["id"].as_str().unwrap();
        let before = supplier["updatedAt"].as_str().unwrap().to_string();

        let updated = update_record(
            &db,
            EntityKind::Suppliers,
            id,
            serde_json::json!({"phone": "222", "id": "hijack"}),
        )
        .unwrap();
        assert_eq!(updated["id"], id);
        assert_eq!(updated["phone"], "222");
        assert_eq!(updated["name"], "Verma Stores");
        assert!(updated["updatedAt"].as_str().unwrap() >= before.as_str());
    }

    #[test]
    fn delete_customer_cascades_to_udhar_and_income() {
        let db = test_db_state();
        let customer = create_customer(
            &db,
            PartyInput {
                name: "Ravi".into(),
                phone: None,
                address: None,
                notes: None,
            },
        )
        .unwrap();
        let cid = customer["id"].as_str().unwrap().to_string();
        create_udhar(
            &db,
            UdharInput {
                customer_id: cid.clone(),
                description: None,
                amount: 300.0,
                paid_amount: 0.0,
                cash_amount: 0.0,
                online_amount: 0.0,
                date: None,
            },
        )
        .unwrap();
        create_income(
            &db,
            IncomeInput {
                customer_id: cid.clone(),
                source: Some("sales".into()),
                amount: 150.0,
                date: None,
            },
        )
        .unwrap();

        let removed = delete_record(&db, EntityKind::Customers, &cid).unwrap();
        assert_eq!(removed, 3);

        let conn = db.conn.lock().unwrap();
        assert!(list(&conn, EntityKind::Udhar).unwrap().is_empty());
        assert!(list(&conn, EntityKind::Income).unwrap().is_empty());
        assert!(list(&conn, EntityKind::Customers).unwrap().is_empty());
        drop(conn);

        // 3 creates + 3 deletes, children queued before the parent delete
        let queue = queue_rows(&db);
        let deletes: Vec<_> = queue.iter().filter(|r| r.2 == "delete").collect();
        assert_eq!(deletes.len(), 3);
        assert_eq!(deletes.last().unwrap().0, "customers");
    }

    #[test]
    fn dashboard_uses_pending_rule() {
        let db = test_db_state();
        let supplier = create_supplier(
            &db,
            PartyInput {
                name: "Mehta Wholesale".into(),
                phone: None,
                address: None,
                notes: None,
            },
        )
        .unwrap();
        let sid = supplier["id"].as_str().unwrap().to_string();
        // 1000 owed, 400 paid -> 600 pending
        create_transaction(
            &db,
            TransactionInput {
                supplier_id: sid.clone(),
                description: None,
                amount: 1000.0,
                paid_amount: 400.0,
                cash_amount: 400.0,
                online_amount: 0.0,
                date: None,
            },
        )
        .unwrap();
        // Overpaid record contributes zero, not negative
        create_transaction(
            &db,
            TransactionInput {
                supplier_id: sid,
                description: None,
                amount: 200.0,
                paid_amount: 250.0,
                cash_amount: 250.0,
                online_amount: 0.0,
                date: None,
            },
        )
        .unwrap();

        let conn = db.conn.lock().unwrap();
        let totals = dashboard_totals(&conn).unwrap();
        assert_eq!(totals["supplierPending"], 600.0);
        assert_eq!(totals["counts"]["transactions"], 2);
    }
}
