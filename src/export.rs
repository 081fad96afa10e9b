//! CSV and Excel export of ledger data.
//!
//! CSV export renders one entity kind at a time with an optional date
//! range; Excel export writes a workbook with one sheet per kind. Both
//! read from the local mirror, so they work offline.

use rusqlite::Connection;
use rust_xlsxwriter::{Format, Workbook};
use serde_json::Value;
use std::path::Path;
use tracing::info;

use crate::ledger;
use crate::records::{parse_record_timestamp, EntityKind, KINDS_PARENTS_FIRST};

fn xlsx_err(err: rust_xlsxwriter::XlsxError) -> String {
    format!("excel export: {err}")
}

/// Column layout per kind: (header, record key).
fn columns(kind: EntityKind) -> &'static [(&'static str, &'static str)] {
    match kind {
        EntityKind::Suppliers | EntityKind::Customers => &[
            ("ID", "id"),
            ("Name", "name"),
            ("Phone", "phone"),
            ("Address", "address"),
            ("Notes", "notes"),
            ("Created At", "createdAt"),
            ("Updated At", "updatedAt"),
        ],
        EntityKind::Transactions => &[
            ("ID", "id"),
            ("Supplier ID", "supplierId"),
            ("Description", "description"),
            ("Amount", "amount"),
            ("Paid", "paidAmount"),
            ("Cash", "cashAmount"),
            ("Online", "onlineAmount"),
            ("Pending", "pendingAmount"),
            ("Date", "date"),
            ("Updated At", "updatedAt"),
        ],
        EntityKind::Udhar => &[
            ("ID", "id"),
            ("Customer ID", "customerId"),
            ("Description", "description"),
            ("Amount", "amount"),
            ("Paid", "paidAmount"),
            ("Cash", "cashAmount"),
            ("Online", "onlineAmount"),
            ("Pending", "pendingAmount"),
            ("Date", "date"),
            ("Updated At", "updatedAt"),
        ],
        EntityKind::Income => &[
            ("ID", "id"),
            ("Customer ID", "customerId"),
            ("Source", "source"),
            ("Amount", "amount"),
            ("Date", "date"),
            ("Updated At", "updatedAt"),
        ],
    }
}

/// A record passes the filter when its `date` (falling back to
/// `createdAt`) sits inside the inclusive range. Open bounds pass
/// everything on that side.
fn in_date_range(record: &Value, from: Option<&str>, to: Option<&str>) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }
    let raw = record
        .get("date")
        .and_then(Value::as_str)
        .or_else(|| record.get("createdAt").and_then(Value::as_str));
    let instant = parse_record_timestamp(raw);

    if let Some(from) = from {
        if instant < parse_record_timestamp(Some(from)) {
            return false;
        }
    }
    if let Some(to) = to {
        // Inclusive upper bound: a bare date means end of that day
        let bound = parse_record_timestamp(Some(to));
        let excluded = if to.len() == 10 {
            instant >= bound + chrono::Duration::days(1)
        } else {
            instant > bound
        };
        if excluded {
            return false;
        }
    }
    true
}

fn filtered_records(
    conn: &Connection,
    kind: EntityKind,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<Value>, String> {
    Ok(ledger::list(conn, kind)?
        .into_iter()
        .filter(|record| in_date_range(record, from, to))
        .collect())
}

// ---------------------------------------------------------------------------
// CSV
// ---------------------------------------------------------------------------

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn cell_text(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Render one kind as CSV text.
pub fn export_csv(
    conn: &Connection,
    kind: EntityKind,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<String, String> {
    let cols = columns(kind);
    let records = filtered_records(conn, kind, from, to)?;

    let mut out = String::new();
    out.push_str(
        &cols
            .iter()
            .map(|(header, _)| csv_escape(header))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push('\n');

    for record in &records {
        let line = cols
            .iter()
            .map(|(_, key)| csv_escape(&cell_text(record, key)))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&line);
        out.push('\n');
    }

    info!("CSV export: {} {} rows", records.len(), kind);
    Ok(out)
}

/// Render one kind as CSV and write it to disk.
pub fn save_csv_to_file(
    conn: &Connection,
    kind: EntityKind,
    path: &Path,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Value, String> {
    let text = export_csv(conn, kind, from, to)?;
    let rows = text.lines().count().saturating_sub(1);
    std::fs::write(path, text).map_err(|e| format!("write csv: {e}"))?;
    Ok(serde_json::json!({
        "success": true,
        "path": path.display().to_string(),
        "rows": rows,
    }))
}

// ---------------------------------------------------------------------------
// Excel
// ---------------------------------------------------------------------------

/// Write a workbook with one sheet per kind.
pub fn export_xlsx(
    conn: &Connection,
    path: &Path,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Value, String> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let mut total_rows = 0usize;

    for kind in KINDS_PARENTS_FIRST {
        let cols = columns(kind);
        let records = filtered_records(conn, kind, from, to)?;

        let sheet = workbook.add_worksheet();
        sheet.set_name(kind.as_str()).map_err(xlsx_err)?;

        for (col, (header, _)) in cols.iter().enumerate() {
            sheet
                .write_string_with_format(0, col as u16, *header, &header_format)
                .map_err(xlsx_err)?;
            sheet.set_column_width(col as u16, 18).map_err(xlsx_err)?;
        }

        for (row, record) in records.iter().enumerate() {
            let row = (row + 1) as u32;
            for (col, (_, key)) in cols.iter().enumerate() {
                let col = col as u16;
                match record.get(*key) {
                    Some(Value::Number(n)) => {
                        sheet
                            .write_number(row, col, n.as_f64().unwrap_or(0.0))
                            .map_err(xlsx_err)?;
                    }
                    Some(Value::String(s)) => {
                        sheet.write_string(row, col, s).map_err(xlsx_err)?;
                    }
                    _ => {}
                }
            }
        }
        total_rows += records.len();
    }

    workbook.save(path).map_err(xlsx_err)?;
    info!("Excel export saved to {} ({total_rows} rows)", path.display());
    Ok(serde_json::json!({
        "success": true,
        "path": path.display().to_string(),
        "rows": total_rows,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_db_state;
    use crate::ledger::{create_supplier, create_transaction, PartyInput, TransactionInput};

    fn seeded() -> crate::db::DbState {
        let db = test_db_state();
        let supplier = create_supplier(
            &db,
            PartyInput {
                name: "Sharma, Traders \"Ltd\"".into(),
                phone: Some("98765".into()),
                address: None,
                notes: None,
            },
        )
        .unwrap();
        let sid = supplier["id"].as_str().unwrap().to_string();
        for (amount, date) in [(100.0, "2024-01-15"), (250.0, "2024-03-10")] {
            create_transaction(
                &db,
                TransactionInput {
                    supplier_id: sid.clone(),
                    description: None,
                    amount,
                    paid_amount: 0.0,
                    cash_amount: 0.0,
                    online_amount: 0.0,
                    date: Some(date.into()),
                },
            )
            .unwrap();
        }
        db
    }

    #[test]
    fn csv_quotes_embedded_commas_and_quotes() {
        let db = seeded();
        let conn = db.conn.lock().unwrap();
        let csv = export_csv(&conn, EntityKind::Suppliers, None, None).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "ID,Name,Phone,Address,Notes,Created At,Updated At"
        );
        let row = lines.next().unwrap();
        assert!(row.contains("\"Sharma, Traders \"\"Ltd\"\"\""));
    }

    #[test]
    fn csv_date_filter_is_inclusive() {
        let db = seeded();
        let conn = db.conn.lock().unwrap();

        let all = export_csv(&conn, EntityKind::Transactions, None, None).unwrap();
        assert_eq!(all.lines().count(), 3);

        let january =
            export_csv(&conn, EntityKind::Transactions, Some("2024-01-01"), Some("2024-01-31"))
                .unwrap();
        assert_eq!(january.lines().count(), 2);

        // Bound lands exactly on the record date
        let exact =
            export_csv(&conn, EntityKind::Transactions, Some("2024-03-10"), Some("2024-03-10"))
                .unwrap();
        assert_eq!(exact.lines().count(), 2);
    }

    #[test]
    fn date_only_bound_excludes_midnight_of_next_day() {
        use serde_json::json;

        let record = json!({ "id": "t1", "date": "2024-03-11T00:00:00Z" });
        assert!(!in_date_range(&record, None, Some("2024-03-10")));

        // Anything still inside the bounded day passes
        let late = json!({ "id": "t2", "date": "2024-03-10T23:59:59Z" });
        assert!(in_date_range(&late, None, Some("2024-03-10")));

        // Full-timestamp bound stays inclusive of the exact instant
        let exact = json!({ "id": "t3", "date": "2024-03-10T12:00:00Z" });
        assert!(in_date_range(&exact, None, Some("2024-03-10T12:00:00Z")));
        assert!(!in_date_range(&exact, None, Some("2024-03-10T11:59:59Z")));
    }

    #[test]
    fn xlsx_export_writes_workbook() {
        let db = seeded();
        let dir = std::env::temp_dir().join(format!("shop-export-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ledger.xlsx");

        let conn = db.conn.lock().unwrap();
        let result = export_xlsx(&conn, &path, None, None).unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(result["rows"], 3);
        assert!(path.is_file());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
