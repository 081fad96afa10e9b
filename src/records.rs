//! Entity model for Shop Manager.
//!
//! The five entity kinds the ledger tracks (suppliers, customers,
//! transactions, udhar, income) as explicit structured records rather than
//! open JSON maps. Every record carries an opaque string id plus
//! `createdAt`/`updatedAt` ISO-8601 timestamps. A Transaction references a
//! Supplier; Udhar and Income reference a Customer.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Entity kinds
// ---------------------------------------------------------------------------

/// A named category of record with its own table on both sides of the sync
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Suppliers,
    Customers,
    Transactions,
    Udhar,
    Income,
}

/// All kinds, parents before children. Restore and sync process kinds in
/// this order so child records never land before the parent they reference.
pub const KINDS_PARENTS_FIRST: [EntityKind; 5] = [
    EntityKind::Suppliers,
    EntityKind::Customers,
    EntityKind::Transactions,
    EntityKind::Udhar,
    EntityKind::Income,
];

/// All kinds, children before parents. Replace-mode restore clears tables
/// in this order.
pub const KINDS_CHILDREN_FIRST: [EntityKind; 5] = [
    EntityKind::Transactions,
    EntityKind::Udhar,
    EntityKind::Income,
    EntityKind::Suppliers,
    EntityKind::Customers,
];

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Suppliers => "suppliers",
            EntityKind::Customers => "customers",
            EntityKind::Transactions => "transactions",
            EntityKind::Udhar => "udhar",
            EntityKind::Income => "income",
        }
    }

    /// Local mirror table name. Identical to the wire name; the two are
    /// kept separate so a schema rename never leaks into the API path.
    pub fn table(&self) -> &'static str {
        self.as_str()
    }

    /// Remote record-store path segment, e.g. `/api/shop/suppliers`.
    pub fn api_path(&self) -> String {
        format!("/api/shop/{}", self.as_str())
    }

    /// The parent kind a record of this kind references, if any.
    pub fn parent(&self) -> Option<EntityKind> {
        match self {
            EntityKind::Transactions => Some(EntityKind::Suppliers),
            EntityKind::Udhar | EntityKind::Income => Some(EntityKind::Customers),
            _ => None,
        }
    }

    /// Child kinds that must be cascade-deleted before a record of this
    /// kind is removed.
    pub fn children(&self) -> &'static [EntityKind] {
        match self {
            EntityKind::Suppliers => &[EntityKind::Transactions],
            EntityKind::Customers => &[EntityKind::Udhar, EntityKind::Income],
            _ => &[],
        }
    }

    pub fn parse(raw: &str) -> Option<EntityKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "suppliers" | "supplier" => Some(EntityKind::Suppliers),
            "customers" | "customer" => Some(EntityKind::Customers),
            "transactions" | "transaction" => Some(EntityKind::Transactions),
            "udhar" | "udhaar" => Some(EntityKind::Udhar),
            "income" | "incomes" => Some(EntityKind::Income),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Parse a record timestamp for last-write-wins comparison.
///
/// Accepts RFC 3339 (normalized to UTC) and bare `YYYY-MM-DD` dates
/// (midnight UTC). Anything missing or unparseable compares as the
/// earliest possible instant, so such records lose every tie.
pub fn parse_record_timestamp(raw: Option<&str>) -> DateTime<Utc> {
    let raw = match raw {
        Some(s) if !s.trim().is_empty() => s.trim(),
        _ => return DateTime::<Utc>::MIN_UTC,
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return DateTime::from_naive_utc_and_offset(dt, Utc);
        }
    }
    DateTime::<Utc>::MIN_UTC
}

/// Current time in the canonical on-record format (UTC RFC 3339).
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ---------------------------------------------------------------------------
// Money
// ---------------------------------------------------------------------------

/// Outstanding balance rule: pending never goes negative, even when a
/// record is overpaid.
pub fn pending_amount(total: f64, paid: f64) -> f64 {
    (total - paid).max(0.0)
}

// ---------------------------------------------------------------------------
// Record access for the merge engine
// ---------------------------------------------------------------------------

/// What the sync merge needs to know about any record: its identity and
/// its last-write timestamp.
pub trait SyncRecord {
    fn id(&self) -> &str;
    fn updated_at(&self) -> Option<&str>;

    fn updated_at_instant(&self) -> DateTime<Utc> {
        parse_record_timestamp(self.updated_at())
    }
}

// ---------------------------------------------------------------------------
// Entity records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Supplier {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Money the shop owes a supplier for stock taken on credit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub supplier_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub cash_amount: f64,
    #[serde(default)]
    pub online_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Transaction {
    pub fn pending(&self) -> f64 {
        pending_amount(self.amount, self.paid_amount)
    }
}

/// Informal credit a customer owes the shop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Udhar {
    pub id: String,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default)]
    pub paid_amount: f64,
    #[serde(default)]
    pub cash_amount: f64,
    #[serde(default)]
    pub online_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl Udhar {
    pub fn pending(&self) -> f64 {
        pending_amount(self.amount, self.paid_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Income {
    pub id: String,
    pub customer_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default)]
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

macro_rules! impl_sync_record {
    ($($ty:ty),+) => {
        $(impl SyncRecord for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn updated_at(&self) -> Option<&str> {
                self.updated_at.as_deref()
            }
        })+
    };
}

impl_sync_record!(Supplier, Customer, Transaction, Udhar, Income);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_accepts_singular_and_plural() {
        assert_eq!(EntityKind::parse("supplier"), Some(EntityKind::Suppliers));
        assert_eq!(EntityKind::parse("Suppliers"), Some(EntityKind::Suppliers));
        assert_eq!(EntityKind::parse("udhaar"), Some(EntityKind::Udhar));
        assert_eq!(EntityKind::parse("nonsense"), None);
    }

    #[test]
    fn cascade_topology_matches_references() {
        assert_eq!(
            EntityKind::Transactions.parent(),
            Some(EntityKind::Suppliers)
        );
        assert_eq!(EntityKind::Udhar.parent(), Some(EntityKind::Customers));
        assert_eq!(EntityKind::Income.parent(), Some(EntityKind::Customers));
        assert!(EntityKind::Suppliers.parent().is_none());
        assert_eq!(EntityKind::Suppliers.children(), &[EntityKind::Transactions]);
    }

    #[test]
    fn timestamp_parse_handles_rfc3339_and_dates() {
        let full = parse_record_timestamp(Some("2024-02-01T10:30:00Z"));
        let date_only = parse_record_timestamp(Some("2024-02-01"));
        assert!(full > date_only);
        assert_eq!(
            date_only,
            parse_record_timestamp(Some("2024-02-01T00:00:00Z"))
        );
    }

    #[test]
    fn timestamp_parse_treats_missing_and_garbage_as_oldest() {
        assert_eq!(parse_record_timestamp(None), DateTime::<Utc>::MIN_UTC);
        assert_eq!(parse_record_timestamp(Some("")), DateTime::<Utc>::MIN_UTC);
        assert_eq!(
            parse_record_timestamp(Some("yesterday")),
            DateTime::<Utc>::MIN_UTC
        );
        // "Oldest" loses to any real timestamp
        assert!(parse_record_timestamp(Some("1970-01-01")) > DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn pending_amount_never_negative() {
        assert_eq!(pending_amount(100.0, 30.0), 70.0);
        assert_eq!(pending_amount(100.0, 100.0), 0.0);
        assert_eq!(pending_amount(100.0, 150.0), 0.0);
    }

    #[test]
    fn record_serde_round_trips_camel_case() {
        let txn = Transaction {
            id: "t1".into(),
            supplier_id: "s1".into(),
            description: Some("50kg atta".into()),
            amount: 2200.0,
            paid_amount: 500.0,
            cash_amount: 500.0,
            online_amount: 0.0,
            date: Some("2024-02-01".into()),
            created_at: Some("2024-02-01T08:00:00Z".into()),
            updated_at: Some("2024-02-01T08:00:00Z".into()),
        };
        let json = serde_json::to_value(&txn).unwrap();
        assert_eq!(json["supplierId"], "s1");
        assert_eq!(json["paidAmount"], 500.0);
        let back: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(back, txn);
        assert_eq!(back.pending(), 1700.0);
    }
}
