//! Sync merge engine.
//!
//! Two pure reconciliation strategies over one entity kind:
//!
//! - [`apply_operations`]: replay a batch of queued create/update/delete
//!   operations, in batch order, against the authoritative remote set.
//! - [`reconcile_lww`]: two-sided full merge of a local snapshot against
//!   the remote snapshot, last write wins by `updatedAt`, ties keep the
//!   remote record.
//!
//! Both operate on whole records. There is deliberately no field-level
//! merging: whichever record wins replaces the loser entirely. Callers and
//! tests depend on that.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::records::SyncRecord;

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<OperationKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "create" | "insert" => Some(OperationKind::Create),
            "update" => Some(OperationKind::Update),
            "delete" | "remove" => Some(OperationKind::Delete),
            _ => None,
        }
    }
}

/// One queued intent against one record. `data` is present for
/// create/update, absent for delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation<R> {
    pub operation: OperationKind,
    #[serde(alias = "entity_id", alias = "id")]
    pub entity_id: String,
    #[serde(default = "none_data", skip_serializing_if = "Option::is_none")]
    pub data: Option<R>,
}

fn none_data<R>() -> Option<R> {
    None
}

// ---------------------------------------------------------------------------
// Queued-operation merge
// ---------------------------------------------------------------------------

/// Replay `ops` against `current`, strictly in batch order, and return the
/// new authoritative set.
///
/// Per-operation semantics:
/// - `create`: no-op when the id already exists (first writer wins for
///   late-arriving creates), otherwise append.
/// - `update`: wholesale replacement when the id exists, otherwise treated
///   as a create (defensive upsert).
/// - `delete`: removes the matching record; deleting an absent id is a
///   no-op.
///
/// An op whose required `data` is missing is skipped. Later ops for the
/// same `entityId` override earlier ones simply by running after them.
pub fn apply_operations<R>(current: Vec<R>, ops: &[Operation<R>]) -> Vec<R>
where
    R: SyncRecord + Clone,
{
    let mut working = current;

    for op in ops {
        match op.operation {
            OperationKind::Create => {
                let Some(data) = op.data.as_ref() else {
                    continue;
                };
                if position_of(&working, &op.entity_id).is_none() {
                    working.push(data.clone());
                }
            }
            OperationKind::Update => {
                let Some(data) = op.data.as_ref() else {
                    continue;
                };
                match position_of(&working, &op.entity_id) {
                    Some(pos) => working[pos] = data.clone(),
                    None => working.push(data.clone()),
                }
            }
            OperationKind::Delete => {
                working.retain(|record| record.id() != op.entity_id);
            }
        }
    }

    working
}

fn position_of<R: SyncRecord>(records: &[R], id: &str) -> Option<usize> {
    records.iter().position(|record| record.id() == id)
}

// ---------------------------------------------------------------------------
// Full reconciliation (two-sided, last write wins)
// ---------------------------------------------------------------------------

/// Merge a full local snapshot into the remote snapshot.
///
/// The remote set seeds the working map. A local record is inserted when no
/// remote counterpart exists; otherwise the record with the strictly later
/// `updatedAt` wins whole. Equal timestamps keep the remote entry, and a
/// missing or malformed `updatedAt` compares as the earliest possible
/// instant.
pub fn reconcile_lww<R>(remote: Vec<R>, local: Vec<R>) -> Vec<R>
where
    R: SyncRecord + Clone,
{
    let mut merged = remote;
    let mut index: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, record)| (record.id().to_string(), i))
        .collect();

    for candidate in local {
        match index.get(candidate.id()) {
            Some(&pos) => {
                if candidate.updated_at_instant() > merged[pos].updated_at_instant() {
                    merged[pos] = candidate;
                }
            }
            None => {
                index.insert(candidate.id().to_string(), merged.len());
                merged.push(candidate);
            }
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::Supplier;

    fn supplier(id: &str, name: &str, updated_at: &str) -> Supplier {
        Supplier {
            id: id.into(),
            name: name.into(),
            phone: None,
            address: None,
            notes: None,
            created_at: Some(updated_at.to_string()),
            updated_at: Some(updated_at.to_string()),
        }
    }

    fn op(kind: OperationKind, id: &str, data: Option<Supplier>) -> Operation<Supplier> {
        Operation {
            operation: kind,
            entity_id: id.into(),
            data,
        }
    }

    #[test]
    fn create_batch_on_absent_ids_yields_one_record_per_op() {
        let ops = vec![
            op(
                OperationKind::Create,
                "a",
                Some(supplier("a", "Anand Traders", "2024-01-01")),
            ),
            op(
                OperationKind::Create,
                "b",
                Some(supplier("b", "Bharat Stores", "2024-01-02")),
            ),
            op(
                OperationKind::Create,
                "c",
                Some(supplier("c", "Chawla & Sons", "2024-01-03")),
            ),
        ];
        let merged = apply_operations(Vec::new(), &ops);
        assert_eq!(merged.len(), 3);
        let ids: Vec<&str> = merged.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn create_on_existing_id_is_noop() {
        let current = vec![supplier("a", "Original", "2024-01-01")];
        let ops = vec![op(
            OperationKind::Create,
            "a",
            Some(supplier("a", "Replacement", "2024-06-01")),
        )];
        let merged = apply_operations(current, &ops);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Original");
    }

    #[test]
    fn last_update_for_same_id_wins_within_batch() {
        let current = vec![supplier("a", "Original", "2024-01-01")];
        let ops = vec![
            op(
                OperationKind::Update,
                "a",
                Some(supplier("a", "First edit", "2024-02-01")),
            ),
            op(
                OperationKind::Update,
                "a",
                Some(supplier("a", "Second edit", "2024-02-02")),
            ),
        ];
        let merged = apply_operations(current, &ops);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Second edit");
    }

    #[test]
    fn update_on_absent_id_upserts() {
        let ops = vec![op(
            OperationKind::Update,
            "ghost",
            Some(supplier("ghost", "Late arrival", "2024-03-01")),
        )];
        let merged = apply_operations(Vec::new(), &ops);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].id, "ghost");
    }

    #[test]
    fn delete_of_absent_id_leaves_set_unchanged() {
        let current = vec![supplier("a", "Keeper", "2024-01-01")];
        let ops = vec![op(OperationKind::Delete, "missing", None)];
        let merged = apply_operations(current.clone(), &ops);
        assert_eq!(merged, current);
    }

    #[test]
    fn delete_then_create_reinstates_record() {
        let current = vec![supplier("a", "Old", "2024-01-01")];
        let ops = vec![
            op(OperationKind::Delete, "a", None),
            op(
                OperationKind::Create,
                "a",
                Some(supplier("a", "Fresh", "2024-05-01")),
            ),
        ];
        let merged = apply_operations(current, &ops);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Fresh");
    }

    #[test]
    fn op_missing_required_data_is_skipped() {
        let ops = vec![
            op(OperationKind::Create, "a", None),
            op(OperationKind::Update, "b", None),
        ];
        let merged = apply_operations(Vec::<Supplier>::new(), &ops);
        assert!(merged.is_empty());
    }

    #[test]
    fn update_existing_and_create_new_in_one_batch() {
        // Remote: [{id: A, updatedAt: 2024-01-01}]; queue updates A and
        // creates B. Expected: both present, A renamed with new timestamp.
        let remote = vec![supplier("A", "Old name", "2024-01-01")];
        let ops = vec![
            op(
                OperationKind::Update,
                "A",
                Some(supplier("A", "X", "2024-02-01")),
            ),
            op(
                OperationKind::Create,
                "B",
                Some(supplier("B", "Y", "2024-02-01")),
            ),
        ];
        let merged = apply_operations(remote, &ops);
        assert_eq!(merged.len(), 2);
        let a = merged.iter().find(|s| s.id == "A").unwrap();
        let b = merged.iter().find(|s| s.id == "B").unwrap();
        assert_eq!(a.name, "X");
        assert_eq!(a.updated_at.as_deref(), Some("2024-02-01"));
        assert_eq!(b.name, "Y");
    }

    #[test]
    fn lww_merge_is_idempotent_on_identical_sets() {
        let set = vec![
            supplier("a", "Anand Traders", "2024-01-01T10:00:00Z"),
            supplier("b", "Bharat Stores", "2024-02-01T10:00:00Z"),
        ];
        let merged = reconcile_lww(set.clone(), set.clone());
        assert_eq!(merged, set);
    }

    #[test]
    fn lww_tie_keeps_remote_record() {
        let remote = vec![supplier("a", "Remote copy", "2024-01-01T10:00:00Z")];
        let local = vec![supplier("a", "Local copy", "2024-01-01T10:00:00Z")];
        let merged = reconcile_lww(remote, local);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "Remote copy");
    }

    #[test]
    fn lww_strictly_newer_local_wins_whole_record() {
        let mut remote_rec = supplier("a", "Remote copy", "2024-01-01T10:00:00Z");
        remote_rec.phone = Some("111".into());
        let local_rec = supplier("a", "Local copy", "2024-01-02T10:00:00Z");

        let merged = reconcile_lww(vec![remote_rec], vec![local_rec.clone()]);
        assert_eq!(merged.len(), 1);
        // Whole-record replacement: the remote-only phone field is gone.
        assert_eq!(merged[0], local_rec);
        assert!(merged[0].phone.is_none());
    }

    #[test]
    fn lww_missing_timestamp_loses_to_any_real_one() {
        let remote = vec![supplier("a", "Remote copy", "2024-01-01")];
        let mut local_rec = supplier("a", "Local copy", "2024-01-01");
        local_rec.updated_at = None;
        let merged = reconcile_lww(remote, vec![local_rec]);
        assert_eq!(merged[0].name, "Remote copy");

        // And a malformed remote timestamp loses to a real local one.
        let mut remote_rec = supplier("a", "Remote copy", "2024-01-01");
        remote_rec.updated_at = Some("not-a-date".into());
        let local = vec![supplier("a", "Local copy", "2024-01-01")];
        let merged = reconcile_lww(vec![remote_rec], local);
        assert_eq!(merged[0].name, "Local copy");
    }

    #[test]
    fn lww_inserts_local_only_records() {
        let remote = vec![supplier("a", "Remote", "2024-01-01")];
        let local = vec![
            supplier("a", "Remote", "2024-01-01"),
            supplier("b", "Local only", "2024-03-01"),
        ];
        let merged = reconcile_lww(remote, local);
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|s| s.id == "b"));
    }

    #[test]
    fn operation_deserializes_snake_case_alias() {
        let op: Operation<Supplier> = serde_json::from_value(serde_json::json!({
            "operation": "delete",
            "entity_id": "a"
        }))
        .unwrap();
        assert_eq!(op.operation, OperationKind::Delete);
        assert_eq!(op.entity_id, "a");
        assert!(op.data.is_none());
    }
}
