//! Bulk loading of container and member batches.
//!
//! Containers must be loaded before members so member references resolve.
//! A bad record never aborts a batch: it is collected in the
//! [`LoadSummary`] with the reason it was turned away.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::catalog::EntityKind;
use crate::container::{ContainerId, ContainerRecord};
use crate::database::Database;
use crate::error::{RosterError, ValidationError};
use crate::member::MemberUpdate;
use crate::storage::{StorageError, UpsertOutcome};

/// Why a record was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum RejectReason {
    /// Already present: a container with the same id, or a member update that
    /// matches the current version's identity-relevant fields.
    Duplicate,
    /// Missing required field, unknown field, or unparseable value.
    Malformed(String),
    /// The member references a container that does not exist.
    InvalidReference(ContainerId),
    /// Any other storage failure.
    Storage(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate => write!(f, "duplicate"),
            Self::Malformed(reason) => write!(f, "malformed: {reason}"),
            Self::InvalidReference(id) => write!(f, "container {id} does not exist"),
            Self::Storage(reason) => write!(f, "storage: {reason}"),
        }
    }
}

impl From<RosterError> for RejectReason {
    fn from(err: RosterError) -> Self {
        match err {
            RosterError::Validation(e) | RosterError::Storage(StorageError::MalformedInput(e)) => {
                Self::Malformed(e.to_string())
            }
            RosterError::Storage(StorageError::InvalidReference(id)) => Self::InvalidReference(id),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<ValidationError> for RejectReason {
    fn from(err: ValidationError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// A record that was turned away.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection<R> {
    /// The record as received.
    pub record: R,
    /// Why it was rejected.
    pub reason: RejectReason,
}

/// Outcome of one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary<R> {
    /// Records that changed the store.
    pub accepted: usize,
    /// Records that did not, in input order.
    pub rejected: Vec<Rejection<R>>,
}

impl<R> Default for LoadSummary<R> {
    fn default() -> Self {
        Self {
            accepted: 0,
            rejected: Vec::new(),
        }
    }
}

impl<R> LoadSummary<R> {
    /// Total records seen.
    #[must_use]
    pub fn total(&self) -> usize {
        self.accepted + self.rejected.len()
    }

    /// Returns true if every record was accepted.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }

    fn push(&mut self, kind: EntityKind, record: R, result: Result<(), RejectReason>) {
        match result {
            Ok(()) => self.accepted += 1,
            Err(reason) => {
                debug!(%kind, %reason, "record rejected");
                self.rejected.push(Rejection { record, reason });
            }
        }
    }

    fn finish(self, kind: EntityKind) -> Self {
        info!(
            %kind,
            accepted = self.accepted,
            rejected = self.rejected.len(),
            "batch loaded"
        );
        self
    }
}

/// Loads batches into a [`Database`], one record at a time.
#[derive(Debug, Clone, Copy)]
pub struct BulkLoader<'a> {
    db: &'a Database,
}

impl<'a> BulkLoader<'a> {
    /// Borrows `db` for writing.
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn load_container(&self, record: &ContainerRecord) -> Result<(), RejectReason> {
        let container = record.validate()?;
        match self.db.upsert_container(container)? {
            UpsertOutcome::Inserted => Ok(()),
            UpsertOutcome::DuplicateIgnored => Err(RejectReason::Duplicate),
        }
    }

    fn load_member(&self, record: &MemberUpdate) -> Result<(), RejectReason> {
        let outcome = self.db.apply_member(record)?;
        if outcome.is_unchanged() {
            return Err(RejectReason::Duplicate);
        }
        Ok(())
    }

    /// Load container records; the first record for an id wins.
    pub fn load_containers(
        &self,
        records: impl IntoIterator<Item = ContainerRecord>,
    ) -> LoadSummary<ContainerRecord> {
        let mut summary = LoadSummary::default();
        for record in records {
            let result = self.load_container(&record);
            summary.push(EntityKind::Container, record, result);
        }
        summary.finish(EntityKind::Container)
    }

    /// Load member records through the versioning path.
    pub fn load_members(
        &self,
        records: impl IntoIterator<Item = MemberUpdate>,
    ) -> LoadSummary<MemberUpdate> {
        let mut summary = LoadSummary::default();
        for record in records {
            let result = self.load_member(&record);
            summary.push(EntityKind::Member, record, result);
        }
        summary.finish(EntityKind::Member)
    }

    /// Load container records given as JSON objects.
    pub fn load_container_values(
        &self,
        values: impl IntoIterator<Item = Value>,
    ) -> LoadSummary<Value> {
        let mut summary = LoadSummary::default();
        for value in values {
            let result = decode::<ContainerRecord>(EntityKind::Container, &value)
                .and_then(|record| self.load_container(&record));
            summary.push(EntityKind::Container, value, result);
        }
        summary.finish(EntityKind::Container)
    }

    /// Load member records given as JSON objects, accepting the feed's field aliases.
    pub fn load_member_values(&self, values: impl IntoIterator<Item = Value>) -> LoadSummary<Value> {
        let mut summary = LoadSummary::default();
        for value in values {
            let result = decode::<MemberUpdate>(EntityKind::Member, &value)
                .and_then(|record| self.load_member(&record));
            summary.push(EntityKind::Member, value, result);
        }
        summary.finish(EntityKind::Member)
    }
}

fn decode<R: serde::de::DeserializeOwned>(kind: EntityKind, value: &Value) -> Result<R, RejectReason> {
    let object = value
        .as_object()
        .ok_or_else(|| RejectReason::Malformed(format!("{kind} record must be a JSON object")))?;
    kind.check_keys(object.keys().map(String::as_str))?;
    serde_json::from_value(value.clone()).map_err(|e| RejectReason::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_container_duplicates_reported() {
        let db = Database::in_memory();
        let summary = BulkLoader::new(&db).load_containers([
            ContainerRecord::new(1, "Red"),
            ContainerRecord::new(1, "Crimson"),
            ContainerRecord {
                id: None,
                name: Some("Nameless".to_string()),
            },
        ]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected.len(), 2);
        assert_eq!(summary.rejected[0].reason, RejectReason::Duplicate);
        assert!(matches!(summary.rejected[1].reason, RejectReason::Malformed(_)));
        assert_eq!(summary.total(), 3);
    }

    #[test]
    fn test_member_reasons() {
        let db = Database::in_memory();
        let loader = BulkLoader::new(&db);
        loader.load_containers([ContainerRecord::new(10, "Red")]);

        let summary = loader.load_members([
            MemberUpdate::new(1, "Ann").container(10),
            MemberUpdate::new(1, "Ann").container(10),
            MemberUpdate::new(2, "Bob").container(99),
            MemberUpdate {
                id: Some(3),
                ..MemberUpdate::default()
            },
        ]);
        assert_eq!(summary.accepted, 1);
        let reasons: Vec<_> = summary.rejected.iter().map(|r| r.reason.clone()).collect();
        assert_eq!(reasons[0], RejectReason::Duplicate);
        assert_eq!(reasons[1], RejectReason::InvalidReference(ContainerId::new(99)));
        assert!(matches!(reasons[2], RejectReason::Malformed(_)));
    }

    #[test]
    fn test_values_reject_unknown_fields_and_non_objects() {
        let db = Database::in_memory();
        let summary = BulkLoader::new(&db).load_container_values([
            json!({"id": 1, "name": "Room #1"}),
            json!({"id": 2, "name": "Room #2", "floor": 3}),
            json!([2, "Room #2"]),
        ]);
        assert_eq!(summary.accepted, 1);
        assert_eq!(summary.rejected.len(), 2);
        let RejectReason::Malformed(reason) = &summary.rejected[0].reason else {
            panic!("expected malformed");
        };
        assert!(reason.contains("floor"));
    }

    #[test]
    fn test_member_values_use_feed_aliases() {
        let db = Database::in_memory();
        let loader = BulkLoader::new(&db);
        loader.load_container_values([json!({"id": 473, "name": "Room #473"})]);
        let summary = loader.load_member_values([json!({
            "birthday": "2004-01-07T00:00:00.000000",
            "id": 0,
            "name": "Peggy Ryan",
            "room": 473,
            "sex": "F"
        })]);
        assert!(summary.is_clean());
        let current = db.current_member(crate::MemberId::new(0)).unwrap();
        assert_eq!(current.container_id, Some(ContainerId::new(473)));
    }

    #[test]
    fn test_bad_category_is_malformed() {
        let db = Database::in_memory();
        let summary = BulkLoader::new(&db)
            .load_member_values([json!({"id": 1, "name": "Ann", "sex": "X"})]);
        assert_eq!(summary.accepted, 0);
        assert!(matches!(summary.rejected[0].reason, RejectReason::Malformed(_)));
    }
}
