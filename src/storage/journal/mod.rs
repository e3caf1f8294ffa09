//! Durable storage for rosterdb (feature `persistent`).
//!
//! The in-memory stores stay the source of truth for reads. Every mutation is
//! appended to a write-ahead journal inside the owning store's critical section
//! before it becomes visible; opening a database replays the journal.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────┐
//! │                     Database                        │
//! ├────────────────────────────────────────────────────┤
//! │  ┌────────────────────────┐ ┌───────────────────┐  │
//! │  │ InMemoryContainerStore │ │ InMemoryMemberStore│  │
//! │  └───────────┬────────────┘ └─────────┬─────────┘  │
//! │              └──────────┬─────────────┘            │
//! │                         ↓                          │
//! │              ┌─────────────────────┐               │
//! │              │ Journal (roster.wal)│               │
//! │              └─────────────────────┘               │
//! └────────────────────────────────────────────────────┘
//! ```

mod codec;
mod wal;

pub use wal::{Journal, JournalEntry};

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::RosterResult;
use crate::storage::{InMemoryContainerStore, InMemoryMemberStore, StorageError};

/// Journal file name inside the database directory.
pub const JOURNAL_FILE: &str = "roster.wal";

/// Open or create a durable database in directory `path`.
///
/// # Arguments
/// * `path` - Directory holding the journal (created if missing)
/// * `config` - Optional configuration (uses defaults if None)
///
/// # Errors
/// - `Config` if the configuration is out of bounds
/// - `Storage(Io)` if the directory or journal cannot be created or read
/// - `Storage(BackendError)` if the journal is internally inconsistent
///
/// # Example
/// ```rust,ignore
/// use rosterdb::storage::open_database;
///
/// let db = open_database("./roster.db", None)?;
/// db.upsert_container(rosterdb::Container::new(10, "Red"))?;
/// ```
pub fn open_database(path: impl AsRef<Path>, config: Option<StoreConfig>) -> RosterResult<Database> {
    open_with_journal(path.as_ref(), config).map(|(db, _)| db)
}

fn open_with_journal(
    dir: &Path,
    config: Option<StoreConfig>,
) -> RosterResult<(Database, Arc<Journal>)> {
    let config = config.unwrap_or_default().validate()?;
    std::fs::create_dir_all(dir).map_err(StorageError::from)?;

    let (journal, entries) =
        Journal::open(&dir.join(JOURNAL_FILE), config.sync_on_write).map_err(StorageError::from)?;
    let journal = Arc::new(journal);

    let containers = InMemoryContainerStore::new().with_log(journal.clone());
    let members = InMemoryMemberStore::new()
        .with_max_attempts(config.max_apply_retries)
        .with_log(journal.clone());

    for entry in &entries {
        containers.replay(&entry.mutation)?;
        members.replay(&entry.mutation)?;
    }
    info!(path = %dir.display(), replayed = entries.len(), "journal replayed");

    let db = Database::new(Arc::new(containers), Arc::new(members), config);
    Ok((db, journal))
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::container::{Container, ContainerId};
    use crate::loader::{BulkLoader, RejectReason};
    use crate::member::{MemberId, MemberUpdate};

    fn quiet() -> Option<StoreConfig> {
        Some(StoreConfig {
            sync_on_write: false,
            ..StoreConfig::default()
        })
    }

    #[test]
    fn test_failed_member_write_is_absent_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let (db, journal) = open_with_journal(dir.path(), quiet()).unwrap();
            db.upsert_container(Container::new(10, "Red")).unwrap();
            db.upsert_container(Container::new(20, "Blue")).unwrap();
            db.apply_member(&MemberUpdate::new(1, "Ann").container(10)).unwrap();

            journal.fail_next_sync();
            assert!(db
                .apply_member(&MemberUpdate::new(1, "Ann").container(20))
                .is_err());
            let current = db.current_member(MemberId::new(1)).unwrap();
            assert_eq!(current.container_id, Some(ContainerId::new(10)));

            db.apply_member(&MemberUpdate::new(2, "Bob").container(20)).unwrap();
        }

        let db = open_database(dir.path(), quiet()).unwrap();
        let ann = db.history(MemberId::new(1)).unwrap();
        assert_eq!(ann.len(), 1);
        assert_eq!(ann[0].container_id, Some(ContainerId::new(10)));
        assert!(ann[0].is_current);
        assert_eq!(db.current_member(MemberId::new(2)).unwrap().name, "Bob");
    }

    #[test]
    fn test_failed_container_write_is_reported_and_absent() {
        let dir = tempdir().unwrap();
        {
            let (db, journal) = open_with_journal(dir.path(), quiet()).unwrap();
            journal.fail_next_sync();
            let summary = BulkLoader::new(&db).load_containers([
                crate::ContainerRecord::new(1, "Red"),
                crate::ContainerRecord::new(2, "Blue"),
            ]);
            assert_eq!(summary.accepted, 1);
            assert!(matches!(summary.rejected[0].reason, RejectReason::Storage(_)));
            assert!(db.get_container(ContainerId::new(1)).is_err());
        }

        let db = open_database(dir.path(), quiet()).unwrap();
        let names: Vec<String> = db.containers().unwrap().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec!["Blue".to_string()]);
    }
}
