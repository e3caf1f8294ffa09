//! # rosterdb - Versioned container/member store
//!
//! rosterdb stores two related entity collections, containers (e.g. rooms) and
//! members (e.g. students), keeping the full change history of every member and
//! answering analytical queries over the current state only.
//!
//! ## Core Concepts
//!
//! - **Container**: an unversioned entity referenced by members
//! - **Member**: a logical identity whose state lives in an append-only version chain
//! - **Supersede**: atomically retiring the current version and activating a new one
//!   whenever an identity-relevant field (`name`, `container_id`) changes
//! - **Snapshot**: containers and current member versions read consistently
//!
//! ## Usage
//!
//! ```rust
//! use rosterdb::{ApplyOutcome, BulkLoader, ContainerRecord, Database, MemberId, MemberUpdate};
//!
//! let db = Database::in_memory();
//! BulkLoader::new(&db).load_containers([
//!     ContainerRecord::new(10, "Red"),
//!     ContainerRecord::new(20, "Blue"),
//! ]);
//!
//! let first = db.apply_member(&MemberUpdate::new(1, "Ann").container(10)).unwrap();
//! assert!(matches!(first, ApplyOutcome::Inserted(_)));
//!
//! let moved = db.apply_member(&MemberUpdate::new(1, "Ann").container(20)).unwrap();
//! assert!(matches!(moved, ApplyOutcome::Superseded { .. }));
//! assert_eq!(db.history(MemberId::new(1)).unwrap().len(), 2);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod config;
pub mod container;
pub mod database;
pub mod error;
pub mod loader;
pub mod member;
pub mod query;
pub mod storage;

// Re-export primary types at crate root for convenience
pub use catalog::{EntityKind, FieldDef};
pub use config::StoreConfig;
pub use container::{Container, ContainerId, ContainerRecord};
pub use database::{Database, Snapshot};
pub use error::{ErrorKind, RosterError, RosterResult, ValidationError};
pub use loader::{BulkLoader, LoadSummary, RejectReason, Rejection};
pub use member::{ApplyOutcome, Category, MemberFields, MemberId, MemberUpdate, MemberVersion, VersionId};
pub use query::{
    AverageAgeRow, Cell, OccupancyRow, QueryEngine, QueryParams, QueryResult, QueryTemplate,
    SpreadRow,
};
pub use storage::{
    ContainerStore, InMemoryContainerStore, InMemoryMemberStore, MemberStore, Mutation,
    MutationLog, StorageError, UpsertOutcome,
};
