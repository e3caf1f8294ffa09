//! Storage layer for rosterdb.
//!
//! The traits define the abstract interface for storage backends; `memory`
//! provides the reference backend and `journal` (feature `persistent`) makes
//! it durable.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod journal;

pub use memory::{InMemoryContainerStore, InMemoryMemberStore, DEFAULT_APPLY_ATTEMPTS};
pub use traits::{
    ContainerStore, MemberStore, Mutation, MutationLog, StorageError, UpsertOutcome,
};

#[cfg(feature = "persistent")]
pub use journal::{open_database, Journal, JournalEntry};
