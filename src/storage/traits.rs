//! Abstract storage traits for rosterdb.
//!
//! These traits define the contract that storage backends must implement.
//! The in-memory backend is the reference implementation; the journal
//! (feature `persistent`) makes it durable through [`MutationLog`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::container::{Container, ContainerId};
use crate::error::{ErrorKind, ValidationError};
use crate::member::{ApplyOutcome, MemberId, MemberUpdate, MemberVersion, VersionId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Container not found.
    #[error("Container not found: {0}")]
    ContainerNotFound(ContainerId),

    /// Member not found.
    #[error("Member not found: {0}")]
    MemberNotFound(MemberId),

    /// A member references a container that does not exist.
    #[error("Invalid reference: container {0} does not exist")]
    InvalidReference(ContainerId),

    /// The incoming record is missing a required field.
    #[error("Malformed input: {0}")]
    MalformedInput(#[from] ValidationError),

    /// The current-version compare-and-swap kept losing to concurrent writers.
    #[error("Concurrency conflict on member {id} after {attempts} attempts")]
    ConcurrencyConflict {
        /// Logical id being written.
        id: MemberId,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Journal I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Classifies this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ContainerNotFound(_) | Self::MemberNotFound(_) => ErrorKind::NotFound,
            Self::InvalidReference(_) => ErrorKind::InvalidReference,
            Self::MalformedInput(_) => ErrorKind::MalformedInput,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::BackendError(_) | Self::SerializationError(_) | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result of [`ContainerStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The container was stored.
    Inserted,
    /// A container with the same id already exists; first insert wins.
    DuplicateIgnored,
}

/// A single durable state change, as recorded by a [`MutationLog`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mutation {
    /// A new container was stored.
    ContainerInserted(Container),
    /// An existing container's name was overwritten.
    ContainerUpdated(Container),
    /// A container was removed; member references to it are nulled.
    ContainerRemoved {
        /// Removed container.
        id: ContainerId,
    },
    /// A member version was created, optionally retiring the previous current one.
    MemberVersionInserted {
        /// The new current row.
        version: MemberVersion,
        /// Version retired by this insert.
        supersedes: Option<VersionId>,
    },
}

/// Sink for mutations, written inside the owning store's critical section
/// and before the in-memory state changes.
pub trait MutationLog: Send + Sync {
    /// Durably record one mutation.
    fn record(&self, mutation: &Mutation) -> Result<(), StorageError>;
}

/// Storage trait for Container operations.
///
/// # Safety Considerations
/// - All mutations should be atomic
/// - Implementations should handle concurrent access safely
pub trait ContainerStore: Send + Sync {
    /// Insert if the id is absent; otherwise leave the stored container alone.
    fn upsert(&self, container: Container) -> Result<UpsertOutcome, StorageError>;

    /// Overwrite an existing container. Returns error if not found.
    fn update(&self, container: Container) -> Result<(), StorageError>;

    /// Get a container by id. Returns error if not found.
    fn get(&self, id: ContainerId) -> Result<Container, StorageError>;

    /// Returns true if the container exists.
    fn contains(&self, id: ContainerId) -> Result<bool, StorageError>;

    /// Remove a container, returning it. Returns error if not found.
    ///
    /// Callers must pair this with [`MemberStore::on_container_removed`] in the
    /// same atomic step; see [`Database::remove_container`](crate::Database::remove_container).
    fn remove(&self, id: ContainerId) -> Result<Container, StorageError>;

    /// All containers, ascending by id.
    fn list(&self) -> Result<Vec<Container>, StorageError>;

    /// Number of stored containers.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if no container is stored.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}

/// Storage trait for the member version chains.
///
/// # Invariants
/// - Exactly one current version per logical id once any version exists
/// - Version ids strictly increase across the store and are never reused
/// - Superseded versions never change, except for the container null-out cascade
pub trait MemberStore: Send + Sync {
    /// Insert, supersede, or ignore depending on the identity-relevant diff
    /// against the current version of `update.id`.
    ///
    /// # Errors
    /// - `MalformedInput`: `id` or `name` missing
    /// - `InvalidReference`: `container_id` set but absent from `containers`
    /// - `ConcurrencyConflict`: retries exhausted against concurrent writers
    fn apply(
        &self,
        update: &MemberUpdate,
        containers: &dyn ContainerStore,
    ) -> Result<ApplyOutcome, StorageError>;

    /// All current versions, in no particular order.
    fn current_versions(&self) -> Result<Vec<MemberVersion>, StorageError>;

    /// The current version of one logical member.
    fn current(&self, id: MemberId) -> Result<Option<MemberVersion>, StorageError>;

    /// Every version of a logical member, oldest first. Returns error if unknown.
    fn history(&self, id: MemberId) -> Result<Vec<MemberVersion>, StorageError>;

    /// Null `container_id` on every version referencing the removed container.
    ///
    /// Returns the number of rows touched. `is_current` is left unchanged.
    fn on_container_removed(&self, container_id: ContainerId) -> Result<usize, StorageError>;

    /// Total number of stored version rows.
    fn version_count(&self) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Compile-time test: ensure traits are object-safe
    fn _assert_container_store_object_safe(_: &dyn ContainerStore) {}
    fn _assert_member_store_object_safe(_: &dyn MemberStore) {}
    fn _assert_mutation_log_object_safe(_: &dyn MutationLog) {}

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::ContainerNotFound(ContainerId::new(4));
        assert!(err.to_string().contains("Container not found: 4"));

        let err = StorageError::InvalidReference(ContainerId::new(99));
        assert!(err.to_string().contains("container 99 does not exist"));
    }

    #[test]
    fn test_storage_error_kind() {
        assert_eq!(
            StorageError::MemberNotFound(MemberId::new(1)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            StorageError::from(ValidationError::missing("name")).kind(),
            ErrorKind::MalformedInput
        );
        assert_eq!(
            StorageError::BackendError("poisoned".to_string()).kind(),
            ErrorKind::Internal
        );
    }
}
