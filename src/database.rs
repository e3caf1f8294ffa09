//! Explicit store handle.
//!
//! [`Database`] owns both stores and the reference lock that keeps member
//! writes, snapshots and container removal mutually consistent. Member writes
//! and snapshots share the lock, so writers on different logical ids still run
//! in parallel; container removal takes it exclusively so that nobody ever
//! observes a member pointing at a removed container.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use crate::config::StoreConfig;
use crate::container::{Container, ContainerId};
use crate::error::{RosterError, RosterResult};
use crate::member::{ApplyOutcome, MemberId, MemberUpdate, MemberVersion};
use crate::query::QueryEngine;
use crate::storage::{
    ContainerStore, InMemoryContainerStore, InMemoryMemberStore, MemberStore, UpsertOutcome,
};

/// Containers and current member versions read under one lock acquisition.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// All containers, ascending by id.
    pub containers: Vec<Container>,
    /// Current member versions, ascending by logical id.
    pub members: Vec<MemberVersion>,
}

/// Handle over a container store and a member store.
pub struct Database {
    containers: Arc<dyn ContainerStore>,
    members: Arc<dyn MemberStore>,
    references: RwLock<()>,
    config: StoreConfig,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Wire existing stores together.
    #[must_use]
    pub fn new(
        containers: Arc<dyn ContainerStore>,
        members: Arc<dyn MemberStore>,
        config: StoreConfig,
    ) -> Self {
        Self {
            containers,
            members,
            references: RwLock::new(()),
            config,
        }
    }

    /// An empty in-memory database with default configuration.
    #[must_use]
    pub fn in_memory() -> Self {
        let config = StoreConfig::default();
        let members = InMemoryMemberStore::new().with_max_attempts(config.max_apply_retries);
        Self::new(
            Arc::new(InMemoryContainerStore::new()),
            Arc::new(members),
            config,
        )
    }

    /// An empty in-memory database with validated configuration.
    ///
    /// # Errors
    /// `Config` if the configuration is out of bounds.
    pub fn in_memory_with_config(config: StoreConfig) -> RosterResult<Self> {
        let config = config.validate()?;
        let members = InMemoryMemberStore::new().with_max_attempts(config.max_apply_retries);
        Ok(Self::new(
            Arc::new(InMemoryContainerStore::new()),
            Arc::new(members),
            config,
        ))
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Read-only query engine over this database.
    #[must_use]
    pub const fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(self)
    }

    fn shared(&self) -> RosterResult<RwLockReadGuard<'_, ()>> {
        self.references
            .read()
            .map_err(|_| RosterError::internal("reference lock poisoned"))
    }

    fn exclusive(&self) -> RosterResult<RwLockWriteGuard<'_, ()>> {
        self.references
            .write()
            .map_err(|_| RosterError::internal("reference lock poisoned"))
    }

    /// Insert a container unless its id is already present.
    pub fn upsert_container(&self, container: Container) -> RosterResult<UpsertOutcome> {
        Ok(self.containers.upsert(container)?)
    }

    /// Overwrite an existing container's name.
    pub fn update_container(&self, container: Container) -> RosterResult<()> {
        Ok(self.containers.update(container)?)
    }

    /// Look up a container.
    pub fn get_container(&self, id: ContainerId) -> RosterResult<Container> {
        Ok(self.containers.get(id)?)
    }

    /// All containers, ascending by id.
    pub fn containers(&self) -> RosterResult<Vec<Container>> {
        Ok(self.containers.list()?)
    }

    /// Remove a container and null every member version that references it.
    ///
    /// Both steps happen under the exclusive reference lock. Returns the removed
    /// container and the number of version rows that were nulled.
    pub fn remove_container(&self, id: ContainerId) -> RosterResult<(Container, usize)> {
        let _guard = self.exclusive()?;
        let removed = self.containers.remove(id)?;
        let nulled = self.members.on_container_removed(id)?;
        info!(container = %id, nulled, "container removed");
        Ok((removed, nulled))
    }

    /// Insert, supersede, or ignore a member update.
    pub fn apply_member(&self, update: &MemberUpdate) -> RosterResult<ApplyOutcome> {
        let _guard = self.shared()?;
        Ok(self.members.apply(update, self.containers.as_ref())?)
    }

    /// Current version of one member.
    pub fn current_member(&self, id: MemberId) -> RosterResult<MemberVersion> {
        self.members
            .current(id)?
            .ok_or_else(|| crate::storage::StorageError::MemberNotFound(id).into())
    }

    /// All current member versions, in no particular order.
    pub fn current_versions(&self) -> RosterResult<Vec<MemberVersion>> {
        Ok(self.members.current_versions()?)
    }

    /// Every version of a member, oldest first.
    pub fn history(&self, id: MemberId) -> RosterResult<Vec<MemberVersion>> {
        Ok(self.members.history(id)?)
    }

    /// Total number of version rows.
    pub fn version_count(&self) -> RosterResult<usize> {
        Ok(self.members.version_count()?)
    }

    /// Read containers and current members consistently with container removal.
    pub fn snapshot(&self) -> RosterResult<Snapshot> {
        let _guard = self.shared()?;
        let containers = self.containers.list()?;
        let mut members = self.members.current_versions()?;
        members.sort_by_key(|m| m.id);
        Ok(Snapshot {
            containers,
            members,
        })
    }
}
