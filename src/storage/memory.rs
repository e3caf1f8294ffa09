//! In-memory storage backend.
//!
//! This module provides thread-safe in-memory implementations of the storage traits.
//! It is intended for embedded usage, tests, and as the state layer underneath the
//! journal (feature `persistent`).
//!
//! Member chains are locked individually: writers on different logical ids never
//! contend, and the chain index is only write-locked to register a new id.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::container::{Container, ContainerId};
use crate::member::{ApplyOutcome, MemberFields, MemberId, MemberUpdate, MemberVersion, VersionId};
use crate::storage::traits::{
    ContainerStore, MemberStore, Mutation, MutationLog, StorageError, UpsertOutcome,
};

/// Default number of compare-and-swap attempts made by [`InMemoryMemberStore::apply`].
pub const DEFAULT_APPLY_ATTEMPTS: u32 = 3;

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn record(log: Option<&Arc<dyn MutationLog>>, mutation: &Mutation) -> Result<(), StorageError> {
    match log {
        Some(log) => log.record(mutation),
        None => Ok(()),
    }
}

/// Thread-safe in-memory container store.
#[derive(Default)]
pub struct InMemoryContainerStore {
    state: RwLock<BTreeMap<ContainerId, Container>>,
    log: Option<Arc<dyn MutationLog>>,
}

impl fmt::Debug for InMemoryContainerStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryContainerStore")
            .field("state", &self.state)
            .field("logged", &self.log.is_some())
            .finish()
    }
}

impl InMemoryContainerStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record every mutation to `log` before applying it.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn MutationLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Re-apply a recorded mutation without logging it again.
    ///
    /// Member mutations are ignored.
    pub fn replay(&self, mutation: &Mutation) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("container.replay"))?;
        match mutation {
            Mutation::ContainerInserted(c) | Mutation::ContainerUpdated(c) => {
                state.insert(c.id, c.clone());
            }
            Mutation::ContainerRemoved { id } => {
                state.remove(id);
            }
            Mutation::MemberVersionInserted { .. } => {}
        }
        Ok(())
    }
}

impl ContainerStore for InMemoryContainerStore {
    fn upsert(&self, container: Container) -> Result<UpsertOutcome, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("container.upsert"))?;
        if state.contains_key(&container.id) {
            debug!(container = %container.id, "duplicate container ignored");
            return Ok(UpsertOutcome::DuplicateIgnored);
        }

        record(
            self.log.as_ref(),
            &Mutation::ContainerInserted(container.clone()),
        )?;
        debug!(container = %container.id, name = %container.name, "container inserted");
        state.insert(container.id, container);
        Ok(UpsertOutcome::Inserted)
    }

    fn update(&self, container: Container) -> Result<(), StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("container.update"))?;
        if !state.contains_key(&container.id) {
            return Err(StorageError::ContainerNotFound(container.id));
        }

        record(
            self.log.as_ref(),
            &Mutation::ContainerUpdated(container.clone()),
        )?;
        state.insert(container.id, container);
        Ok(())
    }

    fn get(&self, id: ContainerId) -> Result<Container, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("container.get"))?;
        state
            .get(&id)
            .cloned()
            .ok_or(StorageError::ContainerNotFound(id))
    }

    fn contains(&self, id: ContainerId) -> Result<bool, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("container.contains"))?;
        Ok(state.contains_key(&id))
    }

    fn remove(&self, id: ContainerId) -> Result<Container, StorageError> {
        let mut state = self.state.write().map_err(|_| lock_err("container.remove"))?;
        if !state.contains_key(&id) {
            return Err(StorageError::ContainerNotFound(id));
        }

        record(self.log.as_ref(), &Mutation::ContainerRemoved { id })?;
        state.remove(&id).ok_or(StorageError::ContainerNotFound(id))
    }

    fn list(&self) -> Result<Vec<Container>, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("container.list"))?;
        Ok(state.values().cloned().collect())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("container.len"))?;
        Ok(state.len())
    }
}

/// Version rows of one logical member, oldest first.
#[derive(Debug, Default)]
struct VersionChain {
    versions: Vec<MemberVersion>,
    current: Option<usize>,
    /// Bumped whenever the current marker or a row changes; the CAS token for `apply`.
    generation: u64,
}

impl VersionChain {
    fn current_row(&self) -> Option<&MemberVersion> {
        self.current.and_then(|idx| self.versions.get(idx))
    }

    fn retire(&mut self, version_id: VersionId) -> Result<(), StorageError> {
        let row = self
            .versions
            .iter_mut()
            .find(|v| v.version_id == version_id)
            .ok_or_else(|| {
                StorageError::BackendError(format!("cannot retire unknown version {version_id}"))
            })?;
        row.is_current = false;
        Ok(())
    }

    fn push_current(&mut self, version: MemberVersion) {
        if let Some(idx) = self.current {
            self.versions[idx].is_current = false;
        }
        self.versions.push(version);
        self.current = Some(self.versions.len() - 1);
        self.generation += 1;
    }
}

type ChainHandle = Arc<RwLock<VersionChain>>;

/// Thread-safe in-memory member store holding one version chain per logical id.
pub struct InMemoryMemberStore {
    chains: RwLock<HashMap<MemberId, ChainHandle>>,
    next_version: AtomicU64,
    max_attempts: u32,
    log: Option<Arc<dyn MutationLog>>,
}

impl Default for InMemoryMemberStore {
    fn default() -> Self {
        Self {
            chains: RwLock::new(HashMap::new()),
            next_version: AtomicU64::new(1),
            max_attempts: DEFAULT_APPLY_ATTEMPTS,
            log: None,
        }
    }
}

impl fmt::Debug for InMemoryMemberStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryMemberStore")
            .field("next_version", &self.next_version.load(Ordering::Relaxed))
            .field("max_attempts", &self.max_attempts)
            .field("logged", &self.log.is_some())
            .finish_non_exhaustive()
    }
}

impl InMemoryMemberStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set how many compare-and-swap attempts `apply` makes before reporting a conflict.
    ///
    /// Zero is treated as one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Record every new version to `log` before it becomes visible.
    #[must_use]
    pub fn with_log(mut self, log: Arc<dyn MutationLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Re-apply a recorded mutation without logging it again.
    ///
    /// Restores the exact version ids and keeps the id counter above them.
    pub fn replay(&self, mutation: &Mutation) -> Result<(), StorageError> {
        match mutation {
            Mutation::MemberVersionInserted {
                version,
                supersedes,
            } => {
                let chain = self.chain_for(version.id)?;
                let mut chain = chain.write().map_err(|_| lock_err("member.replay"))?;
                if let Some(previous) = supersedes {
                    chain.retire(*previous)?;
                }
                let mut version = version.clone();
                version.is_current = true;
                let raw = version.version_id.get();
                chain.push_current(version);
                self.next_version.fetch_max(raw + 1, Ordering::SeqCst);
                Ok(())
            }
            Mutation::ContainerRemoved { id } => self.on_container_removed(*id).map(|_| ()),
            Mutation::ContainerInserted(_) | Mutation::ContainerUpdated(_) => Ok(()),
        }
    }

    fn existing_chain(&self, id: MemberId) -> Result<Option<ChainHandle>, StorageError> {
        let chains = self.chains.read().map_err(|_| lock_err("member.chain"))?;
        Ok(chains.get(&id).cloned())
    }

    fn chain_for(&self, id: MemberId) -> Result<ChainHandle, StorageError> {
        if let Some(chain) = self.existing_chain(id)? {
            return Ok(chain);
        }
        let mut chains = self.chains.write().map_err(|_| lock_err("member.chain"))?;
        Ok(Arc::clone(chains.entry(id).or_default()))
    }

    fn all_chains(&self) -> Result<Vec<ChainHandle>, StorageError> {
        let chains = self.chains.read().map_err(|_| lock_err("member.chains"))?;
        Ok(chains.values().cloned().collect())
    }

    fn apply_with_retries(
        &self,
        chain: &RwLock<VersionChain>,
        fields: &MemberFields,
        containers: &dyn ContainerStore,
    ) -> Result<ApplyOutcome, StorageError> {
        for attempt in 1..=self.max_attempts {
            if let Some(outcome) = self.try_apply(chain, fields, containers)? {
                return Ok(outcome);
            }
            warn!(member = %fields.id, attempt, "current version moved during apply, retrying");
        }

        Err(StorageError::ConcurrencyConflict {
            id: fields.id,
            attempts: self.max_attempts,
        })
    }

    /// Forget a chain that never received a version, unless another caller
    /// still holds it. The map and `chain` account for the two references.
    fn release_if_unused(&self, id: MemberId, chain: ChainHandle) {
        let Ok(mut chains) = self.chains.write() else {
            return;
        };
        let unused = chains.get(&id).is_some_and(|held| Arc::ptr_eq(held, &chain))
            && Arc::strong_count(&chain) == 2
            && chain.read().is_ok_and(|c| c.versions.is_empty());
        if unused {
            chains.remove(&id);
        }
    }

    /// One optimistic round: read the current marker, diff, validate, then commit
    /// only if no other writer moved the marker meanwhile. `Ok(None)` means it did.
    fn try_apply(
        &self,
        chain: &RwLock<VersionChain>,
        fields: &MemberFields,
        containers: &dyn ContainerStore,
    ) -> Result<Option<ApplyOutcome>, StorageError> {
        let (observed, previous) = {
            let chain = chain.read().map_err(|_| lock_err("member.apply"))?;
            (chain.generation, chain.current_row().cloned())
        };

        if let Some(current) = &previous {
            let changed = current.changed_identity_fields(fields);
            if changed.is_empty() {
                debug!(member = %fields.id, version = %current.version_id, "identity fields unchanged");
                return Ok(Some(ApplyOutcome::Unchanged {
                    current: current.version_id,
                }));
            }
            debug!(member = %fields.id, ?changed, "identity fields changed");
        }

        if let Some(container_id) = fields.container_id {
            if !containers.contains(container_id)? {
                return Err(StorageError::InvalidReference(container_id));
            }
        }

        let mut chain = chain.write().map_err(|_| lock_err("member.apply"))?;
        if chain.generation != observed {
            return Ok(None);
        }

        let version_id = VersionId::new(self.next_version.fetch_add(1, Ordering::SeqCst));
        let supersedes = chain.current_row().map(|v| v.version_id);
        let version = MemberVersion::current(version_id, fields.clone());
        record(
            self.log.as_ref(),
            &Mutation::MemberVersionInserted {
                version: version.clone(),
                supersedes,
            },
        )?;
        chain.push_current(version);

        Ok(Some(match supersedes {
            None => {
                debug!(member = %fields.id, version = %version_id, "member inserted");
                ApplyOutcome::Inserted(version_id)
            }
            Some(previous) => {
                debug!(member = %fields.id, %previous, current = %version_id, "member superseded");
                ApplyOutcome::Superseded {
                    previous,
                    current: version_id,
                }
            }
        }))
    }
}

impl MemberStore for InMemoryMemberStore {
    fn apply(
        &self,
        update: &MemberUpdate,
        containers: &dyn ContainerStore,
    ) -> Result<ApplyOutcome, StorageError> {
        let fields = update.validate()?;
        let chain = self.chain_for(fields.id)?;
        let result = self.apply_with_retries(&chain, &fields, containers);
        if result.is_err() {
            self.release_if_unused(fields.id, chain);
        }
        result
    }

    fn current_versions(&self) -> Result<Vec<MemberVersion>, StorageError> {
        let mut out = Vec::new();
        for chain in self.all_chains()? {
            let chain = chain.read().map_err(|_| lock_err("member.current_versions"))?;
            if let Some(row) = chain.current_row() {
                out.push(row.clone());
            }
        }
        Ok(out)
    }

    fn current(&self, id: MemberId) -> Result<Option<MemberVersion>, StorageError> {
        let Some(chain) = self.existing_chain(id)? else {
            return Ok(None);
        };
        let chain = chain.read().map_err(|_| lock_err("member.current"))?;
        Ok(chain.current_row().cloned())
    }

    fn history(&self, id: MemberId) -> Result<Vec<MemberVersion>, StorageError> {
        let chain = self
            .existing_chain(id)?
            .ok_or(StorageError::MemberNotFound(id))?;
        let chain = chain.read().map_err(|_| lock_err("member.history"))?;
        if chain.versions.is_empty() {
            return Err(StorageError::MemberNotFound(id));
        }
        Ok(chain.versions.clone())
    }

    fn on_container_removed(&self, container_id: ContainerId) -> Result<usize, StorageError> {
        let mut touched = 0;
        for chain in self.all_chains()? {
            let mut chain = chain
                .write()
                .map_err(|_| lock_err("member.on_container_removed"))?;
            let mut hit = false;
            for row in &mut chain.versions {
                if row.container_id == Some(container_id) {
                    row.container_id = None;
                    touched += 1;
                    hit = true;
                }
            }
            if hit {
                chain.generation += 1;
            }
        }
        debug!(container = %container_id, rows = touched, "container references nulled");
        Ok(touched)
    }

    fn version_count(&self) -> Result<usize, StorageError> {
        let mut count = 0;
        for chain in self.all_chains()? {
            let chain = chain.read().map_err(|_| lock_err("member.version_count"))?;
            count += chain.versions.len();
        }
        Ok(count)
    }
}
