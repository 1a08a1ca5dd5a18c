//! Entry insertion
//!
//! An add runs in a fixed order: duplicate check and schema check under the
//! add serialization mutex, then the parent (or the root mutex), then the
//! new entry's own lock, identifier reservation, provisional cache slot,
//! and the four index writes:
//!
//! ```text
//! parent-child -> attribute -> name -> primary store
//! ```
//!
//! The entry becomes visible only after the primary store write, when its
//! cache slot turns `Committed`. Whatever happens, [`AddCleanup`] releases
//! the locks, and an attempt that did not commit gives back its cache slot
//! and identifier.

use crate::access::Permission;
use crate::backend::{Backend, Resolved};
use crate::cache::{CacheError, EntryWriteHandle};
use crate::error::{Error, Result};
use dirstore_common::{Dn, Entry, EntryId, EntryState, RollbackPolicy};
use parking_lot::MutexGuard;
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// One index write of an insertion
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexStep {
    ParentChild,
    Attribute,
    NameIndex,
    PrimaryStore,
}

impl IndexStep {
    /// Write order
    pub const ORDER: [Self; 4] = [
        Self::ParentChild,
        Self::Attribute,
        Self::NameIndex,
        Self::PrimaryStore,
    ];
}

impl fmt::Display for IndexStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ParentChild => "id2children",
            Self::Attribute => "attribute index",
            Self::NameIndex => "dn2id",
            Self::PrimaryStore => "id2entry",
        })
    }
}

/// Writes to undo after `failed` went wrong with `completed` already done,
/// most recent first
#[must_use]
pub fn undo_plan(policy: RollbackPolicy, failed: IndexStep, completed: &[IndexStep]) -> Vec<IndexStep> {
    match policy {
        RollbackPolicy::NameIndexOnly => {
            if failed == IndexStep::PrimaryStore && completed.contains(&IndexStep::NameIndex) {
                vec![IndexStep::NameIndex]
            } else {
                Vec::new()
            }
        }
        RollbackPolicy::Full => {
            let mut plan: Vec<_> = completed.iter().rev().copied().collect();
            // attribute indexes commit one by one; some may have landed
            if failed == IndexStep::Attribute {
                plan.insert(0, IndexStep::Attribute);
            }
            plan
        }
    }
}

/// What keeps the new entry's position in the tree stable while it is added
enum Anchor<'a> {
    Parent(EntryWriteHandle),
    Root(MutexGuard<'a, ()>),
}

impl Anchor<'_> {
    fn parent_id(&self) -> EntryId {
        match self {
            Self::Parent(handle) => handle.id(),
            Self::Root(_) => EntryId::ROOT,
        }
    }
}

/// Releases everything one add attempt acquired, in order: parent or root
/// lock, then the entry handle, then (if the entry never committed) the
/// identifier.
struct AddCleanup<'a> {
    backend: &'a Backend,
    anchor: Option<Anchor<'a>>,
    handle: Option<EntryWriteHandle>,
    id: EntryId,
}

impl<'a> AddCleanup<'a> {
    fn new(backend: &'a Backend, anchor: Anchor<'a>, id: EntryId) -> Self {
        Self {
            backend,
            anchor: Some(anchor),
            handle: None,
            id,
        }
    }
}

impl Drop for AddCleanup<'_> {
    fn drop(&mut self) {
        drop(self.anchor.take());

        let committed = self
            .handle
            .as_ref()
            .is_some_and(|handle| handle.state() == EntryState::Committed);
        if let Some(handle) = self.handle.take() {
            // a non-committed slot leaves the cache with its handle
            self.backend.cache.return_handle(handle);
        }
        if !committed {
            self.backend.ids.release(self.id);
        }
    }
}

impl Backend {
    /// Add `entry` on behalf of `actor`, returning its new identifier
    pub fn add(&self, actor: &Dn, entry: Entry) -> Result<EntryId> {
        let start = Instant::now();
        let dn = entry.dn().clone();

        let outcome = {
            let _session = self.locks.enter_write();
            self.add_locked(actor, entry)
        };

        match &outcome {
            Ok(id) => debug!("add {} -> id {} ({:?})", dn, id, start.elapsed()),
            Err(e) => debug!(
                "add {} failed: {} ({:?})",
                dn,
                e.result_code(),
                start.elapsed()
            ),
        }
        outcome
    }

    fn add_locked(&self, actor: &Dn, mut entry: Entry) -> Result<EntryId> {
        let dn = entry.dn().clone();
        // an id carried over from elsewhere means nothing here
        entry.clear_id();

        let serial = self.locks.add_serial();
        if self.store.dn2id(dn.normalized())?.is_some() {
            debug!("add: {} already exists", dn);
            return Err(Error::AlreadyExists(dn.to_string()));
        }
        if self.config.schema_check && !self.schema.check(&entry) {
            debug!("add: {} failed schema check", dn);
            return Err(Error::ObjectClassViolation(dn.to_string()));
        }

        let anchor = if let Some(parent_dn) = self.parent_of(&dn) {
            let parent = match self.dn2entry_w(&parent_dn)? {
                Resolved::Found(parent) => parent,
                Resolved::Missing { matched } => {
                    debug!("add: parent {} does not exist", parent_dn);
                    return Err(Error::NoSuchObject {
                        dn: dn.to_string(),
                        matched: matched.map(|m| m.to_string()),
                    });
                }
            };
            drop(serial);

            if !self.access_allowed(actor, &parent, Permission::WriteChildren) {
                debug!("add: {} may not add children under {}", actor, parent_dn);
                return Err(Error::InsufficientAccess(dn.to_string()));
            }
            Anchor::Parent(parent)
        } else {
            if !self.is_admin(actor) {
                debug!("add: {} is not root and {} has no parent", actor, dn);
                return Err(Error::InsufficientAccess(dn.to_string()));
            }
            let root = self.locks.root();
            drop(serial);
            Anchor::Root(root)
        };
        let parent_id = anchor.parent_id();

        let Some(mut pending) = self.cache.prepare(entry) else {
            error!("add: could not lock new entry {}", dn);
            return Err(Error::operations("could not lock new entry"));
        };

        let id = self.ids.reserve();
        pending.entry_mut().set_id(id);
        let mut cleanup = AddCleanup::new(self, anchor, id);

        match self.cache.insert_provisional(pending) {
            Ok(handle) => cleanup.handle = Some(handle),
            Err(CacheError::NameExists(_)) => {
                debug!("add: {} committed concurrently", dn);
                return Err(Error::AlreadyExists(dn.to_string()));
            }
            Err(e) => {
                error!("add: cache insert for {} failed: {}", dn, e);
                return Err(Error::operations(format!("cache insert failed: {e}")));
            }
        }
        // a committed twin may have been evicted from the cache already
        if self.store.dn2id(dn.normalized())?.is_some() {
            debug!("add: {} committed concurrently", dn);
            return Err(Error::AlreadyExists(dn.to_string()));
        }

        let Some(handle) = cleanup.handle.as_ref() else {
            return Err(Error::operations("entry handle lost"));
        };
        self.write_indexes(handle, parent_id)?;

        self.cache.set_state(handle, EntryState::Committed);
        info!("added {} (id {}, parent {})", dn, id, parent_id);
        Ok(id)
    }

    /// Perform the four index writes, compensating per the rollback policy
    /// when one fails
    fn write_indexes(&self, entry: &Entry, parent_id: EntryId) -> Result<()> {
        let mut completed = Vec::with_capacity(IndexStep::ORDER.len());
        for step in IndexStep::ORDER {
            if let Err(e) = self.write_step(step, entry, parent_id) {
                warn!("add: {} write for {} failed: {}", step, entry.dn(), e);
                for undo in undo_plan(self.config.rollback, step, &completed) {
                    self.undo_step(undo, entry, parent_id);
                }
                return Err(Error::operations(format!(
                    "{step} write failed for id {}",
                    entry.id()
                )));
            }
            completed.push(step);
        }
        Ok(())
    }

    fn write_step(&self, step: IndexStep, entry: &Entry, parent_id: EntryId) -> Result<()> {
        match step {
            IndexStep::ParentChild => self.store.id2children_add(parent_id, entry.id())?,
            IndexStep::Attribute => self.store.index_add_entry(entry)?,
            IndexStep::NameIndex => self.store.dn2id_add(entry.dn().normalized(), entry.id())?,
            IndexStep::PrimaryStore => self.store.id2entry_add(entry)?,
        }
        Ok(())
    }

    /// Best effort; a failed undo is logged and left for repair
    fn undo_step(&self, step: IndexStep, entry: &Entry, parent_id: EntryId) {
        let outcome = match step {
            IndexStep::ParentChild => self
                .store
                .id2children_remove(parent_id, entry.id())
                .map(drop),
            IndexStep::Attribute => self.store.index_remove_entry(entry),
            IndexStep::NameIndex => self.store.dn2id_delete(entry.dn().normalized()).map(drop),
            IndexStep::PrimaryStore => self.store.id2entry_delete(entry.id()).map(drop),
        };
        match outcome {
            Ok(()) => debug!("add: undid {} for id {}", step, entry.id()),
            Err(e) => error!("add: undo of {} for id {} failed: {}", step, entry.id(), e),
        }
    }
}
