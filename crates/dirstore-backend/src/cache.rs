//! Entry cache
//!
//! Every entry the backend hands out lives in a slot of this cache. A slot
//! carries the entry behind its own reader/writer lock plus a lifecycle
//! state; only `Committed` slots are visible to lookups. The two lookup
//! tables (by id, by normalized name) share one mutex, and that mutex is
//! never held while waiting on an entry lock.
//!
//! Handles own their lock through an `Arc` guard and release it on drop.
//! Dropping a write handle whose slot is not `Committed` removes the slot
//! from the cache, so an abandoned insertion leaves nothing behind.

use dirstore_common::{Entry, EntryId, EntryState};
use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock};
use std::collections::{HashMap, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, trace};

type WriteGuard = ArcRwLockWriteGuard<RawRwLock, Entry>;
type ReadGuard = ArcRwLockReadGuard<RawRwLock, Entry>;

/// Reasons an entry cannot be placed in the cache
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("an entry named {0} is already cached")]
    NameExists(String),

    #[error("an entry with id {0} is already cached")]
    IdExists(EntryId),

    #[error("entry has no identifier")]
    Unassigned,
}

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    /// Slots dropped because their insertion never committed
    pub discards: AtomicU64,
}

impl CacheStats {
    /// Hit ratio (0.0 to 1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        let total = hits + misses;
        if total == 0.0 { 0.0 } else { hits / total }
    }
}

struct Slot {
    id: EntryId,
    ndn: String,
    state: Mutex<EntryState>,
    entry: Arc<RwLock<Entry>>,
}

impl Slot {
    fn state(&self) -> EntryState {
        *self.state.lock()
    }
}

#[derive(Default)]
struct CacheTables {
    by_id: HashMap<EntryId, Arc<Slot>>,
    by_dn: HashMap<String, Arc<Slot>>,
    /// Least recently used at the front
    lru: VecDeque<EntryId>,
}

impl CacheTables {
    fn is_resident(&self, slot: &Arc<Slot>) -> bool {
        self.by_id
            .get(&slot.id)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
    }

    fn touch(&mut self, id: EntryId) {
        self.lru.retain(|x| *x != id);
        self.lru.push_back(id);
    }

    fn insert(&mut self, slot: Arc<Slot>) {
        self.lru.push_back(slot.id);
        self.by_dn.insert(slot.ndn.clone(), Arc::clone(&slot));
        self.by_id.insert(slot.id, slot);
    }

    fn remove(&mut self, slot: &Arc<Slot>) -> bool {
        if !self.is_resident(slot) {
            return false;
        }
        self.by_id.remove(&slot.id);
        if self
            .by_dn
            .get(&slot.ndn)
            .is_some_and(|s| Arc::ptr_eq(s, slot))
        {
            self.by_dn.remove(&slot.ndn);
        }
        self.lru.retain(|x| *x != slot.id);
        true
    }
}

struct Shared {
    tables: Mutex<CacheTables>,
    capacity: usize,
    stats: CacheStats,
}

impl Shared {
    fn discard(&self, slot: &Arc<Slot>) {
        if self.tables.lock().remove(slot) {
            self.stats.discards.fetch_add(1, Ordering::Relaxed);
            debug!("discarded cache slot for {} (id {})", slot.ndn, slot.id);
        }
    }

    fn evict_overflow(&self) {
        if self.capacity == 0 {
            return;
        }
        let mut tables = self.tables.lock();
        let mut budget = tables.lru.len();
        while tables.by_id.len() > self.capacity && budget > 0 {
            budget -= 1;
            let Some(id) = tables.lru.pop_front() else {
                break;
            };
            let Some(slot) = tables.by_id.get(&id).cloned() else {
                continue;
            };
            // only idle committed entries can go; nobody holds or waits on them
            if slot.state() == EntryState::Committed && Arc::strong_count(&slot.entry) == 1 {
                tables.remove(&slot);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                trace!("evicted {} (id {})", slot.ndn, id);
            } else {
                tables.lru.push_back(id);
            }
        }
    }
}

/// Outcome of a cache lookup
pub enum Lookup<H> {
    /// The entry is committed; the handle holds its lock
    Found(H),
    /// Nothing cached under that name; the caller may consult the store
    Absent,
    /// Cached but not visible (being deleted)
    Invisible,
}

/// An entry locked for writing, not yet placed in the cache
pub struct PendingEntry {
    lock: Arc<RwLock<Entry>>,
    guard: WriteGuard,
}

impl PendingEntry {
    pub fn entry_mut(&mut self) -> &mut Entry {
        &mut self.guard
    }
}

impl Deref for PendingEntry {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        &self.guard
    }
}

/// Write access to a cached entry
pub struct EntryWriteHandle {
    slot: Arc<Slot>,
    guard: WriteGuard,
    shared: Arc<Shared>,
}

impl EntryWriteHandle {
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.slot.id
    }

    #[must_use]
    pub fn state(&self) -> EntryState {
        self.slot.state()
    }

    pub fn set_state(&self, state: EntryState) {
        *self.slot.state.lock() = state;
    }
}

impl Deref for EntryWriteHandle {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        &self.guard
    }
}

impl DerefMut for EntryWriteHandle {
    fn deref_mut(&mut self) -> &mut Entry {
        &mut self.guard
    }
}

impl Drop for EntryWriteHandle {
    fn drop(&mut self) {
        // still holding the lock here, so nobody observes the slot in between
        if !self.state().is_visible() {
            self.shared.discard(&self.slot);
        }
    }
}

/// Read access to a cached entry
pub struct EntryReadHandle {
    slot: Arc<Slot>,
    guard: ReadGuard,
}

impl EntryReadHandle {
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.slot.id
    }
}

impl Deref for EntryReadHandle {
    type Target = Entry;

    fn deref(&self) -> &Entry {
        &self.guard
    }
}

enum Settled {
    Visible,
    Hidden,
    Gone,
}

/// Cache of entries keyed by id and by normalized name
pub struct EntryCache {
    shared: Arc<Shared>,
}

impl EntryCache {
    /// Create a cache holding at most `capacity` idle entries (0 = unbounded)
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(CacheTables::default()),
                capacity,
                stats: CacheStats::default(),
            }),
        }
    }

    fn resolve(&self, ndn: &str) -> Option<Arc<Slot>> {
        let slot = self.shared.tables.lock().by_dn.get(ndn).cloned();
        if slot.is_none() {
            self.shared.stats.misses.fetch_add(1, Ordering::Relaxed);
        }
        slot
    }

    /// Re-check a slot once its lock is held
    fn settle(&self, slot: &Arc<Slot>) -> Settled {
        let mut tables = self.shared.tables.lock();
        if !tables.is_resident(slot) {
            return Settled::Gone;
        }
        if !slot.state().is_visible() {
            return Settled::Hidden;
        }
        tables.touch(slot.id);
        self.shared.stats.hits.fetch_add(1, Ordering::Relaxed);
        Settled::Visible
    }

    /// Find a committed entry by normalized name and lock it for writing.
    ///
    /// Blocks while another holder has the entry locked, including an
    /// insertion that has not finished yet.
    pub fn lookup_for_write(&self, ndn: &str) -> Lookup<EntryWriteHandle> {
        loop {
            let Some(slot) = self.resolve(ndn) else {
                return Lookup::Absent;
            };
            let guard = slot.entry.write_arc();
            match self.settle(&slot) {
                Settled::Gone => {}
                Settled::Hidden => return Lookup::Invisible,
                Settled::Visible => {
                    return Lookup::Found(EntryWriteHandle {
                        slot,
                        guard,
                        shared: Arc::clone(&self.shared),
                    });
                }
            }
        }
    }

    /// Find a committed entry by normalized name and lock it for reading
    pub fn lookup_for_read(&self, ndn: &str) -> Lookup<EntryReadHandle> {
        loop {
            let Some(slot) = self.resolve(ndn) else {
                return Lookup::Absent;
            };
            let guard = slot.entry.read_arc();
            match self.settle(&slot) {
                Settled::Gone => {}
                Settled::Hidden => return Lookup::Invisible,
                Settled::Visible => return Lookup::Found(EntryReadHandle { slot, guard }),
            }
        }
    }

    /// Wrap a new entry in its own lock, held for writing.
    ///
    /// Returns `None` if the fresh lock cannot be taken.
    #[must_use]
    pub fn prepare(&self, entry: Entry) -> Option<PendingEntry> {
        let lock = Arc::new(RwLock::new(entry));
        let guard = lock.try_write_arc()?;
        Some(PendingEntry { lock, guard })
    }

    /// Place a pending entry in the cache as `Provisional`.
    ///
    /// If an unfinished insertion or removal of the same name is in flight,
    /// waits for it to settle first. Fails when a committed entry already
    /// has the name, or a cached entry already has the id.
    pub fn insert_provisional(
        &self,
        pending: PendingEntry,
    ) -> Result<EntryWriteHandle, CacheError> {
        let id = pending.id();
        if !id.is_assigned() {
            return Err(CacheError::Unassigned);
        }
        let ndn = pending.dn().normalized().to_string();

        loop {
            let mut tables = self.shared.tables.lock();
            if let Some(existing) = tables.by_dn.get(&ndn).cloned() {
                if existing.state().is_visible() {
                    return Err(CacheError::NameExists(ndn));
                }
                drop(tables);
                trace!("waiting for in-flight entry {}", ndn);
                drop(existing.entry.read());
                continue;
            }
            if tables.by_id.contains_key(&id) {
                return Err(CacheError::IdExists(id));
            }

            let slot = Arc::new(Slot {
                id,
                ndn,
                state: Mutex::new(EntryState::Provisional),
                entry: pending.lock,
            });
            tables.insert(Arc::clone(&slot));
            drop(tables);
            self.shared.evict_overflow();

            return Ok(EntryWriteHandle {
                slot,
                guard: pending.guard,
                shared: Arc::clone(&self.shared),
            });
        }
    }

    /// Cache an entry loaded from the store, already `Committed`
    pub fn insert_committed(&self, entry: Entry) -> Result<(), CacheError> {
        let id = entry.id();
        if !id.is_assigned() {
            return Err(CacheError::Unassigned);
        }
        let ndn = entry.dn().normalized().to_string();
        {
            let mut tables = self.shared.tables.lock();
            if tables.by_dn.contains_key(&ndn) {
                return Err(CacheError::NameExists(ndn));
            }
            if tables.by_id.contains_key(&id) {
                return Err(CacheError::IdExists(id));
            }
            tables.insert(Arc::new(Slot {
                id,
                ndn,
                state: Mutex::new(EntryState::Committed),
                entry: Arc::new(RwLock::new(entry)),
            }));
        }
        self.shared.evict_overflow();
        Ok(())
    }

    pub fn set_state(&self, handle: &EntryWriteHandle, state: EntryState) {
        handle.set_state(state);
    }

    /// Release a handle. A handle whose entry never committed takes its
    /// slot with it.
    pub fn return_handle(&self, handle: EntryWriteHandle) {
        drop(handle);
    }

    /// State of a cached entry, without taking its lock
    #[must_use]
    pub fn peek_state(&self, ndn: &str) -> Option<EntryState> {
        let slot = self.shared.tables.lock().by_dn.get(ndn).cloned();
        slot.map(|s| s.state())
    }

    #[must_use]
    pub fn contains_id(&self, id: EntryId) -> bool {
        self.shared.tables.lock().by_id.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.tables.lock().by_id.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.shared.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirstore_common::Dn;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn entry(dn: &str, id: u64) -> Entry {
        let mut e = Entry::new(Dn::parse(dn).unwrap()).with("objectClass", "top");
        e.set_id(EntryId::new(id));
        e
    }

    fn provisional(cache: &EntryCache, dn: &str, id: u64) -> EntryWriteHandle {
        let pending = cache.prepare(entry(dn, id)).unwrap();
        cache.insert_provisional(pending).unwrap()
    }

    #[test]
    fn test_committed_entry_found() {
        let cache = EntryCache::new(0);
        cache.insert_committed(entry("ou=people", 1)).unwrap();

        let Lookup::Found(handle) = cache.lookup_for_write("ou=people") else {
            panic!("expected a hit");
        };
        assert_eq!(handle.id(), EntryId::new(1));
        assert_eq!(handle.state(), EntryState::Committed);
        assert!(matches!(cache.lookup_for_read("ou=nobody"), Lookup::Absent));
        assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 1);
        assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_abandoned_provisional_is_discarded() {
        let cache = EntryCache::new(0);
        let handle = provisional(&cache, "cn=alice,ou=people", 2);
        assert_eq!(
            cache.peek_state("cn=alice,ou=people"),
            Some(EntryState::Provisional)
        );

        cache.return_handle(handle);
        assert!(cache.is_empty());
        assert!(matches!(
            cache.lookup_for_read("cn=alice,ou=people"),
            Lookup::Absent
        ));
        assert_eq!(cache.stats().discards.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_committed_handle_stays_cached() {
        let cache = EntryCache::new(0);
        let handle = provisional(&cache, "cn=alice,ou=people", 2);
        cache.set_state(&handle, EntryState::Committed);
        cache.return_handle(handle);
        assert_eq!(cache.len(), 1);
        assert!(matches!(
            cache.lookup_for_read("cn=alice,ou=people"),
            Lookup::Found(_)
        ));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let cache = EntryCache::new(0);
        cache.insert_committed(entry("ou=people", 1)).unwrap();

        let pending = cache.prepare(entry("OU=People", 2)).unwrap();
        assert_eq!(
            cache.insert_provisional(pending).err(),
            Some(CacheError::NameExists("ou=people".into()))
        );
        let pending = cache.prepare(entry("ou=groups", 1)).unwrap();
        assert_eq!(
            cache.insert_provisional(pending).err(),
            Some(CacheError::IdExists(EntryId::new(1)))
        );
        let pending = cache.prepare(Entry::new(Dn::parse("ou=x").unwrap())).unwrap();
        assert_eq!(
            cache.insert_provisional(pending).err(),
            Some(CacheError::Unassigned)
        );
    }

    #[test]
    fn test_lookup_waits_for_provisional_entry() {
        let cache = EntryCache::new(0);
        let handle = provisional(&cache, "ou=people", 1);
        let done = AtomicBool::new(false);

        thread::scope(|s| {
            let reader = s.spawn(|| {
                let found = matches!(cache.lookup_for_read("ou=people"), Lookup::Found(_));
                done.store(true, Ordering::SeqCst);
                found
            });

            thread::sleep(Duration::from_millis(50));
            assert!(!done.load(Ordering::SeqCst));

            cache.set_state(&handle, EntryState::Committed);
            cache.return_handle(handle);
            assert!(reader.join().unwrap());
        });
    }

    #[test]
    fn test_lookup_after_abandoned_insert_is_absent() {
        let cache = EntryCache::new(0);
        let handle = provisional(&cache, "ou=people", 1);

        thread::scope(|s| {
            let reader = s.spawn(|| matches!(cache.lookup_for_write("ou=people"), Lookup::Absent));
            thread::sleep(Duration::from_millis(50));
            cache.return_handle(handle);
            assert!(reader.join().unwrap());
        });
    }

    #[test]
    fn test_second_insert_waits_for_first() {
        let cache = EntryCache::new(0);
        let first = provisional(&cache, "cn=bob,ou=people", 5);

        thread::scope(|s| {
            let second = s.spawn(|| {
                let pending = cache.prepare(entry("cn=bob,ou=people", 6)).unwrap();
                cache.insert_provisional(pending).map(|h| h.id())
            });
            thread::sleep(Duration::from_millis(50));
            // first attempt gives up; the second takes its place
            cache.return_handle(first);
            assert_eq!(second.join().unwrap(), Ok(EntryId::new(6)));
        });

        let committed = provisional(&cache, "cn=carol,ou=people", 7);
        thread::scope(|s| {
            let second = s.spawn(|| {
                let pending = cache.prepare(entry("cn=carol,ou=people", 8)).unwrap();
                cache.insert_provisional(pending).map(|h| h.id())
            });
            thread::sleep(Duration::from_millis(50));
            cache.set_state(&committed, EntryState::Committed);
            cache.return_handle(committed);
            assert_eq!(
                second.join().unwrap(),
                Err(CacheError::NameExists("cn=carol,ou=people".into()))
            );
        });
    }

    #[test]
    fn test_lru_eviction() {
        let cache = EntryCache::new(2);
        cache.insert_committed(entry("ou=a", 1)).unwrap();
        cache.insert_committed(entry("ou=b", 2)).unwrap();
        // touch a so b is the oldest
        assert!(matches!(cache.lookup_for_read("ou=a"), Lookup::Found(_)));
        cache.insert_committed(entry("ou=c", 3)).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.peek_state("ou=b").is_none());
        assert!(cache.contains_id(EntryId::new(1)));
        assert_eq!(cache.stats().evictions.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_held_and_provisional_entries_not_evicted() {
        let cache = EntryCache::new(1);
        cache.insert_committed(entry("ou=a", 1)).unwrap();
        let Lookup::Found(held) = cache.lookup_for_write("ou=a") else {
            panic!("expected a hit");
        };
        let pending = provisional(&cache, "ou=b", 2);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.peek_state("ou=a"), Some(EntryState::Committed));
        assert_eq!(cache.peek_state("ou=b"), Some(EntryState::Provisional));

        drop(held);
        drop(pending);
        assert!(cache.contains_id(EntryId::new(1)));
        assert!(!cache.contains_id(EntryId::new(2)));
    }
}
