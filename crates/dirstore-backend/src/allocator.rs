//! Entry identifier allocation
//!
//! Identifiers are handed out in increasing order. An identifier reserved
//! by an insertion that later failed can be given back with
//! [`IdAllocator::release`]; released values are reused, lowest first,
//! before the counter advances again.

use dirstore_common::EntryId;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use tracing::{debug, warn};

struct AllocState {
    /// Next never-handed-out identifier
    next: EntryId,
    /// Released identifiers below `next`
    free: BTreeSet<EntryId>,
}

/// Thread-safe identifier allocator
pub struct IdAllocator {
    state: Mutex<AllocState>,
}

impl IdAllocator {
    /// Create an allocator whose first fresh identifier is `next`
    #[must_use]
    pub fn new(next: EntryId) -> Self {
        Self {
            state: Mutex::new(AllocState {
                next,
                free: BTreeSet::new(),
            }),
        }
    }

    /// Seed from the highest identifier already stored
    #[must_use]
    pub fn after(max_id: Option<EntryId>) -> Self {
        Self::new(max_id.map_or(EntryId::FIRST, EntryId::next))
    }

    /// Hand out an identifier
    pub fn reserve(&self) -> EntryId {
        let mut state = self.state.lock();
        if let Some(id) = state.free.pop_first() {
            debug!("reusing released id {}", id);
            return id;
        }
        let id = state.next;
        state.next = id.next();
        id
    }

    /// Give back a reserved identifier that was never committed
    pub fn release(&self, id: EntryId) {
        if !id.is_assigned() {
            return;
        }
        let mut state = self.state.lock();
        if id >= state.next {
            warn!("release of id {} that was never reserved", id);
            return;
        }
        if id.next() == state.next {
            // most recent reservation: rewind, then fold any free tail back in
            state.next = id;
            while let Some(&last) = state.free.last() {
                if last.next() != state.next {
                    break;
                }
                state.free.pop_last();
                state.next = last;
            }
        } else if !state.free.insert(id) {
            warn!("id {} released twice", id);
        }
    }

    /// The identifier the next `reserve` will return
    #[must_use]
    pub fn peek(&self) -> EntryId {
        let state = self.state.lock();
        state.free.first().copied().unwrap_or(state.next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_monotonic_reserve() {
        let ids = IdAllocator::after(None);
        assert_eq!(ids.reserve(), EntryId::new(1));
        assert_eq!(ids.reserve(), EntryId::new(2));
        assert_eq!(ids.peek(), EntryId::new(3));
    }

    #[test]
    fn test_seeded_from_store() {
        let ids = IdAllocator::after(Some(EntryId::new(41)));
        assert_eq!(ids.reserve(), EntryId::new(42));
    }

    #[test]
    fn test_release_latest_rewinds() {
        let ids = IdAllocator::after(None);
        let a = ids.reserve();
        let b = ids.reserve();
        ids.release(b);
        assert_eq!(ids.reserve(), b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_release_out_of_order_is_reused_first() {
        let ids = IdAllocator::after(None);
        let a = ids.reserve();
        let b = ids.reserve();
        ids.release(a);
        assert_eq!(ids.peek(), a);
        assert_eq!(ids.reserve(), a);
        assert_eq!(ids.reserve(), b.next());
    }

    #[test]
    fn test_release_folds_free_tail() {
        let ids = IdAllocator::after(None);
        let a = ids.reserve();
        let b = ids.reserve();
        let c = ids.reserve();
        ids.release(b);
        ids.release(c);
        // b and c both gone: counter back at b
        assert_eq!(ids.peek(), b);
        assert_eq!(ids.reserve(), b);
        assert_eq!(ids.reserve(), c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_release_ignores_unknown_ids() {
        let ids = IdAllocator::after(None);
        ids.release(EntryId::new(10));
        ids.release(EntryId::NOID);
        assert_eq!(ids.reserve(), EntryId::new(1));
    }

    #[test]
    fn test_concurrent_reserve_is_unique() {
        let ids = Arc::new(IdAllocator::after(None));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..100).map(|_| ids.reserve()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {id}");
            }
        }
        assert_eq!(seen.len(), 800);
    }
}
