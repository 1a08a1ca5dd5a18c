//! Write-failure injection for the index store.
//!
//! A [`FaultInjector`] is shared by the store and whoever drives a failure
//! scenario. Arming it for a [`FaultPoint`] makes the next write to that
//! index fail with [`IndexError::FaultInjected`](crate::IndexError) before
//! the table is touched. Each arm triggers at most once.

use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// The index writes of one insertion, in the order they are performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    ParentChild,
    Attribute,
    NameIndex,
    PrimaryStore,
}

impl FaultPoint {
    const fn tag(self) -> u8 {
        match self {
            Self::ParentChild => 1,
            Self::Attribute => 2,
            Self::NameIndex => 3,
            Self::PrimaryStore => 4,
        }
    }
}

/// Tracks which write, if any, should fail next.
///
/// All state is atomic, so one injector can be shared across threads.
#[derive(Debug, Default)]
pub struct FaultInjector {
    /// Tag of the armed point, 0 when disarmed
    armed: AtomicU8,
    /// Number of faults delivered since creation
    triggered: AtomicU32,
}

impl FaultInjector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next write at `point`
    pub fn arm(&self, point: FaultPoint) {
        self.armed.store(point.tag(), Ordering::SeqCst);
    }

    pub fn disarm(&self) {
        self.armed.store(0, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst) != 0
    }

    /// Number of faults delivered so far
    #[must_use]
    pub fn triggered(&self) -> u32 {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Returns `true` (and disarms) when `point` is armed
    pub fn should_fail(&self, point: FaultPoint) -> bool {
        let fired = self
            .armed
            .compare_exchange(point.tag(), 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if fired {
            self.triggered.fetch_add(1, Ordering::SeqCst);
        }
        fired
    }
}
