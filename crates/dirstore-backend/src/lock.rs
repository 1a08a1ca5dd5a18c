//! Backend-level locks
//!
//! Lock order, outermost first:
//!
//! 1. backend session ([`LockManager::enter_write`] / [`LockManager::enter_maintenance`])
//! 2. add serialization mutex
//! 3. parent entry lock, or the root mutex for root-level entries
//! 4. the new entry's own lock
//!
//! The add serialization mutex is released as soon as (3) is held.

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Held for the duration of one mutating operation.
///
/// Mutators share the session with each other; only maintenance excludes
/// them.
pub struct WriteSession<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive access to the whole backend
pub struct MaintenanceSession<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

/// The backend's coarse locks
#[derive(Default)]
pub struct LockManager {
    session: RwLock<()>,
    add_serial: Mutex<()>,
    root: Mutex<()>,
}

impl LockManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter_write(&self) -> WriteSession<'_> {
        WriteSession {
            _guard: self.session.read(),
        }
    }

    pub fn enter_maintenance(&self) -> MaintenanceSession<'_> {
        MaintenanceSession {
            _guard: self.session.write(),
        }
    }

    /// Non-blocking maintenance entry
    pub fn try_enter_maintenance(&self) -> Option<MaintenanceSession<'_>> {
        self.session
            .try_write()
            .map(|guard| MaintenanceSession { _guard: guard })
    }

    /// Serializes the duplicate check of concurrent adds until each has
    /// locked its parent
    pub fn add_serial(&self) -> MutexGuard<'_, ()> {
        self.add_serial.lock()
    }

    /// Stands in for the parent lock of root-level entries
    pub fn root(&self) -> MutexGuard<'_, ()> {
        self.root.lock()
    }

    #[must_use]
    pub fn is_root_locked(&self) -> bool {
        self.root.is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writers_share_session() {
        let locks = LockManager::new();
        let a = locks.enter_write();
        let b = locks.enter_write();
        assert!(locks.try_enter_maintenance().is_none());
        drop(a);
        drop(b);
        assert!(locks.try_enter_maintenance().is_some());
    }

    #[test]
    fn test_maintenance_excludes_writers() {
        let locks = LockManager::new();
        let _m = locks.enter_maintenance();
        assert!(locks.session.try_read().is_none());
    }

    #[test]
    fn test_root_mutex() {
        let locks = LockManager::new();
        let guard = locks.root();
        assert!(locks.is_root_locked());
        drop(guard);
        assert!(!locks.is_root_locked());
    }
}
