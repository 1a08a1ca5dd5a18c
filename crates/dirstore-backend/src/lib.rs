//! dirstore backend
//!
//! Entry insertion for a hierarchical directory backend:
//! - [`Backend`]: the shared context every operation borrows
//! - [`EntryCache`]: lockable, state-tracked entries
//! - [`IdAllocator`]: entry identifiers
//! - [`LockManager`]: session, add serialization and root locks
//! - access control and schema checking seams
//! - consistency checking of the indexes

pub mod access;
pub mod add;
pub mod allocator;
pub mod backend;
pub mod cache;
pub mod error;
pub mod lock;
pub mod schema;
pub mod verify;

pub use access::{AccessControl, AllowAll, DenyAll, Permission, StaticAcl};
pub use add::{IndexStep, undo_plan};
pub use allocator::IdAllocator;
pub use backend::{Backend, Resolved};
pub use cache::{CacheError, CacheStats, EntryCache, EntryReadHandle, EntryWriteHandle, Lookup};
pub use error::{Error, Result, add_result};
pub use lock::LockManager;
pub use schema::{NoSchemaCheck, RequireObjectClass, SchemaChecker};
pub use verify::{Inconsistency, VerifyReport};
