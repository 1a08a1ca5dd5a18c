//! dirstore Index Store - redb-backed indexes of one backend
//!
//! This crate persists the four structures an insertion has to keep in
//! step: the Name Index, the Parent-Child Index, the Attribute Indexes and
//! the Primary Store.

pub mod fault;
pub mod store;
pub mod tables;

// Re-exports
pub use fault::{FaultInjector, FaultPoint};
pub use store::{AttrRecord, IndexError, IndexResult, IndexStore};
