//! dirstore Common - Shared types and utilities
//!
//! This crate provides the name, entry and configuration types and the
//! result-code vocabulary used across all dirstore components.

pub mod config;
pub mod entry;
pub mod error;
pub mod ldif;
pub mod types;

pub use config::{ANY_ACTOR, AclRuleConfig, BackendConfig, PermissionConfig, RollbackPolicy};
pub use entry::{Attribute, Entry, EntryState, OBJECT_CLASS};
pub use error::{AddResult, Error, Result, ResultCode};
pub use types::*;
