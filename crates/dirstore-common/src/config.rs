//! Configuration types for dirstore
//!
//! This module defines the configuration of one backend instance.

use crate::error::{Error, Result};
use crate::types::Dn;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Backend configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Path of the redb database file
    pub db_path: PathBuf,
    /// Names that are root-level entries of this backend
    pub suffixes: Vec<String>,
    /// Administrative identity allowed to add root-level entries
    pub root_dn: Option<String>,
    /// Reject entries without an objectClass
    pub schema_check: bool,
    /// Attributes that get an equality index
    pub indexed_attributes: Vec<String>,
    /// Entry cache capacity (0 = unbounded)
    pub cache_size: usize,
    /// What to undo when an index write fails mid-insertion
    pub rollback: RollbackPolicy,
    /// Static access rules
    pub acl: Vec<AclRuleConfig>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/dirstore/backend.redb"),
            suffixes: Vec::new(),
            root_dn: None,
            schema_check: true,
            indexed_attributes: vec!["objectClass".to_string()],
            cache_size: 1000,
            rollback: RollbackPolicy::default(),
            acl: Vec::new(),
        }
    }
}

impl BackendConfig {
    /// Create config with a database path
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Default::default()
        }
    }

    /// Parsed suffixes
    pub fn suffix_dns(&self) -> Result<Vec<Dn>> {
        self.suffixes
            .iter()
            .map(|s| Dn::parse(s).map_err(Error::from))
            .collect()
    }

    /// Parsed administrative identity
    pub fn root_dn(&self) -> Result<Option<Dn>> {
        self.root_dn
            .as_deref()
            .map(Dn::parse)
            .transpose()
            .map_err(Error::from)
    }

    /// Check the configuration for values the backend cannot run with
    pub fn validate(&self) -> Result<()> {
        self.suffix_dns()?;
        self.root_dn()?;
        for attr in &self.indexed_attributes {
            if attr.is_empty() || !attr.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(Error::configuration(format!(
                    "invalid indexed attribute name {attr:?}"
                )));
            }
        }
        for rule in &self.acl {
            Dn::parse(&rule.subtree)?;
            if rule.actor != ANY_ACTOR {
                Dn::parse(&rule.actor)?;
            }
        }
        Ok(())
    }
}

/// Compensation applied when an index write fails after earlier writes
/// for the same entry succeeded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RollbackPolicy {
    /// Only a Primary Store failure undoes the Name Index write;
    /// Parent-Child and Attribute Index records are left behind
    #[default]
    NameIndexOnly,
    /// Every completed write for the entry is undone
    Full,
}

/// Rule actor matching every identity
pub const ANY_ACTOR: &str = "*";

/// One static access rule: `actor` may exercise `permission` on entries
/// at or below `subtree`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AclRuleConfig {
    pub subtree: String,
    pub actor: String,
    pub permission: PermissionConfig,
}

/// Permission names accepted in configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionConfig {
    Read,
    WriteChildren,
}
