//! Index consistency checking and repair
//!
//! Failed insertions may leave index records behind (see
//! [`RollbackPolicy`](dirstore_common::RollbackPolicy)). The checker cross
//! references every index against the primary store under the maintenance
//! lock; repair deletes records that point at nothing, or at an entry that
//! does not match them, and restores missing name records.

use crate::backend::Backend;
use crate::error::Result;
use dirstore_common::{Entry, EntryId};
use dirstore_index::AttrRecord;
use std::collections::HashMap;
use std::fmt;
use tracing::{info, warn};

/// One disagreement between an index and the primary store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inconsistency {
    /// Name record whose id has no primary record
    DanglingName { ndn: String, id: EntryId },
    /// Name record whose primary record carries a different name
    MisnamedEntry { ndn: String, id: EntryId },
    /// Primary record not reachable through the name index
    UnnamedEntry { ndn: String, id: EntryId },
    /// Child record whose child has no primary record
    DanglingChild { parent: EntryId, child: EntryId },
    /// Child record whose child lives under another parent
    MisplacedChild { parent: EntryId, child: EntryId },
    /// Attribute record whose id has no primary record
    DanglingAttr(AttrRecord),
    /// Attribute record for a value the entry does not carry
    StaleAttr(AttrRecord),
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingName { ndn, id } => write!(f, "dn2id {ndn} -> {id}: no entry"),
            Self::MisnamedEntry { ndn, id } => {
                write!(f, "dn2id {ndn} -> {id}: entry has another name")
            }
            Self::UnnamedEntry { ndn, id } => write!(f, "entry {id} ({ndn}) has no dn2id record"),
            Self::DanglingChild { parent, child } => {
                write!(f, "id2children {parent} -> {child}: no entry")
            }
            Self::MisplacedChild { parent, child } => {
                write!(f, "id2children {parent} -> {child}: entry is not a child")
            }
            Self::DanglingAttr(r) => write!(f, "attr_{} {} -> {}: no entry", r.attr, r.value, r.id),
            Self::StaleAttr(r) => write!(
                f,
                "attr_{} {} -> {}: entry lacks the value",
                r.attr, r.value, r.id
            ),
        }
    }
}

/// Result of a consistency scan
#[derive(Clone, Debug, Default)]
pub struct VerifyReport {
    /// Primary records examined
    pub entries: usize,
    pub issues: Vec<Inconsistency>,
}

impl VerifyReport {
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }
}

fn carries(entry: &Entry, record: &AttrRecord) -> bool {
    entry
        .attribute(&record.attr)
        .is_some_and(|a| a.normalized_values().any(|v| v == record.value))
}

impl Backend {
    /// Scan all indexes against the primary store
    pub fn verify(&self) -> Result<VerifyReport> {
        let _maintenance = self.locks.enter_maintenance();
        let report = self.scan()?;
        info!(
            "verify: {} entries, {} inconsistencies",
            report.entries,
            report.issues.len()
        );
        Ok(report)
    }

    /// Scan, then fix every inconsistency found. Returns what was found.
    pub fn repair(&self) -> Result<VerifyReport> {
        let _maintenance = self.locks.enter_maintenance();
        let report = self.scan()?;
        for issue in &report.issues {
            warn!("repair: {}", issue);
            match issue {
                Inconsistency::DanglingName { ndn, .. } | Inconsistency::MisnamedEntry { ndn, .. } => {
                    self.store.dn2id_delete(ndn)?;
                }
                Inconsistency::UnnamedEntry { ndn, id } => {
                    if self.store.dn2id(ndn)?.is_none() {
                        self.store.dn2id_add(ndn, *id)?;
                    }
                }
                Inconsistency::DanglingChild { parent, child }
                | Inconsistency::MisplacedChild { parent, child } => {
                    self.store.id2children_remove(*parent, *child)?;
                }
                Inconsistency::DanglingAttr(record) | Inconsistency::StaleAttr(record) => {
                    self.store.remove_attr_record(record)?;
                }
            }
        }
        info!("repair: fixed {} inconsistencies", report.issues.len());
        Ok(report)
    }

    fn scan(&self) -> Result<VerifyReport> {
        let entries: HashMap<EntryId, Entry> = self
            .store
            .primary_records()?
            .into_iter()
            .map(|e| (e.id(), e))
            .collect();
        let names: HashMap<String, EntryId> = self.store.name_records()?.into_iter().collect();
        let mut issues = Vec::new();

        for (ndn, id) in &names {
            match entries.get(id) {
                None => issues.push(Inconsistency::DanglingName {
                    ndn: ndn.clone(),
                    id: *id,
                }),
                Some(entry) if entry.dn().normalized() != ndn => {
                    issues.push(Inconsistency::MisnamedEntry {
                        ndn: ndn.clone(),
                        id: *id,
                    });
                }
                Some(_) => {}
            }
        }

        for (id, entry) in &entries {
            let ndn = entry.dn().normalized();
            if names.get(ndn) != Some(id) {
                issues.push(Inconsistency::UnnamedEntry {
                    ndn: ndn.to_string(),
                    id: *id,
                });
            }
        }

        for (parent, child) in self.store.child_records()? {
            let Some(entry) = entries.get(&child) else {
                issues.push(Inconsistency::DanglingChild { parent, child });
                continue;
            };
            let expected = match self.parent_of(entry.dn()) {
                None => Some(EntryId::ROOT),
                Some(parent_dn) => names.get(parent_dn.normalized()).copied(),
            };
            if expected != Some(parent) {
                issues.push(Inconsistency::MisplacedChild { parent, child });
            }
        }

        for record in self.store.attr_records()? {
            match entries.get(&record.id) {
                None => issues.push(Inconsistency::DanglingAttr(record)),
                Some(entry) if !carries(entry, &record) => {
                    issues.push(Inconsistency::StaleAttr(record));
                }
                Some(_) => {}
            }
        }

        Ok(VerifyReport {
            entries: entries.len(),
            issues,
        })
    }
}
