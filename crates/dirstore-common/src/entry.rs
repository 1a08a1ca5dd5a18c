//! Directory entries
//!
//! An [`Entry`] is one record of the tree: an identifier, a distinguished
//! name and a list of attributes. Attribute names compare
//! case-insensitively; values keep their original bytes.

use crate::types::{Dn, EntryId, normalize_value};
use serde::{Deserialize, Serialize};

/// Name of the attribute every schema-checked entry must carry
pub const OBJECT_CLASS: &str = "objectClass";

/// One attribute and its values
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub values: Vec<Vec<u8>>,
}

impl Attribute {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Values normalized for equality indexing; non-UTF-8 values are
    /// indexed by their lossy rendering
    pub fn normalized_values(&self) -> impl Iterator<Item = String> + '_ {
        self.values
            .iter()
            .map(|v| normalize_value(&String::from_utf8_lossy(v)))
    }
}

/// Lifecycle state of an entry held by the entry cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntryState {
    /// Reserved by an in-flight insertion; invisible to lookups
    Provisional,
    /// Fully indexed and visible
    Committed,
    /// Being removed; invisible to lookups
    Deleting,
}

impl EntryState {
    #[must_use]
    pub const fn is_visible(self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// A directory entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    id: EntryId,
    dn: Dn,
    attrs: Vec<Attribute>,
}

impl Entry {
    /// Create an entry with no identifier and no attributes
    #[must_use]
    pub const fn new(dn: Dn) -> Self {
        Self {
            id: EntryId::NOID,
            dn,
            attrs: Vec::new(),
        }
    }

    #[must_use]
    pub const fn id(&self) -> EntryId {
        self.id
    }

    /// Assign the identifier. Identifiers are assigned once; reassigning a
    /// different value is a logic error.
    pub fn set_id(&mut self, id: EntryId) {
        debug_assert!(
            self.id == EntryId::NOID || self.id == id,
            "entry {} already has id {}",
            self.dn,
            self.id
        );
        self.id = id;
    }

    /// Forget the identifier, e.g. of an entry read from another backend
    pub fn clear_id(&mut self) {
        self.id = EntryId::NOID;
    }

    #[must_use]
    pub const fn dn(&self) -> &Dn {
        &self.dn
    }

    #[must_use]
    pub fn attributes(&self) -> &[Attribute] {
        &self.attrs
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attrs.iter().find(|a| a.is(name))
    }

    /// All values of an attribute; empty when absent
    #[must_use]
    pub fn values(&self, name: &str) -> &[Vec<u8>] {
        self.attribute(name).map_or(&[], |a| a.values.as_slice())
    }

    /// Append a value, creating the attribute on first use
    pub fn add_value(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        let value = value.into();
        if let Some(attr) = self.attrs.iter_mut().find(|a| a.is(name)) {
            attr.values.push(value);
        } else {
            self.attrs.push(Attribute {
                name: name.to_string(),
                values: vec![value],
            });
        }
    }

    /// Builder-style [`Entry::add_value`]
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.add_value(name, value);
        self
    }

    /// Values of `objectClass` as strings
    #[must_use]
    pub fn object_classes(&self) -> Vec<String> {
        self.values(OBJECT_CLASS)
            .iter()
            .map(|v| String::from_utf8_lossy(v).into_owned())
            .collect()
    }
}
