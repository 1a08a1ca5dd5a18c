//! Redb table definitions for the backend indexes.

use redb::{MultimapTableDefinition, TableDefinition};

// Name Index: normalized DN -> entry id
pub const DN2ID: TableDefinition<&str, u64> = TableDefinition::new("dn2id");

// Primary Store: entry id -> bincode-encoded Entry
pub const ID2ENTRY: TableDefinition<u64, &[u8]> = TableDefinition::new("id2entry");

// Parent-Child Index: parent id (0 for root-level entries) -> child ids
pub const ID2CHILDREN: MultimapTableDefinition<u64, u64> =
    MultimapTableDefinition::new("id2children");

/// Table name of the equality index for one attribute
pub fn attr_table_name(attr: &str) -> String {
    format!("attr_{}", attr.to_ascii_lowercase())
}

// Attribute Index: normalized value -> entry ids
pub fn attr_table(name: &str) -> MultimapTableDefinition<'_, &'static str, u64> {
    MultimapTableDefinition::new(name)
}
