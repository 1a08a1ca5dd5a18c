//! Persistent index store backed by redb.
//!
//! Provides typed add/get/delete methods for each index. Every write is its
//! own redb write transaction: callers that need several indexes updated
//! together sequence the calls themselves and compensate on failure.

use crate::fault::{FaultInjector, FaultPoint};
use crate::tables;
use dirstore_common::{Entry, EntryId};
use redb::{Database, ReadableMultimapTable, ReadableTable};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Error type for index store operations
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("name already indexed: {0}")]
    KeyExists(String),
    #[error("injected fault at {0:?}")]
    FaultInjected(FaultPoint),
}

impl From<redb::TransactionError> for IndexError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

pub type IndexResult<T> = Result<T, IndexError>;

/// One row of an attribute index
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttrRecord {
    pub attr: String,
    pub value: String,
    pub id: EntryId,
}

/// Persistent indexes of one backend.
pub struct IndexStore {
    db: Database,
    /// Lowercased names of attributes with an equality index
    indexed: Vec<String>,
    faults: Arc<FaultInjector>,
}

impl IndexStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>, indexed_attributes: &[String]) -> IndexResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        let mut indexed: Vec<String> = indexed_attributes
            .iter()
            .map(|a| a.to_ascii_lowercase())
            .collect();
        indexed.sort();
        indexed.dedup();

        // Create all tables eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::DN2ID)?;
            let _t = write_txn.open_table(tables::ID2ENTRY)?;
            let _t = write_txn.open_multimap_table(tables::ID2CHILDREN)?;
            for attr in &indexed {
                let name = tables::attr_table_name(attr);
                let _t = write_txn.open_multimap_table(tables::attr_table(&name))?;
            }
        }
        write_txn.commit()?;

        info!(
            "Opened index store at {:?} ({} attribute indexes)",
            path,
            indexed.len()
        );
        Ok(Self {
            db,
            indexed,
            faults: Arc::new(FaultInjector::new()),
        })
    }

    /// Share a fault injector with the caller
    #[must_use]
    pub fn with_faults(mut self, faults: Arc<FaultInjector>) -> Self {
        self.faults = faults;
        self
    }

    #[must_use]
    pub const fn faults(&self) -> &Arc<FaultInjector> {
        &self.faults
    }

    #[must_use]
    pub fn indexed_attributes(&self) -> &[String] {
        &self.indexed
    }

    #[must_use]
    pub fn is_indexed(&self, attr: &str) -> bool {
        self.indexed.iter().any(|a| a.eq_ignore_ascii_case(attr))
    }

    fn check_fault(&self, point: FaultPoint) -> IndexResult<()> {
        if self.faults.should_fail(point) {
            return Err(IndexError::FaultInjected(point));
        }
        Ok(())
    }

    // ---- Name Index ----

    pub fn dn2id(&self, ndn: &str) -> IndexResult<Option<EntryId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::DN2ID)?;
        Ok(table.get(ndn)?.map(|v| EntryId::new(v.value())))
    }

    /// Record `ndn -> id`; an existing record for `ndn` is never replaced.
    pub fn dn2id_add(&self, ndn: &str, id: EntryId) -> IndexResult<()> {
        self.check_fault(FaultPoint::NameIndex)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::DN2ID)?;
            if table.get(ndn)?.is_some() {
                return Err(IndexError::KeyExists(ndn.to_string()));
            }
            table.insert(ndn, id.get())?;
        }
        write_txn.commit()?;
        debug!("dn2id add {} -> {}", ndn, id);
        Ok(())
    }

    pub fn dn2id_delete(&self, ndn: &str) -> IndexResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(tables::DN2ID)?;
            table.remove(ndn)?.is_some()
        };
        write_txn.commit()?;
        debug!("dn2id delete {} (present: {})", ndn, removed);
        Ok(removed)
    }

    // ---- Primary Store (bincode) ----

    pub fn id2entry_add(&self, entry: &Entry) -> IndexResult<()> {
        self.check_fault(FaultPoint::PrimaryStore)?;
        let bytes = bincode::serialize(entry)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::ID2ENTRY)?;
            table.insert(entry.id().get(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        debug!("id2entry add {} ({})", entry.id(), entry.dn());
        Ok(())
    }

    pub fn id2entry_get(&self, id: EntryId) -> IndexResult<Option<Entry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ID2ENTRY)?;
        match table.get(id.get())? {
            Some(val) => Ok(Some(bincode::deserialize(val.value())?)),
            None => Ok(None),
        }
    }

    pub fn id2entry_contains(&self, id: EntryId) -> IndexResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ID2ENTRY)?;
        Ok(table.get(id.get())?.is_some())
    }

    pub fn id2entry_delete(&self, id: EntryId) -> IndexResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(tables::ID2ENTRY)?;
            table.remove(id.get())?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Highest identifier with a primary record
    pub fn max_id(&self) -> IndexResult<Option<EntryId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ID2ENTRY)?;
        Ok(table.last()?.map(|(k, _)| EntryId::new(k.value())))
    }

    // ---- Parent-Child Index ----

    pub fn id2children_add(&self, parent: EntryId, child: EntryId) -> IndexResult<()> {
        self.check_fault(FaultPoint::ParentChild)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_multimap_table(tables::ID2CHILDREN)?;
            table.insert(parent.get(), child.get())?;
        }
        write_txn.commit()?;
        debug!("id2children add {} -> {}", parent, child);
        Ok(())
    }

    pub fn id2children_remove(&self, parent: EntryId, child: EntryId) -> IndexResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_multimap_table(tables::ID2CHILDREN)?;
            table.remove(parent.get(), child.get())?
        };
        write_txn.commit()?;
        Ok(removed)
    }

    pub fn children(&self, parent: EntryId) -> IndexResult<Vec<EntryId>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(tables::ID2CHILDREN)?;
        let mut result = Vec::new();
        for child in table.get(parent.get())? {
            result.push(EntryId::new(child?.value()));
        }
        Ok(result)
    }

    // ---- Attribute Indexes ----

    /// Index every value of every indexed attribute the entry carries.
    ///
    /// Each attribute index is written in its own transaction; a failure
    /// leaves the indexes written before it in place.
    pub fn index_add_entry(&self, entry: &Entry) -> IndexResult<()> {
        for attr in entry.attributes() {
            let Some(indexed) = self.indexed.iter().find(|a| attr.is(a)) else {
                continue;
            };
            self.check_fault(FaultPoint::Attribute)?;
            let name = tables::attr_table_name(indexed);
            let write_txn = self.db.begin_write()?;
            {
                let mut table = write_txn.open_multimap_table(tables::attr_table(&name))?;
                for value in attr.normalized_values() {
                    table.insert(value.as_str(), entry.id().get())?;
                }
            }
            write_txn.commit()?;
            debug!("{} add {} values for {}", name, attr.values.len(), entry.id());
        }
        Ok(())
    }

    /// Remove the entry's id from every index its attribute values touch
    pub fn index_remove_entry(&self, entry: &Entry) -> IndexResult<()> {
        let write_txn = self.db.begin_write()?;
        for attr in entry.attributes() {
            let Some(indexed) = self.indexed.iter().find(|a| attr.is(a)) else {
                continue;
            };
            let name = tables::attr_table_name(indexed);
            let mut table = write_txn.open_multimap_table(tables::attr_table(&name))?;
            for value in attr.normalized_values() {
                table.remove(value.as_str(), entry.id().get())?;
            }
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Ids whose `attr` has a value equal to `value` (after normalization)
    pub fn index_lookup(&self, attr: &str, value: &str) -> IndexResult<Vec<EntryId>> {
        if !self.is_indexed(attr) {
            return Ok(Vec::new());
        }
        let name = tables::attr_table_name(attr);
        let value = dirstore_common::normalize_value(value);
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(tables::attr_table(&name))?;
        let mut result = Vec::new();
        for id in table.get(value.as_str())? {
            result.push(EntryId::new(id?.value()));
        }
        Ok(result)
    }

    pub fn remove_attr_record(&self, record: &AttrRecord) -> IndexResult<bool> {
        let name = tables::attr_table_name(&record.attr);
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_multimap_table(tables::attr_table(&name))?;
            table.remove(record.value.as_str(), record.id.get())?
        };
        write_txn.commit()?;
        Ok(removed)
    }

    // ---- Full scans ----

    pub fn name_records(&self) -> IndexResult<Vec<(String, EntryId)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::DN2ID)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            result.push((entry.0.value().to_string(), EntryId::new(entry.1.value())));
        }
        Ok(result)
    }

    /// Every primary record, decoded
    pub fn primary_records(&self) -> IndexResult<Vec<Entry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::ID2ENTRY)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, bytes) = entry?;
            result.push(bincode::deserialize(bytes.value())?);
        }
        Ok(result)
    }

    pub fn child_records(&self) -> IndexResult<Vec<(EntryId, EntryId)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_multimap_table(tables::ID2CHILDREN)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (parent, children) = entry?;
            let parent = EntryId::new(parent.value());
            for child in children {
                result.push((parent, EntryId::new(child?.value())));
            }
        }
        Ok(result)
    }

    pub fn attr_records(&self) -> IndexResult<Vec<AttrRecord>> {
        let read_txn = self.db.begin_read()?;
        let mut result = Vec::new();
        for attr in &self.indexed {
            let name = tables::attr_table_name(attr);
            let table = read_txn.open_multimap_table(tables::attr_table(&name))?;
            for entry in table.iter()? {
                let (value, ids) = entry?;
                let value = value.value().to_string();
                for id in ids {
                    result.push(AttrRecord {
                        attr: attr.clone(),
                        value: value.clone(),
                        id: EntryId::new(id?.value()),
                    });
                }
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirstore_common::Dn;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> IndexStore {
        IndexStore::open(
            dir.path().join("idx.redb"),
            &["objectClass".to_string(), "cn".to_string()],
        )
        .unwrap()
    }

    fn entry(id: u64, dn: &str) -> Entry {
        let mut e = Entry::new(Dn::parse(dn).unwrap())
            .with("objectClass", "person")
            .with("cn", "Alice Smith")
            .with("mail", "alice@example.com");
        e.set_id(EntryId::new(id));
        e
    }

    #[test]
    fn test_name_index() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        assert_eq!(store.dn2id("cn=alice").unwrap(), None);
        store.dn2id_add("cn=alice", EntryId::new(1)).unwrap();
        assert_eq!(store.dn2id("cn=alice").unwrap(), Some(EntryId::new(1)));

        let err = store.dn2id_add("cn=alice", EntryId::new(2)).unwrap_err();
        assert!(matches!(err, IndexError::KeyExists(_)));
        assert_eq!(store.dn2id("cn=alice").unwrap(), Some(EntryId::new(1)));

        assert!(store.dn2id_delete("cn=alice").unwrap());
        assert!(!store.dn2id_delete("cn=alice").unwrap());
    }

    #[test]
    fn test_primary_store() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        assert_eq!(store.max_id().unwrap(), None);

        let e = entry(5, "cn=alice,ou=people");
        store.id2entry_add(&e).unwrap();
        store.id2entry_add(&entry(2, "cn=bob,ou=people")).unwrap();

        assert_eq!(store.id2entry_get(EntryId::new(5)).unwrap(), Some(e));
        assert!(store.id2entry_contains(EntryId::new(2)).unwrap());
        assert_eq!(store.max_id().unwrap(), Some(EntryId::new(5)));
        assert_eq!(store.primary_records().unwrap().len(), 2);
        assert!(store.id2entry_delete(EntryId::new(5)).unwrap());
        assert_eq!(store.id2entry_get(EntryId::new(5)).unwrap(), None);
    }

    #[test]
    fn test_children_are_a_set() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.id2children_add(EntryId::ROOT, EntryId::new(1)).unwrap();
        store.id2children_add(EntryId::new(1), EntryId::new(2)).unwrap();
        store.id2children_add(EntryId::new(1), EntryId::new(3)).unwrap();
        store.id2children_add(EntryId::new(1), EntryId::new(3)).unwrap();

        let mut kids = store.children(EntryId::new(1)).unwrap();
        kids.sort();
        assert_eq!(kids, vec![EntryId::new(2), EntryId::new(3)]);
        assert_eq!(store.child_records().unwrap().len(), 3);

        assert!(store.id2children_remove(EntryId::new(1), EntryId::new(2)).unwrap());
        assert_eq!(store.children(EntryId::new(1)).unwrap(), vec![EntryId::new(3)]);
    }

    #[test]
    fn test_attribute_indexes() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let e = entry(7, "cn=alice");

        store.index_add_entry(&e).unwrap();
        assert_eq!(store.index_lookup("cn", "alice   SMITH").unwrap(), vec![EntryId::new(7)]);
        assert_eq!(store.index_lookup("OBJECTCLASS", "person").unwrap(), vec![EntryId::new(7)]);
        // mail is not indexed
        assert!(store.index_lookup("mail", "alice@example.com").unwrap().is_empty());
        assert_eq!(store.attr_records().unwrap().len(), 2);

        store.index_remove_entry(&e).unwrap();
        assert!(store.attr_records().unwrap().is_empty());
    }

    #[test]
    fn test_injected_faults_leave_tables_untouched() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        let e = entry(1, "cn=alice");

        store.faults().arm(FaultPoint::NameIndex);
        assert!(matches!(
            store.dn2id_add("cn=alice", e.id()),
            Err(IndexError::FaultInjected(FaultPoint::NameIndex))
        ));
        assert_eq!(store.dn2id("cn=alice").unwrap(), None);

        store.faults().arm(FaultPoint::Attribute);
        assert!(store.index_add_entry(&e).is_err());
        assert!(store.attr_records().unwrap().is_empty());

        store.faults().arm(FaultPoint::PrimaryStore);
        assert!(store.id2entry_add(&e).is_err());
        assert_eq!(store.id2entry_get(e.id()).unwrap(), None);

        store.faults().arm(FaultPoint::ParentChild);
        assert!(store.id2children_add(EntryId::ROOT, e.id()).is_err());
        assert!(store.children(EntryId::ROOT).unwrap().is_empty());

        assert_eq!(store.faults().triggered(), 4);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir);
            store.dn2id_add("cn=alice", EntryId::new(1)).unwrap();
            store.id2entry_add(&entry(1, "cn=alice")).unwrap();
        }
        let store = open(&dir);
        assert_eq!(store.dn2id("cn=alice").unwrap(), Some(EntryId::new(1)));
        assert_eq!(store.max_id().unwrap(), Some(EntryId::new(1)));
    }
}
