//! Backend context
//!
//! One [`Backend`] owns everything the insertion path shares: the index
//! store, the entry cache, the identifier allocator, the coarse locks and
//! the schema and access collaborators. Operations borrow it; nothing is
//! process-global.

use crate::access::{AccessControl, Permission, StaticAcl};
use crate::allocator::IdAllocator;
use crate::cache::{EntryCache, EntryReadHandle, EntryWriteHandle, Lookup};
use crate::error::{Error, Result};
use crate::lock::LockManager;
use crate::schema::{NoSchemaCheck, RequireObjectClass, SchemaChecker};
use dirstore_common::{BackendConfig, Dn, Entry, EntryId};
use dirstore_index::{FaultInjector, IndexStore};
use std::sync::Arc;
use tracing::{debug, info};

/// Attempts at loading an entry into the cache before giving up
const MAX_LOAD_ATTEMPTS: usize = 8;

/// Outcome of resolving a name to a locked entry
pub enum Resolved<H> {
    Found(H),
    /// Not present; carries the deepest existing ancestor, if any
    Missing { matched: Option<Dn> },
}

/// A directory backend instance
pub struct Backend {
    pub(crate) config: BackendConfig,
    pub(crate) suffixes: Vec<Dn>,
    pub(crate) root_dn: Option<Dn>,
    pub(crate) store: IndexStore,
    pub(crate) cache: EntryCache,
    pub(crate) ids: IdAllocator,
    pub(crate) locks: LockManager,
    pub(crate) access: Arc<dyn AccessControl>,
    pub(crate) schema: Arc<dyn SchemaChecker>,
}

impl Backend {
    /// Open the backend described by `config`
    pub fn open(config: BackendConfig) -> Result<Self> {
        Self::open_with_faults(config, Arc::new(FaultInjector::new()))
    }

    /// Open with a caller-held fault injector wired into the index store
    pub fn open_with_faults(config: BackendConfig, faults: Arc<FaultInjector>) -> Result<Self> {
        config.validate()?;
        let suffixes = config.suffix_dns()?;
        let root_dn = config.root_dn()?;

        let store =
            IndexStore::open(&config.db_path, &config.indexed_attributes)?.with_faults(faults);
        let ids = IdAllocator::after(store.max_id()?);
        let access: Arc<dyn AccessControl> = Arc::new(StaticAcl::from_config(&config.acl)?);
        let schema: Arc<dyn SchemaChecker> = if config.schema_check {
            Arc::new(RequireObjectClass)
        } else {
            Arc::new(NoSchemaCheck)
        };

        info!(
            "Backend open: {} suffix(es), next id {}, cache capacity {}, rollback {:?}",
            suffixes.len(),
            ids.peek(),
            config.cache_size,
            config.rollback
        );

        Ok(Self {
            cache: EntryCache::new(config.cache_size),
            config,
            suffixes,
            root_dn,
            store,
            ids,
            locks: LockManager::new(),
            access,
            schema,
        })
    }

    /// Replace the access control evaluator
    #[must_use]
    pub fn with_access_control(mut self, access: Arc<dyn AccessControl>) -> Self {
        debug!("access control: {}", access.name());
        self.access = access;
        self
    }

    /// Replace the schema checker
    #[must_use]
    pub fn with_schema_checker(mut self, schema: Arc<dyn SchemaChecker>) -> Self {
        debug!("schema checker: {}", schema.name());
        self.schema = schema;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &BackendConfig {
        &self.config
    }

    #[must_use]
    pub const fn store(&self) -> &IndexStore {
        &self.store
    }

    #[must_use]
    pub const fn cache(&self) -> &EntryCache {
        &self.cache
    }

    #[must_use]
    pub const fn allocator(&self) -> &IdAllocator {
        &self.ids
    }

    #[must_use]
    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    #[must_use]
    pub fn faults(&self) -> &Arc<FaultInjector> {
        self.store.faults()
    }

    /// Whether `actor` is the administrative identity
    #[must_use]
    pub fn is_admin(&self, actor: &Dn) -> bool {
        self.root_dn.as_ref().is_some_and(|root| root == actor)
    }

    /// Whether `actor` holds `permission` on `target`
    pub(crate) fn access_allowed(&self, actor: &Dn, target: &Entry, permission: Permission) -> bool {
        self.is_admin(actor) || self.access.allowed(actor, target, permission)
    }

    /// Parent name inside this backend; `None` for root-level entries
    #[must_use]
    pub fn parent_of(&self, dn: &Dn) -> Option<Dn> {
        dn.parent_within(&self.suffixes)
    }

    /// Load a committed entry from the store by name.
    ///
    /// A name record without a primary record is treated as absent: the
    /// entry is either mid-insertion or the leftover of a failed one.
    fn load(&self, dn: &Dn) -> Result<Option<Entry>> {
        let Some(id) = self.store.dn2id(dn.normalized())? else {
            return Ok(None);
        };
        Ok(self.store.id2entry_get(id)?)
    }

    /// Deepest ancestor of `dn` that exists
    pub(crate) fn matched_ancestor(&self, dn: &Dn) -> Result<Option<Dn>> {
        for ancestor in dn.ancestors() {
            if let Some(entry) = self.load(&ancestor)? {
                return Ok(Some(entry.dn().clone()));
            }
        }
        Ok(None)
    }

    fn resolve<H>(
        &self,
        dn: &Dn,
        lookup: impl Fn(&EntryCache, &str) -> Lookup<H>,
    ) -> Result<Resolved<H>> {
        for _ in 0..MAX_LOAD_ATTEMPTS {
            match lookup(&self.cache, dn.normalized()) {
                Lookup::Found(handle) => return Ok(Resolved::Found(handle)),
                Lookup::Invisible => break,
                Lookup::Absent => {
                    let Some(entry) = self.load(dn)? else {
                        break;
                    };
                    // lost a race with another loader: look again
                    if let Err(e) = self.cache.insert_committed(entry) {
                        debug!("reload of {}: {}", dn, e);
                    }
                }
            }
        }
        Ok(Resolved::Missing {
            matched: self.matched_ancestor(dn)?,
        })
    }

    /// Find an entry by name and lock it for writing
    pub fn dn2entry_w(&self, dn: &Dn) -> Result<Resolved<EntryWriteHandle>> {
        self.resolve(dn, EntryCache::lookup_for_write)
    }

    /// Find an entry by name and lock it for reading
    pub fn dn2entry_r(&self, dn: &Dn) -> Result<Resolved<EntryReadHandle>> {
        self.resolve(dn, EntryCache::lookup_for_read)
    }

    /// Snapshot of a committed entry
    pub fn get(&self, dn: &Dn) -> Result<Option<Entry>> {
        match self.dn2entry_r(dn)? {
            Resolved::Found(handle) => Ok(Some((*handle).clone())),
            Resolved::Missing { .. } => Ok(None),
        }
    }

    /// Snapshot of a committed entry, for an actor that must hold `Read`
    pub fn read_as(&self, actor: &Dn, dn: &Dn) -> Result<Option<Entry>> {
        match self.dn2entry_r(dn)? {
            Resolved::Found(handle) => {
                if !self.access_allowed(actor, &handle, Permission::Read) {
                    return Err(Error::InsufficientAccess(dn.to_string()));
                }
                Ok(Some((*handle).clone()))
            }
            Resolved::Missing { .. } => Ok(None),
        }
    }

    /// Identifiers recorded as children of `dn` (or of the root marker
    /// when `dn` is null)
    pub fn children(&self, dn: &Dn) -> Result<Vec<EntryId>> {
        if dn.is_null() {
            return Ok(self.store.children(EntryId::ROOT)?);
        }
        match self.dn2entry_r(dn)? {
            Resolved::Found(handle) => Ok(self.store.children(handle.id())?),
            Resolved::Missing { matched } => Err(Error::NoSuchObject {
                dn: dn.to_string(),
                matched: matched.map(|m| m.to_string()),
            }),
        }
    }

    /// Identifiers of entries whose `attr` carries `value`
    pub fn search_eq(&self, attr: &str, value: &str) -> Result<Vec<EntryId>> {
        Ok(self.store.index_lookup(attr, value)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use dirstore_common::ResultCode;
    use tempfile::TempDir;

    pub(crate) const ADMIN: &str = "cn=admin,dc=example,dc=com";

    pub(crate) fn config(dir: &TempDir) -> BackendConfig {
        BackendConfig {
            suffixes: vec!["dc=example,dc=com".into()],
            root_dn: Some(ADMIN.into()),
            indexed_attributes: vec!["objectClass".into(), "cn".into()],
            ..BackendConfig::with_db_path(dir.path().join("backend.redb"))
        }
    }

    pub(crate) fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    pub(crate) fn entry(name: &str, class: &str) -> Entry {
        Entry::new(dn(name)).with("objectClass", class)
    }

    #[test]
    fn test_open_empty() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::open(config(&dir)).unwrap();
        assert_eq!(backend.allocator().peek(), EntryId::FIRST);
        assert!(backend.cache().is_empty());
        assert!(backend.is_admin(&dn("CN=Admin, DC=Example, DC=Com")));
        assert!(!backend.is_admin(&dn("cn=guest")));
    }

    #[test]
    fn test_no_root_dn_means_no_admin() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::open(BackendConfig {
            root_dn: None,
            ..config(&dir)
        })
        .unwrap();
        assert!(!backend.is_admin(&dn(ADMIN)));
    }

    #[test]
    fn test_parent_of_stops_at_suffix() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::open(config(&dir)).unwrap();
        assert_eq!(backend.parent_of(&dn("dc=example,dc=com")), None);
        assert_eq!(
            backend.parent_of(&dn("ou=people,dc=example,dc=com")),
            Some(dn("dc=example,dc=com"))
        );
        assert_eq!(backend.parent_of(&dn("ou=people")), None);
    }

    #[test]
    fn test_reopen_seeds_allocator_and_loads_from_store() {
        let dir = TempDir::new().unwrap();
        let admin = dn(ADMIN);
        {
            let backend = Backend::open(config(&dir)).unwrap();
            backend
                .add(&admin, entry("dc=example,dc=com", "domain"))
                .unwrap();
            backend
                .add(&admin, entry("ou=people,dc=example,dc=com", "organizationalUnit"))
                .unwrap();
        }

        let backend = Backend::open(config(&dir)).unwrap();
        assert_eq!(backend.allocator().peek(), EntryId::new(3));
        assert!(backend.cache().is_empty());

        let people = backend
            .get(&dn("OU=People,DC=Example,DC=Com"))
            .unwrap()
            .unwrap();
        assert_eq!(people.id(), EntryId::new(2));
        assert_eq!(backend.cache().len(), 1);
        assert_eq!(
            backend.children(&dn("dc=example,dc=com")).unwrap(),
            vec![EntryId::new(2)]
        );
        assert_eq!(
            backend.search_eq("objectclass", "ORGANIZATIONALUNIT").unwrap(),
            vec![EntryId::new(2)]
        );
    }

    #[test]
    fn test_missing_entry_reports_matched() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::open(config(&dir)).unwrap();
        backend
            .add(&dn(ADMIN), entry("dc=example,dc=com", "domain"))
            .unwrap();

        let err = backend
            .children(&dn("ou=ghost,dc=example,dc=com"))
            .unwrap_err();
        assert_eq!(err.result_code(), ResultCode::NoSuchObject);
        assert_eq!(err.matched(), Some("dc=example,dc=com"));
    }

    #[test]
    fn test_read_as_checks_access() {
        let dir = TempDir::new().unwrap();
        let backend = Backend::open(config(&dir))
            .unwrap()
            .with_access_control(Arc::new(crate::access::DenyAll));
        backend
            .add(&dn(ADMIN), entry("dc=example,dc=com", "domain"))
            .unwrap();

        let suffix = dn("dc=example,dc=com");
        assert!(backend.read_as(&dn(ADMIN), &suffix).unwrap().is_some());
        let err = backend.read_as(&dn("cn=guest"), &suffix).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::InsufficientAccess);
    }
}
