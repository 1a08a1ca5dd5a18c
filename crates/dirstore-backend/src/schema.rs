//! Schema checking of incoming entries

use dirstore_common::{Entry, OBJECT_CLASS};
use tracing::debug;

/// Decides whether an entry's object classes and attributes are acceptable
pub trait SchemaChecker: Send + Sync {
    fn name(&self) -> &str;

    fn check(&self, entry: &Entry) -> bool;
}

/// Requires at least one non-empty `objectClass` value
pub struct RequireObjectClass;

impl SchemaChecker for RequireObjectClass {
    fn name(&self) -> &'static str {
        "require-object-class"
    }

    fn check(&self, entry: &Entry) -> bool {
        let ok = entry.values(OBJECT_CLASS).iter().any(|v| !v.is_empty());
        if !ok {
            debug!("{} has no {}", entry.dn(), OBJECT_CLASS);
        }
        ok
    }
}

/// Accepts every entry
pub struct NoSchemaCheck;

impl SchemaChecker for NoSchemaCheck {
    fn name(&self) -> &'static str {
        "none"
    }

    fn check(&self, _entry: &Entry) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirstore_common::Dn;

    #[test]
    fn test_require_object_class() {
        let dn = Dn::parse("cn=alice,ou=people").unwrap();
        let bare = Entry::new(dn.clone()).with("cn", "alice");
        let typed = bare.clone().with("objectClass", "person");
        let empty = bare.clone().with("objectClass", "");

        assert!(!RequireObjectClass.check(&bare));
        assert!(RequireObjectClass.check(&typed));
        assert!(!RequireObjectClass.check(&empty));
        assert!(NoSchemaCheck.check(&bare));
    }
}
