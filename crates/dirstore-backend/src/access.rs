//! Access control
//!
//! The insertion path asks one question: may this actor create children
//! beneath this parent entry? Implementations answer it through
//! [`AccessControl`]. The administrative identity is handled separately by
//! the backend and never reaches the evaluator.

use crate::error::Result;
use dirstore_common::{ANY_ACTOR, AclRuleConfig, Dn, Entry, PermissionConfig};
use tracing::debug;

/// Rights checked by the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Permission {
    Read,
    /// Add entries immediately beneath the target
    WriteChildren,
}

impl From<PermissionConfig> for Permission {
    fn from(value: PermissionConfig) -> Self {
        match value {
            PermissionConfig::Read => Self::Read,
            PermissionConfig::WriteChildren => Self::WriteChildren,
        }
    }
}

/// Access decision point
pub trait AccessControl: Send + Sync {
    fn name(&self) -> &str;

    /// Whether `actor` holds `permission` on `target`
    fn allowed(&self, actor: &Dn, target: &Entry, permission: Permission) -> bool;
}

/// Grants everything
pub struct AllowAll;

impl AccessControl for AllowAll {
    fn name(&self) -> &'static str {
        "allow-all"
    }

    fn allowed(&self, _actor: &Dn, _target: &Entry, _permission: Permission) -> bool {
        true
    }
}

/// Grants nothing
pub struct DenyAll;

impl AccessControl for DenyAll {
    fn name(&self) -> &'static str {
        "deny-all"
    }

    fn allowed(&self, _actor: &Dn, _target: &Entry, _permission: Permission) -> bool {
        false
    }
}

struct AclRule {
    subtree: Dn,
    /// `None` matches any actor
    actor: Option<Dn>,
    permission: Permission,
}

impl AclRule {
    fn matches(&self, actor: &Dn, target: &Entry, permission: Permission) -> bool {
        self.permission == permission
            && target.dn().is_within(&self.subtree)
            && self.actor.as_ref().is_none_or(|a| a == actor)
    }
}

/// Rule list from configuration; the first matching rule grants access,
/// no match denies
pub struct StaticAcl {
    rules: Vec<AclRule>,
}

impl StaticAcl {
    pub fn from_config(rules: &[AclRuleConfig]) -> Result<Self> {
        let rules = rules
            .iter()
            .map(|rule| {
                let actor = if rule.actor == ANY_ACTOR {
                    None
                } else {
                    Some(Dn::parse(&rule.actor).map_err(dirstore_common::Error::from)?)
                };
                Ok(AclRule {
                    subtree: Dn::parse(&rule.subtree).map_err(dirstore_common::Error::from)?,
                    actor,
                    permission: rule.permission.into(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl AccessControl for StaticAcl {
    fn name(&self) -> &'static str {
        "static-acl"
    }

    fn allowed(&self, actor: &Dn, target: &Entry, permission: Permission) -> bool {
        let granted = self
            .rules
            .iter()
            .any(|rule| rule.matches(actor, target, permission));
        if !granted {
            debug!(
                "no rule grants {:?} on {} to {}",
                permission,
                target.dn(),
                actor
            );
        }
        granted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dn(s: &str) -> Dn {
        Dn::parse(s).unwrap()
    }

    fn rule(subtree: &str, actor: &str, permission: PermissionConfig) -> AclRuleConfig {
        AclRuleConfig {
            subtree: subtree.into(),
            actor: actor.into(),
            permission,
        }
    }

    #[test]
    fn test_allow_and_deny_all() {
        let target = Entry::new(dn("ou=people"));
        let actor = dn("cn=anyone");
        assert!(AllowAll.allowed(&actor, &target, Permission::WriteChildren));
        assert!(!DenyAll.allowed(&actor, &target, Permission::Read));
    }

    #[test]
    fn test_static_acl_subtree_and_actor() {
        let acl = StaticAcl::from_config(&[
            rule("ou=people", "cn=hr,ou=staff", PermissionConfig::WriteChildren),
            rule("ou=people", ANY_ACTOR, PermissionConfig::Read),
        ])
        .unwrap();
        assert_eq!(acl.len(), 2);

        let people = Entry::new(dn("ou=people"));
        let nested = Entry::new(dn("ou=interns,ou=people"));
        let groups = Entry::new(dn("ou=groups"));
        let hr = dn("CN=HR, OU=Staff");
        let guest = dn("cn=guest");

        assert!(acl.allowed(&hr, &people, Permission::WriteChildren));
        assert!(acl.allowed(&hr, &nested, Permission::WriteChildren));
        assert!(!acl.allowed(&hr, &groups, Permission::WriteChildren));
        assert!(!acl.allowed(&guest, &people, Permission::WriteChildren));
        assert!(acl.allowed(&guest, &people, Permission::Read));
    }

    #[test]
    fn test_static_acl_rejects_bad_rule() {
        assert!(
            StaticAcl::from_config(&[rule("ou=people", "bogus", PermissionConfig::Read)]).is_err()
        );
    }
}
