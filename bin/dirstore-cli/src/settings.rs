//! Configuration loading
//!
//! Sources, lowest precedence first: built-in defaults, the TOML config
//! file, `DIRSTORE__*` environment variables (e.g.
//! `DIRSTORE__CACHE_SIZE=5000`), then command-line overrides applied by the
//! caller.

use anyhow::{Context, Result};
use dirstore_common::BackendConfig;
use std::path::Path;

/// Load the backend configuration. A missing file is only an error when
/// the path was given explicitly.
pub fn load(path: &str, explicit: bool) -> Result<BackendConfig> {
    let exists = Path::new(path).exists();
    if explicit && !exists {
        anyhow::bail!("config file {path} not found");
    }

    let config = config::Config::builder()
        .add_source(config::File::with_name(path).required(false))
        .add_source(
            config::Environment::with_prefix("DIRSTORE")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("loading configuration from {path}"))?;

    let backend: BackendConfig = config
        .try_deserialize()
        .context("parsing backend configuration")?;
    backend.validate()?;
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirstore_common::RollbackPolicy;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("backend.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/tmp/dirstore-test.redb"
suffixes = ["dc=example,dc=com"]
root_dn = "cn=admin,dc=example,dc=com"
cache_size = 50
rollback = "full"

[[acl]]
subtree = "ou=people,dc=example,dc=com"
actor = "*"
permission = "read"
"#,
        )
        .unwrap();

        let config = load(path.to_str().unwrap(), true).unwrap();
        assert_eq!(config.suffixes, vec!["dc=example,dc=com"]);
        assert_eq!(config.cache_size, 50);
        assert_eq!(config.rollback, RollbackPolicy::Full);
        assert_eq!(config.acl.len(), 1);
        // untouched fields keep their defaults
        assert!(config.schema_check);
        assert_eq!(config.indexed_attributes, vec!["objectClass"]);
    }

    #[test]
    fn test_missing_file() {
        assert!(load("/nonexistent/dirstore.toml", true).is_err());
        let config = load("/nonexistent/dirstore.toml", false).unwrap();
        assert_eq!(config.cache_size, BackendConfig::default().cache_size);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "root_dn = \"not a dn\"\n").unwrap();
        assert!(load(path.to_str().unwrap(), true).is_err());
    }
}
