use crate::error::{ReplicaError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const REPLICA_DIR: &str = ".replica";
pub const CONFIG_FILE: &str = ".replica/config.yaml";
pub const LEDGER_FILE: &str = ".replica/ledger.db";
pub const DEFAULT_LIBRARY_DIR: &str = "templates";
pub const BUNDLE_MANIFEST: &str = "bundle.yaml";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn replica_dir(root: &Path) -> PathBuf {
    root.join(REPLICA_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

/// Resolve a configured path against the project root. Absolute paths are
/// returned unchanged.
pub fn resolve(root: &Path, configured: &Path) -> PathBuf {
    if configured.is_absolute() {
        configured.to_path_buf()
    } else {
        root.join(configured)
    }
}

pub fn bundle_dir(library: &Path, name: &str, version: &str) -> PathBuf {
    library.join(name).join(version)
}

pub fn bundle_manifest(library: &Path, name: &str, version: &str) -> PathBuf {
    bundle_dir(library, name, version).join(BUNDLE_MANIFEST)
}

// ---------------------------------------------------------------------------
// Identifier validation
// ---------------------------------------------------------------------------

static TENANT_RE: OnceLock<Regex> = OnceLock::new();
static KEY_RE: OnceLock<Regex> = OnceLock::new();

fn tenant_re() -> &'static Regex {
    TENANT_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9\-]*[a-z0-9]$|^[a-z0-9]$").expect("static regex")
    })
}

fn key_re() -> &'static Regex {
    KEY_RE.get_or_init(|| Regex::new(r"^[a-z0-9][a-z0-9\-_.]*$").expect("static regex"))
}

/// Tenant ids double as ledger key prefixes, so they are restricted to slugs.
pub fn validate_tenant_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 64 || !tenant_re().is_match(id) {
        return Err(ReplicaError::InvalidTenantId(id.to_string()));
    }
    Ok(())
}

pub fn validate_logical_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 128 || !key_re().is_match(key) {
        return Err(ReplicaError::InvalidLogicalKey(key.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_tenant_ids() {
        for id in ["acme", "a", "acme-prod-2", "x1"] {
            validate_tenant_id(id).unwrap_or_else(|_| panic!("expected valid: {id}"));
        }
    }

    #[test]
    fn invalid_tenant_ids() {
        for id in ["", "-acme", "acme-", "has spaces", "ACME", "a_b", "a.b"] {
            assert!(validate_tenant_id(id).is_err(), "expected invalid: {id}");
        }
    }

    #[test]
    fn logical_keys() {
        for key in ["all-mac", "base-sec", "fv2.escrow", "wifi_corp", "1"] {
            validate_logical_key(key).unwrap_or_else(|_| panic!("expected valid: {key}"));
        }
        for key in ["", "-lead", "Upper", "sp ace", "slash/key"] {
            assert!(validate_logical_key(key).is_err(), "expected invalid: {key}");
        }
    }

    #[test]
    fn path_helpers() {
        let root = Path::new("/tmp/msp");
        assert_eq!(
            config_path(root),
            PathBuf::from("/tmp/msp/.replica/config.yaml")
        );
        assert_eq!(
            bundle_manifest(Path::new("/lib"), "baseline", "1.2.0"),
            PathBuf::from("/lib/baseline/1.2.0/bundle.yaml")
        );
        assert_eq!(
            resolve(root, Path::new("templates")),
            PathBuf::from("/tmp/msp/templates")
        );
        assert_eq!(resolve(root, Path::new("/abs")), PathBuf::from("/abs"));
    }
}
