//! Template store: versioned bundles of declarative configuration objects.
//!
//! # Library layout
//!
//! ```text
//! <library>/
//!   baseline/                 ← bundle name
//!     1.0.0/                  ← bundle version
//!       bundle.yaml           ← manifest (name, version, description)
//!       groups/all-mac.yaml   ← { key, version, payload }
//!       policies/base-sec.yaml
//! ```
//!
//! A loaded bundle carries a digest over its sorted objects. Callers can pin
//! a digest in the bundle reference (`baseline@1.0.0#sha256:…`) so a run
//! refuses to proceed if the files on disk changed underneath it.

use crate::error::{ReplicaError, Result};
use crate::hash;
use crate::io::{atomic_write, list_dirs};
use crate::paths;
use crate::types::{ObjectKey, ObjectKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// TemplateObject
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateObject {
    pub kind: ObjectKind,
    pub logical_key: String,
    pub payload: Value,
    pub version: u32,
}

impl TemplateObject {
    pub fn new(
        kind: ObjectKind,
        logical_key: impl Into<String>,
        payload: Value,
        version: u32,
    ) -> Self {
        Self {
            kind,
            logical_key: logical_key.into(),
            payload,
            version,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.kind, self.logical_key.clone())
    }

    pub fn content_hash(&self) -> String {
        hash::content_hash(&self.payload)
    }
}

/// On-disk form of a single template document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct TemplateDocument {
    key: String,
    #[serde(default = "default_object_version")]
    version: u32,
    payload: Value,
}

fn default_object_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// BundleManifest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Tenant this bundle was exported from, for golden-tenant snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl BundleManifest {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            source_tenant: None,
            created_at: Some(Utc::now()),
        }
    }
}

// ---------------------------------------------------------------------------
// BundleRef
// ---------------------------------------------------------------------------

/// Reference to a bundle: `name`, `name@version` or `name@version#sha256:…`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRef {
    pub name: String,
    pub version: Option<String>,
    pub digest: Option<String>,
}

impl BundleRef {
    pub fn parse(s: &str) -> Result<Self> {
        let (rest, digest) = match s.split_once('#') {
            Some((rest, d)) => (rest, Some(d.to_string())),
            None => (s, None),
        };
        let (name, version) = match rest.split_once('@') {
            Some((n, v)) => (n, Some(v.to_string())),
            None => (rest, None),
        };
        validate_bundle_name(name)?;
        if let Some(v) = &version {
            validate_version(v)?;
        }
        if let Some(d) = &digest {
            if !d.starts_with(hash::HASH_PREFIX) {
                return Err(ReplicaError::Template(format!(
                    "bundle digest must start with '{}': {d}",
                    hash::HASH_PREFIX
                )));
            }
            if version.is_none() {
                return Err(ReplicaError::Template(
                    "a pinned digest requires an explicit version".into(),
                ));
            }
        }
        Ok(Self {
            name: name.to_string(),
            version,
            digest,
        })
    }
}

impl fmt::Display for BundleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(v) = &self.version {
            write!(f, "@{v}")?;
        }
        if let Some(d) = &self.digest {
            write!(f, "#{d}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for BundleRef {
    type Err = ReplicaError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_bundle_name(name: &str) -> Result<()> {
    paths::validate_logical_key(name)
        .map_err(|_| ReplicaError::Template(format!("invalid bundle name '{name}'")))
}

fn validate_version(version: &str) -> Result<()> {
    let ok = !version.is_empty()
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        && !version.starts_with('.');
    if !ok {
        return Err(ReplicaError::Template(format!(
            "invalid bundle version '{version}'"
        )));
    }
    Ok(())
}

/// Numeric-aware comparison of dotted versions: `1.10.0` > `1.9.3`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(x), Some(y)) => {
                let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
                    (Ok(nx), Ok(ny)) => nx.cmp(&ny),
                    _ => x.cmp(y),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// LoadedBundle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedBundle {
    pub manifest: BundleManifest,
    /// Content hash over the sorted object list.
    pub digest: String,
    /// Sorted by (kind rank, logical key).
    pub objects: Vec<TemplateObject>,
}

impl LoadedBundle {
    pub fn reference(&self) -> BundleRef {
        BundleRef {
            name: self.manifest.name.clone(),
            version: Some(self.manifest.version.clone()),
            digest: Some(self.digest.clone()),
        }
    }

    pub fn count_by_kind(&self) -> Vec<(ObjectKind, usize)> {
        ObjectKind::all()
            .iter()
            .map(|k| (*k, self.objects.iter().filter(|o| o.kind == *k).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BundleSummary {
    pub name: String,
    /// Ascending.
    pub versions: Vec<String>,
}

// ---------------------------------------------------------------------------
// Ordering and validation
// ---------------------------------------------------------------------------

/// Sort into the deterministic (kind rank, logical key) order.
pub fn sort_objects(objects: &mut [TemplateObject]) {
    objects.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.logical_key.cmp(&b.logical_key))
    });
}

/// Reject invalid keys, non-object payloads, version 0 and duplicate logical
/// keys within one kind. Duplicates are a hard failure: two documents for
/// the same key would make the application order ambiguous.
pub fn validate_objects(objects: &[TemplateObject]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for obj in objects {
        paths::validate_logical_key(&obj.logical_key)?;
        if !obj.payload.is_object() {
            return Err(ReplicaError::Template(format!(
                "{}: payload must be a mapping",
                obj.key()
            )));
        }
        if obj.version == 0 {
            return Err(ReplicaError::Template(format!(
                "{}: version must be at least 1",
                obj.key()
            )));
        }
        if !seen.insert(obj.key()) {
            return Err(ReplicaError::DuplicateKey {
                kind: obj.kind.to_string(),
                key: obj.logical_key.clone(),
            });
        }
    }
    Ok(())
}

/// Digest of an already sorted object list.
pub fn bundle_digest(objects: &[TemplateObject]) -> String {
    let items: Vec<Value> = objects
        .iter()
        .map(|o| {
            serde_json::json!({
                "kind": o.kind.as_str(),
                "key": o.logical_key,
                "version": o.version,
                "hash": o.content_hash(),
            })
        })
        .collect();
    hash::content_hash(&Value::Array(items))
}

// ---------------------------------------------------------------------------
// TemplateStore
// ---------------------------------------------------------------------------

pub struct TemplateStore {
    library: PathBuf,
}

impl TemplateStore {
    pub fn new(library: impl Into<PathBuf>) -> Self {
        Self {
            library: library.into(),
        }
    }

    pub fn library(&self) -> &Path {
        &self.library
    }

    /// All bundles in the library with their versions.
    pub fn list(&self) -> Result<Vec<BundleSummary>> {
        let mut out = Vec::new();
        for dir in list_dirs(&self.library)? {
            let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            let mut versions: Vec<String> = list_dirs(&dir)?
                .iter()
                .filter(|v| v.join(paths::BUNDLE_MANIFEST).exists())
                .filter_map(|v| v.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            if versions.is_empty() {
                continue;
            }
            versions.sort_by(|a, b| compare_versions(a, b));
            out.push(BundleSummary { name, versions });
        }
        Ok(out)
    }

    /// Highest available version of `name`.
    pub fn latest_version(&self, name: &str) -> Result<String> {
        self.list()?
            .into_iter()
            .find(|b| b.name == name)
            .and_then(|b| b.versions.last().cloned())
            .ok_or_else(|| ReplicaError::BundleNotFound(name.to_string()))
    }

    /// Load, validate and sort a bundle.
    pub fn load(&self, bundle: &BundleRef) -> Result<LoadedBundle> {
        let version = match &bundle.version {
            Some(v) => v.clone(),
            None => self.latest_version(&bundle.name)?,
        };
        let dir = paths::bundle_dir(&self.library, &bundle.name, &version);
        let manifest_path = dir.join(paths::BUNDLE_MANIFEST);
        if !manifest_path.exists() {
            return Err(ReplicaError::BundleNotFound(format!(
                "{}@{version}",
                bundle.name
            )));
        }

        let manifest: BundleManifest = serde_yaml::from_str(&std::fs::read_to_string(
            &manifest_path,
        )?)
        .map_err(|e| ReplicaError::Template(format!("{}: {e}", manifest_path.display())))?;
        if manifest.name != bundle.name || manifest.version != version {
            return Err(ReplicaError::Template(format!(
                "manifest declares {}@{} but lives at {}@{version}",
                manifest.name, manifest.version, bundle.name
            )));
        }

        let mut objects = Vec::new();
        for kind_dir in list_dirs(&dir)? {
            let dir_name = kind_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let kind = ObjectKind::from_dir_name(&dir_name).ok_or_else(|| {
                ReplicaError::Template(format!("unknown kind directory '{dir_name}'"))
            })?;
            objects.extend(load_kind_dir(&kind_dir, kind)?);
        }

        validate_objects(&objects)?;
        sort_objects(&mut objects);
        let digest = bundle_digest(&objects);

        if let Some(expected) = &bundle.digest {
            if *expected != digest {
                return Err(ReplicaError::DigestMismatch {
                    bundle: format!("{}@{version}", bundle.name),
                    expected: expected.clone(),
                    actual: digest,
                });
            }
        }

        Ok(LoadedBundle {
            manifest,
            digest,
            objects,
        })
    }

    /// Write a new bundle version. Refuses to overwrite an existing version;
    /// published bundles are immutable.
    pub fn write_bundle(
        &self,
        manifest: &BundleManifest,
        objects: &[TemplateObject],
    ) -> Result<PathBuf> {
        validate_bundle_name(&manifest.name)?;
        validate_version(&manifest.version)?;
        validate_objects(objects)?;

        let dir = paths::bundle_dir(&self.library, &manifest.name, &manifest.version);
        if dir.join(paths::BUNDLE_MANIFEST).exists() {
            return Err(ReplicaError::Template(format!(
                "bundle {}@{} already exists",
                manifest.name, manifest.version
            )));
        }

        for obj in objects {
            let doc = TemplateDocument {
                key: obj.logical_key.clone(),
                version: obj.version,
                payload: obj.payload.clone(),
            };
            let path = dir
                .join(obj.kind.dir_name())
                .join(format!("{}.yaml", obj.logical_key));
            atomic_write(&path, serde_yaml::to_string(&doc)?.as_bytes())?;
        }
        atomic_write(
            &dir.join(paths::BUNDLE_MANIFEST),
            serde_yaml::to_string(manifest)?.as_bytes(),
        )?;
        Ok(dir)
    }
}

fn load_kind_dir(dir: &Path, kind: ObjectKind) -> Result<Vec<TemplateObject>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml");
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();

    let mut out = Vec::with_capacity(files.len());
    for path in files {
        let text = std::fs::read_to_string(&path)?;
        let doc: TemplateDocument = serde_yaml::from_str(&text)
            .map_err(|e| ReplicaError::Template(format!("{}: {e}", path.display())))?;
        out.push(TemplateObject::new(kind, doc.key, doc.payload, doc.version));
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &Path, rel: &str, body: &str) {
        let p = dir.join(rel);
        std::fs::create_dir_all(p.parent().unwrap()).unwrap();
        std::fs::write(p, body).unwrap();
    }

    fn baseline(lib: &Path) {
        write(lib, "baseline/1.0.0/bundle.yaml", "name: baseline\nversion: 1.0.0\n");
        write(
            lib,
            "baseline/1.0.0/policies/base-sec.yaml",
            "key: base-sec\npayload:\n  name: Base Security\n  scope: all-mac\n",
        );
        write(
            lib,
            "baseline/1.0.0/groups/all-mac.yaml",
            "key: all-mac\nversion: 2\npayload:\n  name: All Macs\n",
        );
        write(
            lib,
            "baseline/1.0.0/groups/all-ipad.yml",
            "key: all-ipad\npayload:\n  name: All iPads\n",
        );
    }

    #[test]
    fn bundle_ref_parse_forms() {
        let r = BundleRef::parse("baseline").unwrap();
        assert_eq!(r.name, "baseline");
        assert!(r.version.is_none());

        let r = BundleRef::parse("baseline@1.2.0").unwrap();
        assert_eq!(r.version.as_deref(), Some("1.2.0"));

        let r = BundleRef::parse("baseline@1.2.0#sha256:abc").unwrap();
        assert_eq!(r.digest.as_deref(), Some("sha256:abc"));
        assert_eq!(r.to_string(), "baseline@1.2.0#sha256:abc");

        assert!(BundleRef::parse("Bad Name").is_err());
        assert!(BundleRef::parse("baseline@../x").is_err());
        assert!(BundleRef::parse("baseline#sha256:abc").is_err());
        assert!(BundleRef::parse("baseline@1#md5:abc").is_err());
    }

    #[test]
    fn version_compare_is_numeric() {
        assert_eq!(compare_versions("1.10.0", "1.9.3"), Ordering::Greater);
        assert_eq!(compare_versions("2", "2.0"), Ordering::Less);
        assert_eq!(compare_versions("1.0.0", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn load_sorts_by_kind_then_key() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        let store = TemplateStore::new(dir.path());
        let bundle = store.load(&BundleRef::parse("baseline").unwrap()).unwrap();

        let keys: Vec<String> = bundle.objects.iter().map(|o| o.key().to_string()).collect();
        assert_eq!(
            keys,
            vec!["group/all-ipad", "group/all-mac", "policy/base-sec"]
        );
        assert_eq!(bundle.objects[1].version, 2);
        assert_eq!(bundle.objects[0].version, 1);
        assert_eq!(bundle.manifest.version, "1.0.0");
    }

    #[test]
    fn load_is_deterministic() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        let store = TemplateStore::new(dir.path());
        let r = BundleRef::parse("baseline@1.0.0").unwrap();
        let a = store.load(&r).unwrap();
        let b = store.load(&r).unwrap();
        assert_eq!(a.objects, b.objects);
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn latest_version_is_selected() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        write(dir.path(), "baseline/1.10.0/bundle.yaml", "name: baseline\nversion: 1.10.0\n");
        write(dir.path(), "baseline/1.9.0/bundle.yaml", "name: baseline\nversion: 1.9.0\n");
        let store = TemplateStore::new(dir.path());
        assert_eq!(store.latest_version("baseline").unwrap(), "1.10.0");

        let listed = store.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].versions, vec!["1.0.0", "1.9.0", "1.10.0"]);
    }

    #[test]
    fn duplicate_key_within_kind_is_rejected() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        write(
            dir.path(),
            "baseline/1.0.0/groups/copy.yaml",
            "key: all-mac\npayload:\n  name: Duplicate\n",
        );
        let store = TemplateStore::new(dir.path());
        let err = store
            .load(&BundleRef::parse("baseline@1.0.0").unwrap())
            .unwrap_err();
        assert!(matches!(err, ReplicaError::DuplicateKey { .. }), "{err}");
        assert!(err.is_template_error());
    }

    #[test]
    fn same_key_in_different_kinds_is_allowed() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        write(
            dir.path(),
            "baseline/1.0.0/profiles/all-mac.yaml",
            "key: all-mac\npayload:\n  name: Mac Profile\n",
        );
        let store = TemplateStore::new(dir.path());
        let bundle = store.load(&BundleRef::parse("baseline").unwrap()).unwrap();
        assert_eq!(bundle.objects.len(), 4);
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        write(
            dir.path(),
            "baseline/1.0.0/profiles/wifi.yaml",
            "key: wifi\npayload: just-a-string\n",
        );
        let store = TemplateStore::new(dir.path());
        let err = store.load(&BundleRef::parse("baseline").unwrap()).unwrap_err();
        assert!(err.to_string().contains("payload must be a mapping"), "{err}");
    }

    #[test]
    fn unknown_field_and_kind_are_rejected() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        write(
            dir.path(),
            "baseline/1.0.0/groups/typo.yaml",
            "key: typo\npaylod:\n  name: x\n",
        );
        let store = TemplateStore::new(dir.path());
        assert!(store.load(&BundleRef::parse("baseline").unwrap()).is_err());

        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        write(
            dir.path(),
            "baseline/1.0.0/scripts/a.yaml",
            "key: a\npayload:\n  x: 1\n",
        );
        let store = TemplateStore::new(dir.path());
        let err = store.load(&BundleRef::parse("baseline").unwrap()).unwrap_err();
        assert!(err.to_string().contains("unknown kind directory"), "{err}");
    }

    #[test]
    fn pinned_digest_is_enforced() {
        let dir = TempDir::new().unwrap();
        baseline(dir.path());
        let store = TemplateStore::new(dir.path());
        let loaded = store.load(&BundleRef::parse("baseline@1.0.0").unwrap()).unwrap();

        let pinned = loaded.reference();
        assert!(store.load(&pinned).is_ok());

        write(
            dir.path(),
            "baseline/1.0.0/groups/all-mac.yaml",
            "key: all-mac\nversion: 2\npayload:\n  name: Edited\n",
        );
        let err = store.load(&pinned).unwrap_err();
        assert!(matches!(err, ReplicaError::DigestMismatch { .. }), "{err}");
    }

    #[test]
    fn manifest_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "baseline/2.0.0/bundle.yaml", "name: other\nversion: 2.0.0\n");
        let store = TemplateStore::new(dir.path());
        assert!(store.load(&BundleRef::parse("baseline@2.0.0").unwrap()).is_err());
    }

    #[test]
    fn missing_bundle_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = TemplateStore::new(dir.path());
        let err = store.load(&BundleRef::parse("nope").unwrap()).unwrap_err();
        assert!(matches!(err, ReplicaError::BundleNotFound(_)));
    }

    #[test]
    fn write_bundle_then_load() {
        let dir = TempDir::new().unwrap();
        let store = TemplateStore::new(dir.path());
        let mut manifest = BundleManifest::new("golden", "1");
        manifest.source_tenant = Some("acme".into());
        let objects = vec![
            TemplateObject::new(ObjectKind::Policy, "base-sec", json!({"name": "Base"}), 1),
            TemplateObject::new(ObjectKind::Group, "all-mac", json!({"name": "All Macs"}), 1),
        ];
        store.write_bundle(&manifest, &objects).unwrap();

        let loaded = store.load(&BundleRef::parse("golden@1").unwrap()).unwrap();
        assert_eq!(loaded.objects.len(), 2);
        assert_eq!(loaded.objects[0].kind, ObjectKind::Group);
        assert_eq!(loaded.manifest.source_tenant.as_deref(), Some("acme"));

        // Published versions are immutable.
        assert!(store.write_bundle(&manifest, &objects).is_err());
    }
}
