use crate::error::{ReplicaError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Capped exponential back-off for transient remote failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Spread delays by up to ±25%.
    #[serde(default)]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_factor() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            factor: default_factor(),
            max_delay_ms: default_max_delay_ms(),
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let raw = self.base_delay_ms as f64 * self.factor.powi(retry as i32 - 1);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

// ---------------------------------------------------------------------------
// RemoteConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_token_path")]
    pub token_path: String,
    /// Prefix of every resource collection, e.g. `/api/v1`.
    #[serde(default = "default_api_prefix")]
    pub api_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Field carrying the remote id in list and create responses.
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// Field used to adopt untracked live objects in authoritative mode.
    /// `None` disables adoption.
    #[serde(default = "default_key_field")]
    pub key_field: Option<String>,
    /// Server-assigned fields ignored when hashing live payloads.
    #[serde(default = "default_volatile_fields")]
    pub volatile_fields: Vec<String>,
}

fn default_token_path() -> String {
    "/api/oauth/token".to_string()
}

fn default_api_prefix() -> String {
    "/api/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_page_size() -> u32 {
    100
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_key_field() -> Option<String> {
    Some("name".to_string())
}

fn default_volatile_fields() -> Vec<String> {
    ["id", "created_at", "updated_at", "etag"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            token_path: default_token_path(),
            api_prefix: default_api_prefix(),
            request_timeout_secs: default_timeout_secs(),
            page_size: default_page_size(),
            id_field: default_id_field(),
            key_field: default_key_field(),
            volatile_fields: default_volatile_fields(),
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

// ---------------------------------------------------------------------------
// ConcurrencyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Tenants processed at the same time.
    #[serde(default = "default_max_tenants")]
    pub max_tenants: usize,
}

fn default_max_tenants() -> usize {
    4
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_tenants: default_max_tenants(),
        }
    }
}

// ---------------------------------------------------------------------------
// TenantTarget / Credentials
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTarget {
    pub tenant_id: String,
    pub base_url: String,
    /// `env:PREFIX` or `file:path/to/credentials.yaml`.
    pub credential_ref: String,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

impl TenantTarget {
    /// Resolve `credential_ref` into concrete credentials.
    ///
    /// `lookup` supplies environment values; callers pass `std::env::var`
    /// at the edge of the program so nothing below reads the environment.
    pub fn resolve_credentials(
        &self,
        root: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Credentials> {
        let fail = |reason: String| ReplicaError::Credentials {
            tenant: self.tenant_id.clone(),
            reason,
        };
        if let Some(prefix) = self.credential_ref.strip_prefix("env:") {
            let id_var = format!("{prefix}_CLIENT_ID");
            let secret_var = format!("{prefix}_CLIENT_SECRET");
            let client_id = lookup(&id_var).ok_or_else(|| fail(format!("{id_var} is not set")))?;
            let client_secret =
                lookup(&secret_var).ok_or_else(|| fail(format!("{secret_var} is not set")))?;
            return Ok(Credentials {
                client_id,
                client_secret,
            });
        }
        if let Some(file) = self.credential_ref.strip_prefix("file:") {
            let path = paths::resolve(root, Path::new(file));
            let data = std::fs::read_to_string(&path)
                .map_err(|e| fail(format!("{}: {e}", path.display())))?;
            return serde_yaml::from_str(&data).map_err(|e| fail(format!("{}: {e}", path.display())));
        }
        Err(fail(format!(
            "unsupported credential_ref '{}' (expected env:PREFIX or file:PATH)",
            self.credential_ref
        )))
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Template library directory, relative to the project root.
    #[serde(default = "default_library")]
    pub library: PathBuf,
    #[serde(default = "default_ledger")]
    pub ledger: PathBuf,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub tenants: Vec<TenantTarget>,
}

fn default_version() -> u32 {
    1
}

fn default_library() -> PathBuf {
    PathBuf::from(paths::DEFAULT_LIBRARY_DIR)
}

fn default_ledger() -> PathBuf {
    PathBuf::from(paths::LEDGER_FILE)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            library: default_library(),
            ledger: default_ledger(),
            concurrency: ConcurrencyConfig::default(),
            retry: RetryPolicy::default(),
            remote: RemoteConfig::default(),
            tenants: Vec::new(),
        }
    }
}

impl Config {
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(ReplicaError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn library_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.library)
    }

    pub fn ledger_path(&self, root: &Path) -> PathBuf {
        paths::resolve(root, &self.ledger)
    }

    pub fn tenant(&self, id: &str) -> Result<&TenantTarget> {
        self.tenants
            .iter()
            .find(|t| t.tenant_id == id)
            .ok_or_else(|| ReplicaError::TenantNotFound(id.to_string()))
    }

    /// Tenants selected by id, in the order given; all tenants when `ids`
    /// is empty. Repeated ids are selected once. Every selected id must be
    /// a valid tenant id, so nothing is sent to a tenant the ledger would
    /// refuse to record.
    pub fn select_tenants(&self, ids: &[String]) -> Result<Vec<TenantTarget>> {
        let selected: Vec<TenantTarget> = if ids.is_empty() {
            self.tenants.clone()
        } else {
            ids.iter()
                .map(|id| self.tenant(id).cloned())
                .collect::<Result<_>>()?
        };
        let mut seen = std::collections::BTreeSet::new();
        let mut out = Vec::with_capacity(selected.len());
        for target in selected {
            paths::validate_tenant_id(&target.tenant_id)?;
            if seen.insert(target.tenant_id.clone()) {
                out.push(target);
            }
        }
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let mut push = |level: WarnLevel, message: String| {
            warnings.push(ConfigWarning { level, message })
        };

        // 1. Tenant ids: valid slugs, unique.
        let mut seen = std::collections::BTreeSet::new();
        for t in &self.tenants {
            if paths::validate_tenant_id(&t.tenant_id).is_err() {
                push(
                    WarnLevel::Error,
                    format!("invalid tenant id '{}'", t.tenant_id),
                );
            }
            if !seen.insert(t.tenant_id.as_str()) {
                push(
                    WarnLevel::Error,
                    format!("tenant '{}' is listed more than once", t.tenant_id),
                );
            }
            if !(t.base_url.starts_with("https://") || t.base_url.starts_with("http://")) {
                push(
                    WarnLevel::Error,
                    format!("tenant '{}' has a base_url without http(s) scheme", t.tenant_id),
                );
            } else if t.base_url.starts_with("http://") {
                push(
                    WarnLevel::Warning,
                    format!("tenant '{}' uses plain http", t.tenant_id),
                );
            }
            if !(t.credential_ref.starts_with("env:") || t.credential_ref.starts_with("file:")) {
                push(
                    WarnLevel::Error,
                    format!(
                        "tenant '{}' has unsupported credential_ref '{}'",
                        t.tenant_id, t.credential_ref
                    ),
                );
            }
        }

        // 2. Concurrency and retry bounds.
        if self.concurrency.max_tenants == 0 {
            push(
                WarnLevel::Error,
                "concurrency.max_tenants must be at least 1".to_string(),
            );
        } else if self.concurrency.max_tenants > 16 {
            push(
                WarnLevel::Warning,
                format!(
                    "concurrency.max_tenants={} may exceed vendor rate limits",
                    self.concurrency.max_tenants
                ),
            );
        }
        if self.retry.max_attempts == 0 {
            push(
                WarnLevel::Error,
                "retry.max_attempts must be at least 1".to_string(),
            );
        } else if self.retry.max_attempts > 10 {
            push(
                WarnLevel::Warning,
                format!(
                    "retry.max_attempts={} (>10 is unusual)",
                    self.retry.max_attempts
                ),
            );
        }
        if self.retry.factor < 1.0 {
            push(
                WarnLevel::Warning,
                format!("retry.factor={} shrinks delays between attempts", self.retry.factor),
            );
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            push(
                WarnLevel::Warning,
                "retry.base_delay_ms exceeds retry.max_delay_ms".to_string(),
            );
        }
        if self.remote.request_timeout_secs == 0 {
            push(
                WarnLevel::Error,
                "remote.request_timeout_secs must be at least 1".to_string(),
            );
        }
        if self.remote.page_size == 0 {
            push(
                WarnLevel::Error,
                "remote.page_size must be at least 1".to_string(),
            );
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tenant(id: &str) -> TenantTarget {
        TenantTarget {
            tenant_id: id.into(),
            base_url: format!("https://{id}.example.com"),
            credential_ref: format!("env:{}", id.to_uppercase().replace('-', "_")),
        }
    }

    #[test]
    fn default_config_roundtrip() {
        let cfg = Config::default();
        let yaml = serde_yaml::to_string(&cfg).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.concurrency.max_tenants, 4);
        assert_eq!(parsed.retry, RetryPolicy::default());
    }

    #[test]
    fn partial_config_fills_defaults() {
        let yaml = "tenants:\n  - tenant_id: acme\n    base_url: https://acme.example.com\n    credential_ref: env:ACME\nretry:\n  max_attempts: 3\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay_ms, 500);
        assert_eq!(cfg.library, PathBuf::from("templates"));
        assert_eq!(cfg.remote.key_field.as_deref(), Some("name"));
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff(20), Duration::from_millis(30_000));
    }

    #[test]
    fn load_missing_is_not_initialized() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            Config::load(dir.path()),
            Err(ReplicaError::NotInitialized)
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut cfg = Config::default();
        cfg.tenants.push(tenant("acme"));
        cfg.save(dir.path()).unwrap();
        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.tenants, cfg.tenants);
        assert_eq!(
            loaded.ledger_path(dir.path()),
            dir.path().join(".replica/ledger.db")
        );
    }

    #[test]
    fn select_tenants_preserves_order_and_rejects_unknown() {
        let mut cfg = Config::default();
        cfg.tenants = vec![tenant("a"), tenant("b"), tenant("c")];
        assert_eq!(cfg.select_tenants(&[]).unwrap().len(), 3);
        let picked = cfg
            .select_tenants(&["c".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(picked[0].tenant_id, "c");
        assert_eq!(picked[1].tenant_id, "a");
        assert!(matches!(
            cfg.select_tenants(&["zzz".to_string()]),
            Err(ReplicaError::TenantNotFound(_))
        ));
    }

    #[test]
    fn select_tenants_drops_repeated_ids() {
        let mut cfg = Config::default();
        cfg.tenants = vec![tenant("a"), tenant("b"), tenant("a")];
        let all: Vec<String> = cfg
            .select_tenants(&[])
            .unwrap()
            .into_iter()
            .map(|t| t.tenant_id)
            .collect();
        assert_eq!(all, ["a", "b"]);

        let picked = cfg
            .select_tenants(&["b".to_string(), "a".to_string(), "b".to_string()])
            .unwrap();
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].tenant_id, "b");
        assert_eq!(picked[1].tenant_id, "a");
    }

    #[test]
    fn select_tenants_rejects_invalid_ids() {
        let mut cfg = Config::default();
        cfg.tenants = vec![TenantTarget {
            tenant_id: "Acme".into(),
            base_url: "https://acme.example.com".into(),
            credential_ref: "env:ACME".into(),
        }];
        assert!(matches!(
            cfg.select_tenants(&[]),
            Err(ReplicaError::InvalidTenantId(_))
        ));
        assert!(matches!(
            cfg.select_tenants(&["Acme".to_string()]),
            Err(ReplicaError::InvalidTenantId(_))
        ));
    }

    #[test]
    fn validate_flags_bad_tenants() {
        let mut cfg = Config::default();
        cfg.tenants = vec![
            tenant("acme"),
            tenant("acme"),
            TenantTarget {
                tenant_id: "Bad Id".into(),
                base_url: "ftp://x".into(),
                credential_ref: "vault:x".into(),
            },
        ];
        let warnings = cfg.validate();
        let errors: Vec<_> = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .map(|w| w.message.as_str())
            .collect();
        assert!(errors.iter().any(|m| m.contains("more than once")));
        assert!(errors.iter().any(|m| m.contains("invalid tenant id")));
        assert!(errors.iter().any(|m| m.contains("http(s) scheme")));
        assert!(errors.iter().any(|m| m.contains("unsupported credential_ref")));
    }

    #[test]
    fn validate_flags_zero_limits() {
        let mut cfg = Config::default();
        cfg.concurrency.max_tenants = 0;
        cfg.retry.max_attempts = 0;
        let warnings = cfg.validate();
        assert_eq!(
            warnings
                .iter()
                .filter(|w| w.level == WarnLevel::Error)
                .count(),
            2
        );
    }

    #[test]
    fn env_credentials_resolve_through_lookup() {
        let t = tenant("acme-prod");
        let creds = t
            .resolve_credentials(Path::new("/"), |name| match name {
                "ACME_PROD_CLIENT_ID" => Some("id-1".into()),
                "ACME_PROD_CLIENT_SECRET" => Some("s3cret".into()),
                _ => None,
            })
            .unwrap();
        assert_eq!(creds.client_id, "id-1");
        assert!(!format!("{creds:?}").contains("s3cret"));

        let err = t.resolve_credentials(Path::new("/"), |_| None).unwrap_err();
        assert!(err.to_string().contains("ACME_PROD_CLIENT_ID"));
    }

    #[test]
    fn file_credentials_resolve_relative_to_root() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("acme.yaml"),
            "client_id: abc\nclient_secret: def\n",
        )
        .unwrap();
        let t = TenantTarget {
            tenant_id: "acme".into(),
            base_url: "https://acme.example.com".into(),
            credential_ref: "file:acme.yaml".into(),
        };
        let creds = t.resolve_credentials(dir.path(), |_| None).unwrap();
        assert_eq!(creds.client_secret, "def");
    }
}
