use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("not initialized: run 'replica init'")]
    NotInitialized,

    #[error("invalid template: {0}")]
    Template(String),

    #[error("duplicate logical key '{key}' for kind '{kind}'")]
    DuplicateKey { kind: String, key: String },

    #[error("invalid logical key '{0}': must be lowercase alphanumeric with '-', '_' or '.'")]
    InvalidLogicalKey(String),

    #[error("invalid tenant id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidTenantId(String),

    #[error("unknown object kind: {0}")]
    UnknownKind(String),

    #[error("bundle not found: {0}")]
    BundleNotFound(String),

    #[error("bundle digest mismatch for {bundle}: expected {expected}, found {actual}")]
    DigestMismatch {
        bundle: String,
        expected: String,
        actual: String,
    },

    #[error("tenant not found: {0}")]
    TenantNotFound(String),

    #[error("no record for '{key}' on tenant '{tenant}'")]
    RecordNotFound { tenant: String, key: String },

    #[error("credentials unavailable for tenant '{tenant}': {reason}")]
    Credentials { tenant: String, reason: String },

    #[error("ledger error: {0}")]
    Ledger(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ReplicaError {
    /// True for failures caused by the template bundle itself. These abort a
    /// run before any remote call is made.
    pub fn is_template_error(&self) -> bool {
        matches!(
            self,
            Self::Template(_)
                | Self::DuplicateKey { .. }
                | Self::InvalidLogicalKey(_)
                | Self::UnknownKind(_)
                | Self::DigestMismatch { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, ReplicaError>;
