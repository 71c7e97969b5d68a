use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ObjectKind
// ---------------------------------------------------------------------------

/// Kind of configuration object managed on a tenant.
///
/// Variant order is the dependency rank: objects that others reference by
/// name (extension attributes, groups) sort first, so a plan ordered by kind
/// never creates a policy before the group it scopes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    ExtensionAttribute,
    Group,
    IdpBinding,
    Profile,
    Policy,
    Plan,
}

impl ObjectKind {
    pub fn all() -> &'static [ObjectKind] {
        &[
            ObjectKind::ExtensionAttribute,
            ObjectKind::Group,
            ObjectKind::IdpBinding,
            ObjectKind::Profile,
            ObjectKind::Policy,
            ObjectKind::Plan,
        ]
    }

    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::ExtensionAttribute => "extension_attribute",
            ObjectKind::Group => "group",
            ObjectKind::IdpBinding => "idp_binding",
            ObjectKind::Profile => "profile",
            ObjectKind::Policy => "policy",
            ObjectKind::Plan => "plan",
        }
    }

    /// Directory name inside a template bundle.
    pub fn dir_name(self) -> &'static str {
        match self {
            ObjectKind::ExtensionAttribute => "extension_attributes",
            ObjectKind::Group => "groups",
            ObjectKind::IdpBinding => "idp_bindings",
            ObjectKind::Profile => "profiles",
            ObjectKind::Policy => "policies",
            ObjectKind::Plan => "plans",
        }
    }

    /// Path segment of the remote collection endpoint.
    pub fn resource_path(self) -> &'static str {
        match self {
            ObjectKind::ExtensionAttribute => "extension-attributes",
            ObjectKind::Group => "groups",
            ObjectKind::IdpBinding => "idp-bindings",
            ObjectKind::Profile => "profiles",
            ObjectKind::Policy => "policies",
            ObjectKind::Plan => "plans",
        }
    }

    pub fn from_dir_name(name: &str) -> Option<ObjectKind> {
        Self::all().iter().copied().find(|k| k.dir_name() == name)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectKind {
    type Err = crate::error::ReplicaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "extension_attribute" | "extension-attribute" => Ok(ObjectKind::ExtensionAttribute),
            "group" => Ok(ObjectKind::Group),
            "idp_binding" | "idp-binding" => Ok(ObjectKind::IdpBinding),
            "profile" => Ok(ObjectKind::Profile),
            "policy" => Ok(ObjectKind::Policy),
            "plan" => Ok(ObjectKind::Plan),
            _ => Err(crate::error::ReplicaError::UnknownKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectKey
// ---------------------------------------------------------------------------

/// Identity of a configuration object within one tenant.
///
/// Logical keys are unique per kind, so the pair is the join key between
/// templates, ledger records and live remote objects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub kind: ObjectKind,
    pub logical_key: String,
}

impl ObjectKey {
    pub fn new(kind: ObjectKind, logical_key: impl Into<String>) -> Self {
        Self {
            kind,
            logical_key: logical_key.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.logical_key)
    }
}

// ---------------------------------------------------------------------------
// OpAction
// ---------------------------------------------------------------------------

/// What a plan operation does to the tenant.
///
/// There is no delete: objects missing from the template set surface as
/// orphans and are only removed by an explicit decommission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpAction {
    Create,
    Update,
    Skip,
    Decommission,
}

impl OpAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OpAction::Create => "create",
            OpAction::Update => "update",
            OpAction::Skip => "skip",
            OpAction::Decommission => "decommission",
        }
    }
}

impl fmt::Display for OpAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    Failed,
    Skipped,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Applied => "applied",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
