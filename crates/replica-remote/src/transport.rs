use async_trait::async_trait;
use replica_core::config::Credentials;
use replica_core::types::ObjectKind;
use serde::Deserialize;
use serde_json::Value;

use crate::error::RemoteError;

// ─── TenantEndpoint ───────────────────────────────────────────────────────

/// Everything needed to talk to one tenant. Built once per run from the
/// tenant's configuration and resolved credentials.
#[derive(Debug, Clone)]
pub struct TenantEndpoint {
    pub tenant_id: String,
    pub base_url: String,
    pub credentials: Credentials,
}

impl TenantEndpoint {
    pub fn new(
        tenant_id: impl Into<String>,
        base_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credentials,
        }
    }
}

// ─── Wire types ───────────────────────────────────────────────────────────

/// Token endpoint response (client-credentials grant).
#[derive(Debug, Clone, Deserialize)]
pub struct AccessToken {
    pub access_token: String,
    /// Lifetime in seconds; absent means the server did not say.
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// One page of a collection listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Value>,
    /// Opaque cursor for the following page; `None` on the last page.
    pub next: Option<String>,
}

impl Page {
    /// Accepts either a bare JSON array (single page) or an envelope
    /// `{"results"|"items": [...], "next": cursor}`.
    pub fn from_json(body: Value) -> Result<Self, RemoteError> {
        match body {
            Value::Array(items) => Ok(Self { items, next: None }),
            Value::Object(mut map) => {
                let items = match map.remove("results").or_else(|| map.remove("items")) {
                    Some(Value::Array(items)) => items,
                    Some(_) | None => {
                        return Err(RemoteError::permanent(
                            None,
                            "list response has no 'results' array",
                        ))
                    }
                };
                let next = match map.remove("next") {
                    Some(Value::String(s)) if !s.is_empty() => Some(s),
                    Some(Value::Number(n)) => Some(n.to_string()),
                    _ => None,
                };
                Ok(Self { items, next })
            }
            _ => Err(RemoteError::permanent(
                None,
                "list response is neither an array nor an object",
            )),
        }
    }
}

// ─── Transport ────────────────────────────────────────────────────────────

/// The raw request surface of a vendor API. One call per method, no retry;
/// [`crate::RemoteClient`] layers tokens and back-off on top.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch_token(&self, endpoint: &TenantEndpoint) -> Result<AccessToken, RemoteError>;

    async fn list_page(
        &self,
        endpoint: &TenantEndpoint,
        token: &str,
        kind: ObjectKind,
        cursor: Option<&str>,
    ) -> Result<Page, RemoteError>;

    /// Returns the created object as echoed by the server.
    async fn create(
        &self,
        endpoint: &TenantEndpoint,
        token: &str,
        kind: ObjectKind,
        payload: &Value,
    ) -> Result<Value, RemoteError>;

    async fn update(
        &self,
        endpoint: &TenantEndpoint,
        token: &str,
        kind: ObjectKind,
        remote_id: &str,
        payload: &Value,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn page_from_bare_array() {
        let page = Page::from_json(json!([{"id": 1}, {"id": 2}])).unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.next.is_none());
    }

    #[test]
    fn page_from_envelope() {
        let page = Page::from_json(json!({"results": [{"id": 1}], "next": "abc"})).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next.as_deref(), Some("abc"));

        let page = Page::from_json(json!({"items": [], "next": null})).unwrap();
        assert!(page.next.is_none());

        let page = Page::from_json(json!({"items": [], "next": 3})).unwrap();
        assert_eq!(page.next.as_deref(), Some("3"));
    }

    #[test]
    fn page_rejects_malformed() {
        assert!(Page::from_json(json!({"data": []})).is_err());
        assert!(Page::from_json(json!("nope")).is_err());
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let ep = TenantEndpoint::new(
            "acme",
            "https://acme.example.com/",
            Credentials {
                client_id: "a".into(),
                client_secret: "b".into(),
            },
        );
        assert_eq!(ep.base_url, "https://acme.example.com");
    }
}
