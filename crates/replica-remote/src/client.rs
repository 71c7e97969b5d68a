use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use replica_core::config::{RemoteConfig, RetryPolicy};
use replica_core::hash;
use replica_core::record::RemoteObject;
use replica_core::types::ObjectKind;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CallFailure, RemoteError};
use crate::retry::{delay_for, Retried};
use crate::token::TokenCache;
use crate::transport::{TenantEndpoint, Transport};

/// Cursor pages followed before a listing is declared runaway.
const MAX_PAGES: usize = 10_000;

// ─── RemoteClient ─────────────────────────────────────────────────────────

/// Typed CRUD over every tenant of a run, with token management and
/// capped exponential back-off.
///
/// Cheap to share: wrap in `Arc` and hand to each worker.
pub struct RemoteClient {
    transport: Arc<dyn Transport>,
    endpoints: HashMap<String, TenantEndpoint>,
    tokens: TokenCache,
    policy: RetryPolicy,
    settings: RemoteConfig,
}

impl RemoteClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Vec<TenantEndpoint>,
        policy: RetryPolicy,
        settings: RemoteConfig,
    ) -> Self {
        Self {
            transport,
            endpoints: endpoints
                .into_iter()
                .map(|e| (e.tenant_id.clone(), e))
                .collect(),
            tokens: TokenCache::new(),
            policy,
            settings,
        }
    }

    pub fn settings(&self) -> &RemoteConfig {
        &self.settings
    }

    pub fn has_tenant(&self, tenant_id: &str) -> bool {
        self.endpoints.contains_key(tenant_id)
    }

    fn endpoint(&self, tenant_id: &str) -> Result<&TenantEndpoint, CallFailure> {
        self.endpoints.get(tenant_id).ok_or_else(|| CallFailure {
            error: RemoteError::UnknownTenant(tenant_id.to_string()),
            attempts: 0,
            delays: Vec::new(),
        })
    }

    // ─── Operations ───────────────────────────────────────────────────────

    /// Every live object of `kind`, following cursors to the last page.
    pub async fn list(
        &self,
        tenant_id: &str,
        kind: ObjectKind,
    ) -> Result<Retried<Vec<RemoteObject>>, CallFailure> {
        let endpoint = self.endpoint(tenant_id)?;
        let transport = self.transport.as_ref();
        let mut out = Vec::new();
        let mut attempts = 0;
        let mut delays = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let page_cursor = cursor.clone();
            let fetched = self
                .call(endpoint, "list", move |token| {
                    let cursor = page_cursor.clone();
                    async move {
                        transport
                            .list_page(endpoint, &token, kind, cursor.as_deref())
                            .await
                    }
                })
                .await;
            let page = match fetched {
                Ok(page) => page,
                Err(mut failure) => {
                    delays.append(&mut failure.delays);
                    return Err(CallFailure {
                        error: failure.error,
                        attempts: attempts + failure.attempts,
                        delays,
                    });
                }
            };
            attempts += page.attempts;
            delays.extend(page.delays);
            for item in page.value.items {
                match self.to_remote_object(item) {
                    Ok(obj) => out.push(obj),
                    Err(error) => {
                        return Err(CallFailure {
                            error,
                            attempts,
                            delays,
                        })
                    }
                }
            }
            match page.value.next {
                Some(next) => cursor = Some(next),
                None => {
                    debug!(tenant = %tenant_id, kind = %kind, count = out.len(), "listed");
                    return Ok(Retried {
                        value: out,
                        attempts,
                        delays,
                    });
                }
            }
        }
        Err(CallFailure {
            error: RemoteError::permanent(None, format!("listing {kind} exceeded {MAX_PAGES} pages")),
            attempts,
            delays,
        })
    }

    /// Create an object; returns its remote id.
    pub async fn create(
        &self,
        tenant_id: &str,
        kind: ObjectKind,
        payload: &Value,
    ) -> Result<Retried<String>, CallFailure> {
        let endpoint = self.endpoint(tenant_id)?;
        let transport = self.transport.as_ref();
        let created = self
            .call(endpoint, "create", move |token| async move {
                transport.create(endpoint, &token, kind, payload).await
            })
            .await?;
        let id_field = self.settings.id_field.as_str();
        let remote_id = extract_id(&created.value, id_field).ok_or_else(|| CallFailure {
            error: RemoteError::permanent(
                None,
                format!("create response for {kind} has no '{id_field}' field"),
            ),
            attempts: created.attempts,
            delays: created.delays.clone(),
        })?;
        Ok(created.map(|_| remote_id))
    }

    /// Replace an object's content in place.
    pub async fn update(
        &self,
        tenant_id: &str,
        kind: ObjectKind,
        remote_id: &str,
        payload: &Value,
    ) -> Result<Retried<()>, CallFailure> {
        let endpoint = self.endpoint(tenant_id)?;
        let transport = self.transport.as_ref();
        self.call(endpoint, "update", move |token| async move {
            transport
                .update(endpoint, &token, kind, remote_id, payload)
                .await
        })
        .await
    }

    // ─── Internals ────────────────────────────────────────────────────────

    fn to_remote_object(&self, payload: Value) -> Result<RemoteObject, RemoteError> {
        let remote_id = extract_id(&payload, &self.settings.id_field).ok_or_else(|| {
            RemoteError::permanent(
                None,
                format!("listed object has no '{}' field", self.settings.id_field),
            )
        })?;
        let hash = hash::live_hash(&payload, &self.settings.volatile_fields);
        Ok(RemoteObject {
            remote_id,
            payload,
            hash,
        })
    }

    /// Run `f` with a bearer token until it succeeds, fails permanently, or
    /// the attempt budget is spent.
    ///
    /// A 401 drops the cached token and retries once at once; a second 401
    /// in the same call is handled as a transient failure.
    async fn call<T, F, Fut>(
        &self,
        endpoint: &TenantEndpoint,
        what: &str,
        mut f: F,
    ) -> Result<Retried<T>, CallFailure>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let tenant = endpoint.tenant_id.as_str();
        let mut attempts = 0u32;
        let mut delays = Vec::new();
        let mut refreshed = false;

        loop {
            attempts += 1;
            let result = match self.tokens.get_or_fetch(self.transport.as_ref(), endpoint).await {
                Ok(token) => f(token).await,
                Err(e) => Err(e),
            };
            let error = match result {
                Ok(value) => {
                    return Ok(Retried {
                        value,
                        attempts,
                        delays,
                    })
                }
                Err(RemoteError::AuthExpired) if !refreshed => {
                    debug!(tenant = %tenant, op = what, "token rejected, refreshing");
                    refreshed = true;
                    self.tokens.invalidate(tenant);
                    continue;
                }
                Err(RemoteError::AuthExpired) => {
                    self.tokens.invalidate(tenant);
                    RemoteError::transient(Some(401), "token rejected again after refresh")
                }
                Err(e) => e,
            };

            if !error.is_retryable() || attempts >= self.policy.max_attempts {
                return Err(CallFailure {
                    error,
                    attempts,
                    delays,
                });
            }
            let wait = delay_for(&self.policy, delays.len() as u32 + 1, &error);
            warn!(
                tenant = %tenant,
                op = what,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "transient failure, backing off"
            );
            tokio::time::sleep(wait).await;
            delays.push(wait);
        }
    }
}

fn extract_id(value: &Value, field: &str) -> Option<String> {
    match value.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
