use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::RemoteError;
use crate::transport::{TenantEndpoint, Transport};

/// Tokens are treated as expired this long before the server says so.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Lifetime assumed when the token response carries no `expires_in`.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Bearer tokens keyed by tenant id, shared by every worker in a run.
#[derive(Debug, Default)]
pub struct TokenCache {
    entries: Mutex<HashMap<String, CachedToken>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token still valid beyond the refresh margin, if cached.
    pub fn cached(&self, tenant_id: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(tenant_id)
            .filter(|t| Instant::now() + REFRESH_MARGIN < t.expires_at)
            .map(|t| t.token.clone())
    }

    pub fn store(&self, tenant_id: &str, token: String, lifetime: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            tenant_id.to_string(),
            CachedToken {
                token,
                expires_at: Instant::now() + lifetime,
            },
        );
    }

    pub fn invalidate(&self, tenant_id: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(tenant_id);
    }

    /// Cached token, or a fresh one from the transport.
    pub async fn get_or_fetch(
        &self,
        transport: &dyn Transport,
        endpoint: &TenantEndpoint,
    ) -> Result<String, RemoteError> {
        if let Some(token) = self.cached(&endpoint.tenant_id) {
            return Ok(token);
        }
        let fresh = match transport.fetch_token(endpoint).await {
            Ok(t) => t,
            // A rejected client-credentials grant will not fix itself.
            Err(RemoteError::AuthExpired) => {
                return Err(RemoteError::permanent(
                    Some(401),
                    "token endpoint rejected client credentials",
                ))
            }
            Err(e) => return Err(e),
        };
        let lifetime = fresh
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);
        debug!(
            tenant = %endpoint.tenant_id,
            expires_in_secs = lifetime.as_secs(),
            "acquired access token"
        );
        self.store(&endpoint.tenant_id, fresh.access_token.clone(), lifetime);
        Ok(fresh.access_token)
    }
}
