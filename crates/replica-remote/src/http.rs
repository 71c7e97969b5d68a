use async_trait::async_trait;
use replica_core::config::RemoteConfig;
use replica_core::types::ObjectKind;
use reqwest::{header, Client, RequestBuilder, Response, Url};
use serde_json::Value;
use tracing::debug;

use crate::error::RemoteError;
use crate::retry::parse_retry_after;
use crate::transport::{AccessToken, Page, TenantEndpoint, Transport};

// ─── HttpTransport ────────────────────────────────────────────────────────

/// [`Transport`] over HTTPS with `reqwest`.
///
/// Collections live at `{base}{api_prefix}/{resource}`; objects at
/// `{collection}/{remote_id}`. Listings are requested with `page_size` and,
/// after the first page, `cursor`.
pub struct HttpTransport {
    client: Client,
    token_path: String,
    api_prefix: String,
    page_size: u32,
}

impl HttpTransport {
    pub fn new(settings: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(settings.request_timeout())
            .user_agent(concat!("replica/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Client(e.to_string()))?;
        Ok(Self {
            client,
            token_path: settings.token_path.clone(),
            api_prefix: settings.api_prefix.trim_end_matches('/').to_string(),
            page_size: settings.page_size,
        })
    }

    fn collection_url(&self, endpoint: &TenantEndpoint, kind: ObjectKind) -> String {
        format!(
            "{}{}/{}",
            endpoint.base_url,
            self.api_prefix,
            kind.resource_path()
        )
    }

    /// `{collection}/{remote_id}` with the id percent-encoded as a single
    /// path segment.
    fn object_url(
        &self,
        endpoint: &TenantEndpoint,
        kind: ObjectKind,
        remote_id: &str,
    ) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.collection_url(endpoint, kind))
            .map_err(|e| RemoteError::Client(format!("invalid tenant URL: {e}")))?;
        let url_text = url.to_string();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Client(format!("tenant URL cannot hold a path: {url_text}")))?
            .push(remote_id);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::from_status(status.as_u16(), retry_after, &body))
    }

    async fn json_body(response: Response) -> Result<Value, RemoteError> {
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RemoteError::permanent(None, format!("malformed JSON response: {e}")))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_token(&self, endpoint: &TenantEndpoint) -> Result<AccessToken, RemoteError> {
        let url = format!("{}{}", endpoint.base_url, self.token_path);
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", endpoint.credentials.client_id.as_str()),
            ("client_secret", endpoint.credentials.client_secret.as_str()),
        ];
        let response = self.send(self.client.post(&url).form(&form)).await?;
        let body = Self::json_body(response).await?;
        serde_json::from_value(body)
            .map_err(|e| RemoteError::permanent(None, format!("malformed token response: {e}")))
    }

    async fn list_page(
        &self,
        endpoint: &TenantEndpoint,
        token: &str,
        kind: ObjectKind,
        cursor: Option<&str>,
    ) -> Result<Page, RemoteError> {
        let url = self.collection_url(endpoint, kind);
        let mut query = vec![("page_size", self.page_size.to_string())];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        debug!(tenant = %endpoint.tenant_id, kind = %kind, cursor = ?cursor, "listing");
        let response = self
            .send(self.client.get(&url).bearer_auth(token).query(&query))
            .await?;
        Page::from_json(Self::json_body(response).await?)
    }

    async fn create(
        &self,
        endpoint: &TenantEndpoint,
        token: &str,
        kind: ObjectKind,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        let url = self.collection_url(endpoint, kind);
        let response = self
            .send(self.client.post(&url).bearer_auth(token).json(payload))
            .await?;
        Self::json_body(response).await
    }

    async fn update(
        &self,
        endpoint: &TenantEndpoint,
        token: &str,
        kind: ObjectKind,
        remote_id: &str,
        payload: &Value,
    ) -> Result<(), RemoteError> {
        let url = self.object_url(endpoint, kind, remote_id)?;
        self.send(self.client.put(url).bearer_auth(token).json(payload))
            .await?;
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
