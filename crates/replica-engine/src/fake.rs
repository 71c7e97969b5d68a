//! In-memory vendor API for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use replica_core::config::{Credentials, RemoteConfig, RetryPolicy};
use replica_core::types::ObjectKind;
use replica_remote::{AccessToken, Page, RemoteClient, RemoteError, TenantEndpoint, Transport};
use serde_json::Value;

#[derive(Default)]
struct FakeState {
    objects: HashMap<(String, ObjectKind), Vec<Value>>,
    next_id: u64,
    /// Payload names rejected with 422 on every write.
    rejected: HashSet<String>,
    /// Payload names answered with 429 this many more times.
    throttled: HashMap<String, u32>,
    writes: HashMap<String, usize>,
}

pub struct FakeTransport {
    state: Mutex<FakeState>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn seed(&self, tenant: &str, kind: ObjectKind, objects: Vec<Value>) {
        let mut st = self.state.lock().unwrap();
        st.objects
            .entry((tenant.to_string(), kind))
            .or_default()
            .extend(objects);
    }

    pub fn reject(&self, name: &str) {
        self.state.lock().unwrap().rejected.insert(name.to_string());
    }

    pub fn throttle(&self, name: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .throttled
            .insert(name.to_string(), times);
    }

    pub fn objects(&self, tenant: &str, kind: ObjectKind) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .objects
            .get(&(tenant.to_string(), kind))
            .cloned()
            .unwrap_or_default()
    }

    /// Out-of-band edit: overwrite a field of a live object.
    pub fn edit(&self, tenant: &str, kind: ObjectKind, id: &str, field: &str, value: Value) {
        let mut st = self.state.lock().unwrap();
        if let Some(objs) = st.objects.get_mut(&(tenant.to_string(), kind)) {
            for o in objs.iter_mut() {
                if o["id"] == id {
                    o[field] = value.clone();
                }
            }
        }
    }

    /// Out-of-band delete.
    pub fn remove(&self, tenant: &str, kind: ObjectKind, id: &str) {
        let mut st = self.state.lock().unwrap();
        if let Some(objs) = st.objects.get_mut(&(tenant.to_string(), kind)) {
            objs.retain(|o| o["id"] != id);
        }
    }

    /// Successful and failed create/update calls made against `tenant`.
    pub fn writes(&self, tenant: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .writes
            .get(tenant)
            .copied()
            .unwrap_or(0)
    }

    /// Highest number of tenants with a request in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn pace(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn gate(&self, tenant: &str, payload: &Value) -> Result<(), RemoteError> {
        let mut st = self.state.lock().unwrap();
        *st.writes.entry(tenant.to_string()).or_default() += 1;
        let name = payload["name"].as_str().unwrap_or_default().to_string();
        if st.rejected.contains(&name) {
            return Err(RemoteError::from_status(422, None, "rejected by vendor"));
        }
        if let Some(left) = st.throttled.get_mut(&name) {
            if *left > 0 {
                *left -= 1;
                return Err(RemoteError::from_status(429, None, "slow down"));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn fetch_token(&self, endpoint: &TenantEndpoint) -> Result<AccessToken, RemoteError> {
        Ok(AccessToken {
            access_token: format!("token-{}", endpoint.tenant_id),
            expires_in: Some(3600),
        })
    }

    async fn list_page(
        &self,
        endpoint: &TenantEndpoint,
        _token: &str,
        kind: ObjectKind,
        _cursor: Option<&str>,
    ) -> Result<Page, RemoteError> {
        self.pace().await;
        Ok(Page {
            items: self.objects(&endpoint.tenant_id, kind),
            next: None,
        })
    }

    async fn create(
        &self,
        endpoint: &TenantEndpoint,
        _token: &str,
        kind: ObjectKind,
        payload: &Value,
    ) -> Result<Value, RemoteError> {
        self.pace().await;
        self.gate(&endpoint.tenant_id, payload)?;
        let mut st = self.state.lock().unwrap();
        st.next_id += 1;
        let mut stored = payload.clone();
        stored["id"] = Value::String(st.next_id.to_string());
        st.objects
            .entry((endpoint.tenant_id.clone(), kind))
            .or_default()
            .push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        endpoint: &TenantEndpoint,
        _token: &str,
        kind: ObjectKind,
        remote_id: &str,
        payload: &Value,
    ) -> Result<(), RemoteError> {
        self.pace().await;
        self.gate(&endpoint.tenant_id, payload)?;
        let mut st = self.state.lock().unwrap();
        let objs = st
            .objects
            .entry((endpoint.tenant_id.clone(), kind))
            .or_default();
        match objs.iter_mut().find(|o| o["id"] == remote_id) {
            Some(o) => {
                let mut stored = payload.clone();
                stored["id"] = Value::String(remote_id.to_string());
                *o = stored;
                Ok(())
            }
            None => Err(RemoteError::from_status(404, None, "no such object")),
        }
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        base_delay_ms: 1,
        ..RetryPolicy::default()
    }
}

pub fn client_for(transport: &Arc<FakeTransport>, tenants: &[&str]) -> RemoteClient {
    let endpoints = tenants
        .iter()
        .map(|t| {
            TenantEndpoint::new(
                *t,
                format!("https://{t}.example.com"),
                Credentials {
                    client_id: format!("{t}-id"),
                    client_secret: format!("{t}-secret"),
                },
            )
        })
        .collect();
    RemoteClient::new(
        transport.clone(),
        endpoints,
        fast_retry(),
        RemoteConfig::default(),
    )
}
