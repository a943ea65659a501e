//! Sticky client-to-endpoint bindings.
//!
//! # Responsibilities
//! - Return the bound endpoint while the binding is valid
//! - Bind a client on miss, using the caller's selection
//! - Evict expired bindings lazily on lookup and eagerly on cleanup
//!
//! A binding is valid while `now < expires_at` and its endpoint is among the
//! candidates handed to the lookup. Bindings are mirrored as JSON into an
//! optional `SessionStore`; store failures degrade to local-only behavior.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::clock;
use crate::config::StickySessionConfig;
use crate::error::DispatchError;
use crate::load_balancer::endpoint::Endpoint;
use crate::observability::metrics;
use crate::session::store::{SessionStore, StoreError};

/// One client binding. Times are unix milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StickySession {
    pub client_id: String,
    pub endpoint_id: String,
    pub created_at: u64,
    pub expires_at: u64,
}

impl StickySession {
    pub fn new(client_id: &str, endpoint_id: &str, now: u64, ttl: Duration) -> Self {
        Self {
            client_id: client_id.to_string(),
            endpoint_id: endpoint_id.to_string(),
            created_at: now,
            expires_at: now.saturating_add(ttl.as_millis() as u64),
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    fn bound_in(&self, candidates: &[Arc<Endpoint>]) -> Option<Arc<Endpoint>> {
        candidates.iter().find(|ep| ep.id == self.endpoint_id).cloned()
    }
}

fn store_key(client_id: &str) -> String {
    format!("sticky:{}", client_id)
}

fn decode(raw: Option<String>) -> Result<Option<StickySession>, StoreError> {
    raw.map(|raw| serde_json::from_str(&raw).map_err(StoreError::from))
        .transpose()
}

#[derive(Debug)]
pub struct StickySessionManager {
    sessions: DashMap<String, StickySession>,
    ttl: Duration,
    sliding: bool,
    store: Option<Arc<dyn SessionStore>>,
}

impl StickySessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            sliding: false,
            store: None,
        }
    }

    pub fn from_config(config: &StickySessionConfig) -> Self {
        Self::new(config.ttl()).with_sliding(config.sliding)
    }

    /// Refresh `expires_at` on every hit.
    pub fn with_sliding(mut self, sliding: bool) -> Self {
        self.sliding = sliding;
        self
    }

    /// Mirror bindings into `store`.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Bound endpoint for `client_id`, or a fresh binding to whatever
    /// `fallback` selects from `candidates`.
    pub async fn get_sticky_endpoint<F>(
        &self,
        client_id: &str,
        candidates: &[Arc<Endpoint>],
        fallback: F,
    ) -> Result<Arc<Endpoint>, DispatchError>
    where
        F: FnOnce(&[Arc<Endpoint>]) -> Result<Arc<Endpoint>, DispatchError>,
    {
        let now = clock::now_millis();

        // Clone out so no shard lock is held across an await.
        let local = self.sessions.get(client_id).map(|s| s.value().clone());
        let existing = match local {
            Some(session) => Some(session),
            None => self.load_from_store(client_id).await,
        };

        if let Some(session) = existing {
            match session.bound_in(candidates) {
                Some(endpoint) if !session.is_expired(now) => {
                    self.touch(session, now).await;
                    metrics::record_sticky_lookup("hit");
                    return Ok(endpoint);
                }
                _ => {
                    tracing::debug!(
                        client = %client_id,
                        endpoint = %session.endpoint_id,
                        expired = session.is_expired(now),
                        "Evicting sticky session"
                    );
                    self.sessions.remove_if(client_id, |_, s| s == &session);
                    self.delete_from_store(client_id).await;
                    metrics::record_sticky_lookup("evicted");
                }
            }
        } else {
            metrics::record_sticky_lookup("miss");
        }

        let selected = fallback(candidates)?;

        // Check and bind under the shard lock so concurrent first lookups
        // for one client agree on the endpoint.
        let (endpoint, bound) = match self.sessions.entry(client_id.to_string()) {
            Entry::Occupied(mut slot) => {
                let current = {
                    let session = slot.get();
                    session.bound_in(candidates).filter(|_| !session.is_expired(now))
                };
                match current {
                    Some(endpoint) => (endpoint, None),
                    None => {
                        let session = StickySession::new(client_id, &selected.id, now, self.ttl);
                        slot.insert(session.clone());
                        (selected, Some(session))
                    }
                }
            }
            Entry::Vacant(slot) => {
                let session = StickySession::new(client_id, &selected.id, now, self.ttl);
                slot.insert(session.clone());
                (selected, Some(session))
            }
        };

        if let Some(session) = bound {
            self.save_to_store(&session).await;
        }
        Ok(endpoint)
    }

    async fn touch(&self, session: StickySession, now: u64) {
        if !self.sliding {
            // Store hits still need a local copy.
            self.sessions.entry(session.client_id.clone()).or_insert(session);
            return;
        }
        let refreshed = StickySession {
            expires_at: now.saturating_add(self.ttl.as_millis() as u64),
            ..session
        };
        self.sessions.insert(refreshed.client_id.clone(), refreshed.clone());
        self.save_to_store(&refreshed).await;
    }

    async fn load_from_store(&self, client_id: &str) -> Option<StickySession> {
        let store = self.store.as_ref()?;
        match store.get(&store_key(client_id)).await.and_then(decode) {
            Ok(session) => session,
            Err(e @ StoreError::Malformed(_)) => {
                tracing::warn!(client = %client_id, error = %e, "Discarding malformed stored session");
                self.delete_from_store(client_id).await;
                None
            }
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "Session store lookup failed");
                None
            }
        }
    }

    async fn save_to_store(&self, session: &StickySession) {
        let Some(store) = &self.store else { return };
        let raw = match serde_json::to_string(session) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(client = %session.client_id, error = %e, "Failed to encode session");
                return;
            }
        };
        let remaining = session.expires_at.saturating_sub(clock::now_millis());
        if let Err(e) = store
            .set(&store_key(&session.client_id), raw, Some(Duration::from_millis(remaining)))
            .await
        {
            tracing::warn!(client = %session.client_id, error = %e, "Session store write failed");
        }
    }

    async fn delete_from_store(&self, client_id: &str) {
        let Some(store) = &self.store else { return };
        if let Err(e) = store.delete(&store_key(client_id)).await {
            tracing::warn!(client = %client_id, error = %e, "Session store delete failed");
        }
    }

    /// Remove every expired binding. Returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let now = clock::now_millis();
        let mut expired = Vec::new();
        self.sessions.retain(|client_id, session| {
            if session.is_expired(now) {
                expired.push(client_id.clone());
                false
            } else {
                true
            }
        });

        for client_id in &expired {
            self.delete_from_store(client_id).await;
        }
        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), remaining = self.len(), "Sticky session cleanup");
        }
        expired.len()
    }

    /// Drop the binding for one client.
    pub async fn invalidate(&self, client_id: &str) -> bool {
        let removed = self.sessions.remove(client_id).is_some();
        self.delete_from_store(client_id).await;
        removed
    }

    /// Drop every binding to `endpoint_id`. Returns how many were removed.
    pub async fn invalidate_endpoint(&self, endpoint_id: &str) -> usize {
        let mut removed = Vec::new();
        self.sessions.retain(|client_id, session| {
            if session.endpoint_id == endpoint_id {
                removed.push(client_id.clone());
                false
            } else {
                true
            }
        });

        for client_id in &removed {
            self.delete_from_store(client_id).await;
        }
        if !removed.is_empty() {
            tracing::info!(endpoint = %endpoint_id, removed = removed.len(), "Invalidated sticky sessions");
        }
        removed.len()
    }

    pub fn get(&self, client_id: &str) -> Option<StickySession> {
        self.sessions.get(client_id).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Periodic cleanup until shutdown. Lookups never depend on it. A zero
    /// interval disables the sweep and the returned task ends immediately.
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if interval.is_zero() {
                tracing::debug!("Sticky session cleanup disabled");
                return;
            }
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.cleanup().await;
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Sticky session cleanup stopping");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::endpoints;
    use crate::session::store::MemoryStore;
    use async_trait::async_trait;

    /// Store that fails every operation.
    #[derive(Debug)]
    struct DownStore;

    #[async_trait]
    impl SessionStore for DownStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn first(candidates: &[Arc<Endpoint>]) -> Result<Arc<Endpoint>, DispatchError> {
        candidates.first().cloned().ok_or(DispatchError::NoHealthyEndpoints { total: 0 })
    }

    fn last(candidates: &[Arc<Endpoint>]) -> Result<Arc<Endpoint>, DispatchError> {
        candidates.last().cloned().ok_or(DispatchError::NoHealthyEndpoints { total: 0 })
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_endpoint_within_ttl() {
        let eps = endpoints(&[1, 1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(10));

        let a = mgr.get_sticky_endpoint("client", &eps, last).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let b = mgr.get_sticky_endpoint("client", &eps, first).await.unwrap();

        assert_eq!(a.id, "ep2");
        assert_eq!(b.id, "ep2");
        assert_eq!(mgr.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebinds_after_expiry() {
        let eps = endpoints(&[1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(10));

        mgr.get_sticky_endpoint("client", &eps, last).await.unwrap();
        tokio::time::advance(Duration::from_secs(10)).await;
        let b = mgr.get_sticky_endpoint("client", &eps, first).await.unwrap();

        assert_eq!(b.id, "ep0");
        assert_eq!(mgr.get("client").unwrap().endpoint_id, "ep0");
    }

    #[tokio::test]
    async fn test_rebinds_when_endpoint_leaves_candidates() {
        let eps = endpoints(&[1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(60));

        mgr.get_sticky_endpoint("client", &eps, last).await.unwrap();
        let b = mgr.get_sticky_endpoint("client", &eps[..1], last).await.unwrap();
        assert_eq!(b.id, "ep0");
    }

    #[tokio::test]
    async fn test_fallback_error_propagates() {
        let mgr = StickySessionManager::new(Duration::from_secs(60));
        let err = mgr.get_sticky_endpoint("client", &[], first).await.unwrap_err();
        assert_eq!(err, DispatchError::NoHealthyEndpoints { total: 0 });
        assert!(mgr.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_expiry() {
        let eps = endpoints(&[1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(10)).with_sliding(true);

        mgr.get_sticky_endpoint("client", &eps, last).await.unwrap();
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(8)).await;
            let ep = mgr.get_sticky_endpoint("client", &eps, first).await.unwrap();
            assert_eq!(ep.id, "ep1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_only_expired() {
        let eps = endpoints(&[1]);
        let mgr = StickySessionManager::new(Duration::from_secs(10));

        mgr.get_sticky_endpoint("old", &eps, first).await.unwrap();
        tokio::time::advance(Duration::from_secs(6)).await;
        mgr.get_sticky_endpoint("new", &eps, first).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(mgr.cleanup().await, 1);
        assert!(mgr.get("old").is_none());
        assert!(mgr.get("new").is_some());
    }

    #[tokio::test]
    async fn test_invalidate_endpoint() {
        let eps = endpoints(&[1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(60));

        mgr.get_sticky_endpoint("a", &eps, first).await.unwrap();
        mgr.get_sticky_endpoint("b", &eps, last).await.unwrap();
        mgr.get_sticky_endpoint("c", &eps, first).await.unwrap();

        assert_eq!(mgr.invalidate_endpoint("ep0").await, 2);
        assert_eq!(mgr.len(), 1);
        assert!(mgr.invalidate("b").await);
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn test_store_shared_between_instances() {
        let eps = endpoints(&[1, 1]);
        let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
        let one = StickySessionManager::new(Duration::from_secs(60)).with_store(store.clone());
        let two = StickySessionManager::new(Duration::from_secs(60)).with_store(store.clone());

        one.get_sticky_endpoint("client", &eps, last).await.unwrap();
        let ep = two.get_sticky_endpoint("client", &eps, first).await.unwrap();

        assert_eq!(ep.id, "ep1");
        assert_eq!(two.len(), 1);

        let raw = store.get("sticky:client").await.unwrap().unwrap();
        let stored: StickySession = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.endpoint_id, "ep1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_store_falls_back_to_local() {
        let eps = endpoints(&[1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(10)).with_store(Arc::new(DownStore));

        let a = mgr.get_sticky_endpoint("client", &eps, last).await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let b = mgr.get_sticky_endpoint("client", &eps, first).await.unwrap();
        assert_eq!(a.id, "ep1");
        assert_eq!(b.id, "ep1");

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(mgr.cleanup().await, 1);
        assert!(mgr.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_stored_session_is_discarded() {
        let eps = endpoints(&[1, 1]);
        let store = Arc::new(MemoryStore::new());
        store.set("sticky:client", "{not json".to_string(), None).await.unwrap();
        let mgr = StickySessionManager::new(Duration::from_secs(60)).with_store(store.clone());

        let ep = mgr.get_sticky_endpoint("client", &eps, first).await.unwrap();
        assert_eq!(ep.id, "ep0");

        let raw = store.get("sticky:client").await.unwrap().unwrap();
        let stored: StickySession = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored.endpoint_id, "ep0");
    }

    #[test]
    fn test_decode_reports_malformed() {
        assert!(matches!(decode(Some("[]".to_string())), Err(StoreError::Malformed(_))));
        assert!(matches!(decode(None), Ok(None)));
    }

    #[tokio::test]
    async fn test_concurrent_bind_keeps_first_binding() {
        let eps = endpoints(&[1, 1]);
        let mgr = StickySessionManager::new(Duration::from_secs(60));

        // Another lookup binds the client while this one is selecting.
        let ep = mgr
            .get_sticky_endpoint("client", &eps, |candidates| {
                let other = StickySession::new("client", "ep1", clock::now_millis(), Duration::from_secs(60));
                mgr.sessions.insert("client".to_string(), other);
                first(candidates)
            })
            .await
            .unwrap();

        assert_eq!(ep.id, "ep1");
        assert_eq!(mgr.get("client").unwrap().endpoint_id, "ep1");
    }

    #[tokio::test]
    async fn test_zero_cleanup_interval_disables_sweep() {
        let mgr = Arc::new(StickySessionManager::new(Duration::from_secs(60)));
        let (_tx, rx) = broadcast::channel(1);

        let handle = mgr.spawn_cleanup(Duration::ZERO, rx);
        assert!(handle.await.is_ok());
    }
}
