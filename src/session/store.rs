//! Key-value contract for mirroring sessions outside the process.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;

use crate::clock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("malformed session record: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// External get/set/delete store. Values are opaque strings.
#[async_trait]
pub trait SessionStore: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value`; the store may forget it after `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process store. Expired entries are dropped on read.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, (String, Option<u64>)>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = clock::now_millis();
        self.entries
            .remove_if(key, |_, (_, expires)| expires.is_some_and(|at| at <= now));
        Ok(self.entries.get(key).map(|entry| entry.0.clone()))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires = ttl.map(|ttl| clock::now_millis().saturating_add(ttl.as_millis() as u64));
        self.entries.insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}
