//! In-memory TTL caches fronting the store.
//!
//! The store is the single source of truth; every miss is validated by a
//! store read, so entries here are advisory and can be dropped at any time.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const MERCHANT_CACHE_TTL: Duration = Duration::from_secs(60 * 60);
pub const IDEMPOTENCY_CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub fn merchant_cache_key(api_key_hash: &str) -> String {
    format!("merchant:{}", api_key_hash)
}

pub fn idempotency_cache_key(merchant_id: Uuid, idempotency_key: &str) -> String {
    format!("idempotency:{}:{}", merchant_id, idempotency_key)
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, Entry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone())
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired entry: drop it so the map does not grow unbounded.
        self.entries.write().await.remove(key);
        None
    }

    pub async fn insert(&self, key: String, value: V, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.expires_at > Instant::now());
        entries.insert(
            key,
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
