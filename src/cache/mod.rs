use crate::error::ApiError;
use crate::storage::KeyValueStore;
use chrono::{Duration, Utc};
use log::{debug, error};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Freshness window for reference data such as categories and tags.
pub const REFERENCE_TTL_MINUTES: i64 = 5;

#[derive(Serialize, Deserialize)]
struct Cached<T> {
    data: T,
    /// Milliseconds since the Unix epoch.
    timestamp: i64,
}

/// Reference data fetched from the backend, kept in memory and mirrored to
/// local storage so a restart within the freshness window skips the fetch.
pub struct ReferenceCache<T> {
    key: &'static str,
    ttl: Duration,
    store: Arc<dyn KeyValueStore>,
    entry: Mutex<Option<Cached<T>>>,
}

impl<T> ReferenceCache<T>
where
    T: Clone + Serialize + DeserializeOwned + Send,
{
    pub fn new(key: &'static str, store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_ttl(key, store, Duration::minutes(REFERENCE_TTL_MINUTES))
    }

    pub fn with_ttl(key: &'static str, store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            key,
            ttl,
            store,
            entry: Mutex::new(None),
        }
    }

    /// Returns the cached value while fresh, otherwise runs `fetch` and
    /// stores its result. `force` skips the freshness check.
    pub async fn get_or_fetch<F, Fut>(&self, force: bool, fetch: F) -> Result<T, ApiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ApiError>>,
    {
        let mut entry = self.entry.lock().await;

        if entry.is_none() {
            *entry = self.load();
        }

        if !force {
            if let Some(cached) = entry.as_ref().filter(|c| self.is_fresh(c.timestamp)) {
                debug!("Serving {} from cache", self.key);
                return Ok(cached.data.clone());
            }
        }

        let data = fetch().await?;
        let cached = Cached {
            data: data.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        match serde_json::to_string(&cached) {
            Ok(json) => {
                if let Err(e) = self.store.set(self.key, &json) {
                    error!("Failed to persist {}: {}", self.key, e);
                }
            }
            Err(e) => error!("Failed to serialize {}: {}", self.key, e),
        }
        *entry = Some(cached);

        Ok(data)
    }

    pub async fn invalidate(&self) {
        *self.entry.lock().await = None;
        if let Err(e) = self.store.remove(self.key) {
            error!("Failed to remove {}: {}", self.key, e);
        }
    }

    fn is_fresh(&self, timestamp: i64) -> bool {
        Utc::now().timestamp_millis() - timestamp < self.ttl.num_milliseconds()
    }

    fn load(&self) -> Option<Cached<T>> {
        let raw = self.store.get(self.key).ok().flatten()?;
        match serde_json::from_str(&raw) {
            Ok(cached) => Some(cached),
            Err(e) => {
                error!("Ignoring unreadable cache entry {}: {}", self.key, e);
                None
            }
        }
    }
}
