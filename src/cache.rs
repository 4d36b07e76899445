//! In-memory TTL cache
//!
//! Entries expire `ttl` after they were last set. When the cache is full a new
//! key evicts the least-recently-added one.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
    /// Bumped by every `clear`
    generation: u64,
}

impl<V> Inner<V> {
    fn forget(&mut self, key: &str) {
        self.entries.remove(key);
        self.order.retain(|k| k != key);
    }
}

#[derive(Clone)]
pub struct TtlCache<V> {
    inner: Arc<Mutex<Inner<V>>>,
    ttl: Duration,
    max_entries: usize,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                generation: 0,
            })),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &str, now: Instant) -> Option<V> {
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => now.saturating_duration_since(entry.stored_at) > self.ttl,
        };
        if expired {
            inner.forget(key);
            return None;
        }
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_at(key, value, Instant::now())
    }

    pub fn set_at(&self, key: impl Into<String>, value: V, now: Instant) {
        let mut inner = self.lock();
        Self::store(&mut inner, self.max_entries, key.into(), value, now);
    }

    /// Current clear generation, read before computing a value to store
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Store the value unless the cache was cleared since `generation`
    ///
    /// Returns whether the value was stored.
    pub fn set_if_generation(&self, key: impl Into<String>, value: V, generation: u64) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            return false;
        }
        Self::store(&mut inner, self.max_entries, key.into(), value, Instant::now());
        true
    }

    fn store(inner: &mut Inner<V>, max_entries: usize, key: String, value: V, now: Instant) {
        let is_new = !inner.entries.contains_key(&key);
        if is_new && inner.order.len() >= max_entries {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                stored_at: now,
            },
        );
        if is_new {
            inner.order.push_back(key);
        }
    }

    pub fn remove(&self, key: &str) {
        self.lock().forget(key);
    }

    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.generation = inner.generation.wrapping_add(1);
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys in insertion order
    pub fn keys(&self) -> Vec<String> {
        self.lock().order.iter().cloned().collect()
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.lock();
        let ttl = self.ttl;
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.stored_at) > ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.forget(key);
        }
        expired.len()
    }
}

impl<V: Clone + Send + 'static> TtlCache<V> {
    /// Periodically purge expired entries, every half TTL
    pub fn spawn_janitor(&self) -> tokio::task::JoinHandle<()> {
        let cache = self.clone();
        let period = (self.ttl / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!("Cache janitor purged {} entries", purged);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_expires_after_ttl() {
        let cache = TtlCache::new(Duration::from_secs(60), 10);
        let t0 = Instant::now();
        cache.set_at("kpi", 42, t0);

        assert_eq!(cache.get_at("kpi", t0 + Duration::from_secs(59)), Some(42));
        assert_eq!(cache.get_at("kpi", t0 + Duration::from_secs(61)), None);
        // expired entry was dropped on read
        assert!(cache.is_empty());
    }

    #[test]
    fn test_set_refreshes_timestamp() {
        let cache = TtlCache::new(Duration::from_secs(10), 10);
        let t0 = Instant::now();
        cache.set_at("a", 1, t0);
        cache.set_at("a", 2, t0 + Duration::from_secs(8));
        assert_eq!(cache.get_at("a", t0 + Duration::from_secs(15)), Some(2));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_evicts_least_recently_added() {
        let cache = TtlCache::new(Duration::from_secs(60), 2);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 10);
        cache.set("c", 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(2));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.keys(), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_remove_and_clear() {
        let cache = TtlCache::new(Duration::from_secs(60), 5);
        cache.set("a", 1);
        cache.set("b", 2);
        cache.remove("a");
        assert_eq!(cache.keys(), vec!["b".to_string()]);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let cache = TtlCache::new(Duration::from_secs(5), 5);
        let t0 = Instant::now();
        cache.set_at("old", 1, t0);
        cache.set_at("new", 2, t0 + Duration::from_secs(4));
        assert_eq!(cache.purge_expired_at(t0 + Duration::from_secs(6)), 1);
        assert_eq!(cache.keys(), vec!["new".to_string()]);
    }

    #[test]
    fn test_set_skipped_after_clear() {
        let cache = TtlCache::new(Duration::from_secs(60), 5);
        let generation = cache.generation();
        assert!(cache.set_if_generation("dashboard", 1, generation));
        assert_eq!(cache.get("dashboard"), Some(1));

        // a write clears the cache while a slower reader is still computing
        let stale = cache.generation();
        cache.clear();
        assert!(!cache.set_if_generation("dashboard", 2, stale));
        assert_eq!(cache.get("dashboard"), None);

        assert!(cache.set_if_generation("dashboard", 3, cache.generation()));
        assert_eq!(cache.get("dashboard"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_janitor_purges_expired_entries() {
        let cache: TtlCache<u8> = TtlCache::new(Duration::from_secs(2), 5);
        let long_ago = Instant::now()
            .checked_sub(Duration::from_secs(5))
            .expect("monotonic clock is past 5s");
        cache.set_at("stale", 1, long_ago);
        cache.set("fresh", 2);
        assert_eq!(cache.len(), 2);

        let handle = cache.spawn_janitor();
        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.abort();

        assert_eq!(cache.keys(), vec!["fresh".to_string()]);
    }
}
