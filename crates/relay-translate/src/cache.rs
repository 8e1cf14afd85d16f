//! Bounded translation response cache.
//!
//! Entries expire a fixed TTL after insertion and are evicted lazily on lookup. When the cache is
//! full the oldest insertion goes first. The insertion queue may hold keys whose entry has
//! already been replaced or removed; those are recognised by their timestamp and skipped.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

/// A validated translation request. Every field changes the upstream answer, so it doubles as
/// the cache key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TranslationQuery {
    pub text: String,
    pub source: String,
    pub target: String,
    pub format: String,
    pub alternatives: u32,
}

struct CachedEntry {
    value: Value,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<TranslationQuery, CachedEntry>,
    order: VecDeque<(TranslationQuery, Instant)>,
}

pub struct TranslationCache {
    ttl: Duration,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl TranslationCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn get(&self, key: &TranslationQuery) -> Option<Value> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let expired = match state.entries.get(key) {
            Some(entry) if now.duration_since(entry.inserted_at) < self.ttl => {
                return Some(entry.value.clone())
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            state.entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: TranslationQuery, value: Value) {
        let now = Instant::now();
        let mut state = self.state.lock();
        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.capacity {
                if !Self::evict_oldest(&mut state) {
                    break;
                }
            }
        }
        state.order.push_back((key.clone(), now));
        state.entries.insert(
            key,
            CachedEntry {
                value,
                inserted_at: now,
            },
        );
    }

    fn evict_oldest(state: &mut CacheState) -> bool {
        while let Some((key, inserted_at)) = state.order.pop_front() {
            let live = state
                .entries
                .get(&key)
                .is_some_and(|entry| entry.inserted_at == inserted_at);
            if live {
                state.entries.remove(&key);
                return true;
            }
        }
        false
    }

    /// Drop everything, returning how many entries were held.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let cleared = state.entries.len();
        state.entries.clear();
        state.order.clear();
        cleared
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(text: &str) -> TranslationQuery {
        TranslationQuery {
            text: text.into(),
            source: "en".into(),
            target: "es".into(),
            format: "text".into(),
            alternatives: 3,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = TranslationCache::new(Duration::from_secs(3600), 10);
        cache.insert(query("hello"), json!({"translatedText": "hola"}));
        assert_eq!(cache.get(&query("hello")).unwrap()["translatedText"], "hola");

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(cache.get(&query("hello")).is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn full_cache_evicts_oldest_insertion() {
        let cache = TranslationCache::new(Duration::from_secs(3600), 2);
        cache.insert(query("a"), json!(1));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.insert(query("b"), json!(2));
        tokio::time::advance(Duration::from_millis(1)).await;
        // Refreshing "a" makes "b" the oldest live insertion.
        cache.insert(query("a"), json!(3));
        tokio::time::advance(Duration::from_millis(1)).await;
        cache.insert(query("c"), json!(4));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&query("a")), Some(json!(3)));
        assert!(cache.get(&query("b")).is_none());
        assert_eq!(cache.get(&query("c")), Some(json!(4)));
    }

    #[test]
    fn key_distinguishes_every_field() {
        let mut other = query("hello");
        other.alternatives = 1;
        assert_ne!(query("hello"), other);
    }

    #[tokio::test]
    async fn clear_reports_count() {
        let cache = TranslationCache::new(Duration::from_secs(60), 10);
        cache.insert(query("a"), json!(1));
        cache.insert(query("b"), json!(2));
        assert_eq!(cache.clear(), 2);
        assert_eq!(cache.clear(), 0);
    }
}
