//! Explicit, injected cache for expensive aggregations.
//!
//! Entries carry the time they were stored. Writers call
//! [`StatsCache::invalidate`] for the key they touched; readers may pass a
//! maximum age on top of that.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;

use crate::clock::Clock;

pub struct StatsCache<K, V> {
    entries: Mutex<HashMap<K, (V, OffsetDateTime)>>,
    max_age: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl<K, V> StatsCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    /// `max_age: None` keeps entries until invalidated.
    pub fn new(clock: Arc<dyn Clock>, max_age: Option<Duration>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_age,
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (V, OffsetDateTime)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The cached value, unless absent or older than `max_age`.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let (value, stored_at) = entries.get(key)?;
        if let Some(max_age) = self.max_age {
            if now - *stored_at >= max_age {
                entries.remove(key);
                return None;
            }
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        let now = self.clock.now();
        self.lock().insert(key, (value, now));
    }

    /// Drop one key. Returns whether it was cached.
    pub fn invalidate(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use time::macros::datetime;

    fn cache(max_age: Option<Duration>) -> (Arc<ManualClock>, StatsCache<i64, u64>) {
        let clock = Arc::new(ManualClock::new(datetime!(2025-01-01 00:00:00 UTC)));
        (clock.clone(), StatsCache::new(clock, max_age))
    }

    #[test]
    fn invalidate_drops_only_that_key() {
        let (_clock, cache) = cache(None);
        cache.insert(1, 10);
        cache.insert(2, 20);
        assert!(cache.invalidate(&1));
        assert!(!cache.invalidate(&1));
        assert_eq!(cache.get(&1), None);
        assert_eq!(cache.get(&2), Some(20));
    }

    #[test]
    fn entries_expire_at_max_age() {
        let (clock, cache) = cache(Some(Duration::from_secs(60)));
        cache.insert(1, 10);
        clock.advance(Duration::from_secs(59));
        assert_eq!(cache.get(&1), Some(10));
        clock.advance(Duration::from_secs(1));
        assert_eq!(cache.get(&1), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn reinsert_refreshes_timestamp_and_clear_empties() {
        let (clock, cache) = cache(Some(Duration::from_secs(10)));
        cache.insert(1, 10);
        clock.advance(Duration::from_secs(8));
        cache.insert(1, 11);
        clock.advance(Duration::from_secs(8));
        assert_eq!(cache.get(&1), Some(11));
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
