use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Reader-lock-on-hit TTL cache for catalog responses. Negative results are
/// never inserted; a concurrent stampede on the same key is tolerated (rare
/// and bounded by the vendor timeout).
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, (V, Instant)>>,
    ttl: Duration,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read().expect("ttl cache");
        let (value, stored_at) = entries.get(key)?;
        if stored_at.elapsed() >= self.ttl {
            return None;
        }
        Some(value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .expect("ttl cache")
            .insert(key, (value, Instant::now()));
    }

    pub fn clear(&self) {
        self.entries.write().expect("ttl cache").clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("ttl cache").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_until_ttl() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::from_secs(300));
        assert!(cache.get(&"k".to_string()).is_none());
        cache.insert("k".to_string(), 7);
        assert_eq!(cache.get(&"k".to_string()), Some(7));
    }

    #[test]
    fn expired_entries_miss() {
        let cache: TtlCache<String, u32> = TtlCache::new(Duration::ZERO);
        cache.insert("k".to_string(), 7);
        assert!(cache.get(&"k".to_string()).is_none());
    }
}
