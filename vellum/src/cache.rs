use std::collections::HashMap;
use std::collections::VecDeque;
use std::hash::Hash;

/// A bounded cache with least-recently-used eviction.
///
/// The cache is not internally synchronized; the environment wraps it
/// in a mutex and performs lookup-or-insert under a single lock so
/// that two renders requesting the same missing key cannot race.
pub(crate) struct LruCache<K, V> {
    capacity: usize,
    map: HashMap<K, V>,
    order: VecDeque<K>,
}

impl<K: Clone + Eq + Hash, V> LruCache<K, V> {
    pub fn new(capacity: usize) -> LruCache<K, V> {
        LruCache {
            capacity: capacity.max(1),
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|x| x == key) {
            let key = self.order.remove(pos).unwrap();
            self.order.push_back(key);
        }
    }

    /// Looks up a key, marking it as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.map.contains_key(key) {
            self.touch(key);
        }
        self.map.get(key)
    }

    /// Inserts a value, evicting the least recently used entry when
    /// the cache is full.
    pub fn insert(&mut self, key: K, value: V) {
        if self.map.contains_key(&key) {
            self.touch(&key);
            self.map.insert(key, value);
            return;
        }
        if self.map.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.map.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.map.insert(key, value);
    }

    /// Removes an entry.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        if let Some(pos) = self.order.iter().position(|x| x == key) {
            self.order.remove(pos);
        }
        self.map.remove(key)
    }

    /// Removes all entries.
    pub fn clear(&mut self) {
        self.map.clear();
        self.order.clear();
    }

    /// Returns the value for a key, inserting it with the given
    /// fallible constructor if missing.
    pub fn get_or_try_insert_with<E, F: FnOnce() -> Result<V, E>>(
        &mut self,
        key: &K,
        f: F,
    ) -> Result<&V, E> {
        if !self.map.contains_key(key) {
            let value = f()?;
            self.insert(key.clone(), value);
        } else {
            self.touch(key);
        }
        Ok(self.map.get(key).unwrap())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[cfg(test)]
    pub fn contains_key(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_eviction_order() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("b", 2);
        // touching a makes b the eviction candidate
        assert_eq!(cache.get(&"a"), Some(&1));
        cache.insert("c", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&"a"));
        assert!(!cache.contains_key(&"b"));
        assert!(cache.contains_key(&"c"));
    }

    #[test]
    fn test_get_or_try_insert() {
        let mut cache = LruCache::new(2);
        let value: Result<&i32, ()> = cache.get_or_try_insert_with(&"a", || Ok(42));
        assert_eq!(value, Ok(&42));
        let mut called = false;
        let value: Result<&i32, ()> = cache.get_or_try_insert_with(&"a", || {
            called = true;
            Ok(0)
        });
        assert_eq!(value, Ok(&42));
        assert!(!called);
    }

    #[test]
    fn test_insert_existing_updates() {
        let mut cache = LruCache::new(2);
        cache.insert("a", 1);
        cache.insert("a", 2);
        assert_eq!(cache.get(&"a"), Some(&2));
        assert_eq!(cache.len(), 1);
    }
}
