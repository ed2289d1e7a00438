use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

/// A map of shared values that also remembers negative lookups, so that a
/// resolver runs at most once per key.
pub struct SharedMap<K, V: ?Sized> {
    inner: Mutex<HashMap<K, Option<Arc<V>>>>,
}

impl<K, V: ?Sized> SharedMap<K, V> {
    pub fn new() -> SharedMap<K, V> {
        SharedMap {
            inner: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V: ?Sized> Default for SharedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq, V: ?Sized> SharedMap<K, V> {
    pub fn insert(&self, k: K, v: Arc<V>) -> Option<Arc<V>> {
        self.inner.lock().expect("lock poisoned").insert(k, Some(v)).flatten()
    }

    /// Returns the cached entry for `k`, running `resolve` to fill it if the
    /// key was never looked up. A `None` from `resolve` is cached as well.
    /// `resolve` runs with the map locked and must not touch the map.
    pub fn get_or_resolve<F>(&self, k: K, resolve: F) -> Option<Arc<V>>
    where
        F: FnOnce(&K) -> Option<Arc<V>>,
    {
        let mut inner = self.inner.lock().expect("lock poisoned");
        if let Some(v) = inner.get(&k) {
            return v.clone();
        }
        let v = resolve(&k);
        inner.insert(k, v.clone());
        v
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn resolver_runs_once_even_when_it_finds_nothing() {
        let map: SharedMap<String, str> = SharedMap::new();
        let runs = Cell::new(0);
        for _ in 0..3 {
            let v = map.get_or_resolve("missing".to_owned(), |_| {
                runs.set(runs.get() + 1);
                None
            });
            assert!(v.is_none());
        }
        assert_eq!(runs.get(), 1);

        map.insert("missing".to_owned(), Arc::from("found"));
        let v = map.get_or_resolve("missing".to_owned(), |_| None);
        assert_eq!(v.as_deref(), Some("found"));
    }
}
