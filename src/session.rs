//! Per-connection session store.
//!
//! A [`SessionMap`] is created for every upgrade attempt before the transport
//! is touched, so the pre-upgrade hook can stash authentication or routing
//! state even when the handshake later fails. On success the handle moves
//! into the [`Connection`](crate::Connection); on failure it is simply
//! dropped.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

/// Factory producing one session store per connection attempt.
pub type SessionFactory = Arc<dyn Fn() -> Arc<SessionMap> + Send + Sync>;

/// Concurrent, string-keyed store of arbitrary per-connection values.
///
/// Values are held as `Arc<dyn Any + Send + Sync>` and recovered through
/// [`SessionMap::get`], which downcasts to the requested type. The map is
/// safe to share between the upgrade path and any task holding the
/// connection.
#[derive(Default)]
pub struct SessionMap {
    entries: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl SessionMap {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `value` under `key`, replacing any previous value.
    pub fn insert<T: Send + Sync + 'static>(&self, key: impl Into<String>, value: T) {
        self.entries.insert(key.into(), Arc::new(value));
    }

    /// Fetches the value under `key`, if present and of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.entries.get(key)?.value().clone();
        value.downcast::<T>().ok()
    }

    /// Removes the value under `key`; returns whether one was present.
    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Whether a value is stored under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no values.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for SessionMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMap")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_insert_and_get() {
        let map = SessionMap::new();
        map.insert("user_id", 42u64);
        map.insert("name", "alice".to_string());

        assert_eq!(*map.get::<u64>("user_id").unwrap(), 42);
        assert_eq!(*map.get::<String>("name").unwrap(), "alice");
    }

    #[test]
    fn get_with_the_wrong_type_is_none() {
        let map = SessionMap::new();
        map.insert("user_id", 42u64);
        assert!(map.get::<String>("user_id").is_none());
    }

    #[test]
    fn insert_replaces_and_remove_clears() {
        let map = SessionMap::new();
        map.insert("slot", 1u32);
        map.insert("slot", 2u32);
        assert_eq!(*map.get::<u32>("slot").unwrap(), 2);
        assert_eq!(map.len(), 1);

        assert!(map.remove("slot"));
        assert!(!map.remove("slot"));
        assert!(map.is_empty());
    }

    #[test]
    fn shared_across_threads() {
        let map = Arc::new(SessionMap::new());

        let writer = {
            let map = Arc::clone(&map);
            std::thread::spawn(move || {
                for i in 0..100u32 {
                    map.insert(format!("k{i}"), i);
                }
            })
        };
        writer.join().unwrap();

        assert_eq!(map.len(), 100);
        assert_eq!(*map.get::<u32>("k99").unwrap(), 99);
    }
}
