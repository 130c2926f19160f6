//! In-memory key/value storage, shared by every replication backend.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::debug;

/// Stores key/value pairs in memory, behind a single mutex.
///
/// Every operation here completes without suspension -- callers on the
/// async side never hold this lock across an `.await`.
pub struct Store {
    data: Mutex<HashMap<String, String>>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(HashMap::new()),
        }
    }

    /// Get the value of the entry with the specified key.
    pub fn get(&self, key: &str) -> Option<String> {
        let data = self.data.lock().unwrap();
        let result = data.get(key).cloned();
        debug!(key, found = result.is_some(), "store get");
        result
    }

    /// Store a new entry, or overwrite an existing one.
    pub fn put(&self, key: String, value: String) {
        debug!(key = %key, value = %value, "store put");
        let mut data = self.data.lock().unwrap();
        data.insert(key, value);
    }

    /// A stable snapshot of every key/value pair currently stored.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let data = self.data.lock().unwrap();
        data.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_key_returns_none() {
        let store = Store::new();
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn put_then_get_round_trips() {
        let store = Store::new();
        store.put("key1".into(), "hello".into());
        assert_eq!(store.get("key1"), Some("hello".into()));
    }

    #[test]
    fn later_write_wins() {
        let store = Store::new();
        store.put("k".into(), "v1".into());
        store.put("k".into(), "v2".into());
        assert_eq!(store.get("k"), Some("v2".into()));
    }

    #[test]
    fn snapshot_reflects_all_entries() {
        let store = Store::new();
        store.put("a".into(), "1".into());
        store.put("b".into(), "2".into());
        let mut snap = store.snapshot();
        snap.sort();
        assert_eq!(snap, vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())]);
    }
}
