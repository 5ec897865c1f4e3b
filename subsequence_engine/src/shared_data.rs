// Shared key-value context between background tasks and pattern rebuilds.
//
// A cloneable handle over `Arc<RwLock<HashMap<String, serde_json::Value>>>`.
// Every operation takes the lock once, so a single key is always read or
// written whole: readers never see a torn value. There are no multi-key
// transactions. A rebuild that reads two keys may see one before and one
// after a concurrent task's update. Write related values under one key (as a
// JSON object) when they must change together.
//
// A panic while the lock is held poisons it; the data is still consistent at
// key granularity, so poisoned locks are recovered rather than propagated.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;

#[derive(Clone, Debug, Default)]
pub struct SharedData {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Value>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Value>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.read().get(key).cloned()
    }

    /// The value as a float, if present and numeric.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.read().get(key).and_then(Value::as_f64)
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        self.read().get(key).and_then(Value::as_str).map(str::to_owned)
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.write().insert(key.into(), value.into());
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.write().remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.read().contains_key(key)
    }

    /// Read-modify-write one key under a single lock. `f` receives the
    /// current value (if any) and returns the new one; `None` removes the key.
    /// Returns the stored value.
    pub fn update<F>(&self, key: &str, f: F) -> Option<Value>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        let mut map = self.write();
        match f(map.get(key)) {
            Some(value) => {
                map.insert(key.to_string(), value.clone());
                Some(value)
            }
            None => {
                map.remove(key);
                None
            }
        }
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_get_remove() {
        let data = SharedData::new();
        data.set("density", 0.75);
        data.set("mood", "dark");
        assert_eq!(data.get_f64("density"), Some(0.75));
        assert_eq!(data.get_str("mood").as_deref(), Some("dark"));
        assert_eq!(data.get_f64("mood"), None);
        assert_eq!(data.remove("mood"), Some(json!("dark")));
        assert!(!data.contains("mood"));
        assert_eq!(data.keys(), vec!["density".to_string()]);
    }

    #[test]
    fn clones_share_storage() {
        let a = SharedData::new();
        let b = a.clone();
        a.set("x", 1);
        assert_eq!(b.get("x"), Some(json!(1)));
    }

    #[test]
    fn update_is_atomic_per_key() {
        let data = SharedData::new();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let data = data.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        data.update("count", |v| {
                            let n = v.and_then(Value::as_u64).unwrap_or(0);
                            Some(json!(n + 1))
                        });
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(data.get("count"), Some(json!(8000)));
    }

    #[test]
    fn update_returning_none_removes() {
        let data = SharedData::new();
        data.set("k", true);
        assert_eq!(data.update("k", |_| None), None);
        assert!(data.is_empty());
    }

    #[test]
    fn whole_values_are_never_torn() {
        let data = SharedData::new();
        data.set("pair", json!([0, 0]));
        let writer = {
            let data = data.clone();
            std::thread::spawn(move || {
                for i in 0..2000 {
                    data.set("pair", json!([i, i]));
                }
            })
        };
        for _ in 0..2000 {
            let pair = data.get("pair").unwrap();
            assert_eq!(pair[0], pair[1]);
        }
        writer.join().unwrap();
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        let data = SharedData::new();
        data.set("k", 1);
        let poisoner = data.clone();
        let _ = std::thread::spawn(move || {
            poisoner.update("k", |_| panic!("boom"));
        })
        .join();
        assert_eq!(data.get("k"), Some(json!(1)));
        data.set("k", 2);
        assert_eq!(data.get("k"), Some(json!(2)));
    }
}
