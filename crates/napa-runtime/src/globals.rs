//! Container-scoped global values.
//!
//! Values set on a container are visible to every isolate of that container.
//! Host code gets them back with their concrete type; JavaScript sees the
//! JSON-representable ones through `napa.getGlobalValue(key)`.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::RuntimeError;

/// A value stored in container scope.
pub type GlobalValue = Arc<dyn Any + Send + Sync>;

/// Key/value store shared by a container and its workers.
#[derive(Default)]
pub struct GlobalStore {
    values: DashMap<String, GlobalValue>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a value.
    pub fn set(&self, key: &str, value: GlobalValue) -> Result<(), RuntimeError> {
        if key.is_empty() {
            return Err(RuntimeError::GlobalValue("key must not be empty".to_string()));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    /// Get a value if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let value = self.values.get(key)?.value().clone();
        value.downcast::<T>().ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// JSON view of a value, for JavaScript.
    pub fn get_json(&self, key: &str) -> Option<serde_json::Value> {
        let entry = self.values.get(key)?;
        let value = entry.value();

        if let Some(v) = value.downcast_ref::<serde_json::Value>() {
            return Some(v.clone());
        }
        if let Some(s) = value.downcast_ref::<String>() {
            return Some(serde_json::Value::String(s.clone()));
        }
        if let Some(b) = value.downcast_ref::<bool>() {
            return Some(serde_json::Value::Bool(*b));
        }
        if let Some(n) = value.downcast_ref::<i64>() {
            return Some(serde_json::Value::from(*n));
        }
        if let Some(n) = value.downcast_ref::<f64>() {
            return serde_json::Number::from_f64(*n).map(serde_json::Value::Number);
        }
        None
    }
}

impl std::fmt::Debug for GlobalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let keys: Vec<String> = self.values.iter().map(|e| e.key().clone()).collect();
        f.debug_struct("GlobalStore").field("keys", &keys).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Handle {
        id: u32,
    }

    #[test]
    fn test_set_and_get_typed() {
        let store = GlobalStore::new();
        store.set("handle", Arc::new(Handle { id: 7 })).unwrap();

        let handle = store.get::<Handle>("handle").unwrap();
        assert_eq!(handle.id, 7);
        assert!(store.get::<String>("handle").is_none());
        assert!(store.get::<Handle>("missing").is_none());
    }

    #[test]
    fn test_empty_key_is_rejected() {
        let store = GlobalStore::new();
        let err = store.set("", Arc::new(1i64)).unwrap_err();
        assert!(matches!(err, RuntimeError::GlobalValue(_)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let store = GlobalStore::new();
        store.set("k", Arc::new("a".to_string())).unwrap();
        store.set("k", Arc::new("b".to_string())).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get::<String>("k").unwrap().as_str(), "b");
    }

    #[test]
    fn test_json_view() {
        let store = GlobalStore::new();
        store.set("json", Arc::new(serde_json::json!({"a": [1, 2]}))).unwrap();
        store.set("text", Arc::new("hi".to_string())).unwrap();
        store.set("flag", Arc::new(true)).unwrap();
        store.set("int", Arc::new(-3i64)).unwrap();
        store.set("float", Arc::new(1.5f64)).unwrap();
        store.set("opaque", Arc::new(Handle { id: 1 })).unwrap();

        assert_eq!(store.get_json("json"), Some(serde_json::json!({"a": [1, 2]})));
        assert_eq!(store.get_json("text"), Some(serde_json::json!("hi")));
        assert_eq!(store.get_json("flag"), Some(serde_json::json!(true)));
        assert_eq!(store.get_json("int"), Some(serde_json::json!(-3)));
        assert_eq!(store.get_json("float"), Some(serde_json::json!(1.5)));
        assert_eq!(store.get_json("opaque"), None);
        assert_eq!(store.get_json("missing"), None);
    }
}
