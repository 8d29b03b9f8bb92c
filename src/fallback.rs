//! Local key-value fallback used to seed settings on a cold start.
//!
//! Stores are best effort. Read and write failures are logged and otherwise
//! ignored, so a broken fallback never blocks the remote settings path.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde_json::{Map, Value};

use crate::listeners::lock;

/// Best-effort local persistence for a handful of settings.
pub trait FallbackStore: Send + Sync {
    fn load(&self, key: &str) -> Option<Value>;
    fn store(&self, key: &str, value: &Value);
}

/// Process-local fallback.
#[derive(Debug, Default)]
pub struct MemoryFallback {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryFallback {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FallbackStore for MemoryFallback {
    fn load(&self, key: &str) -> Option<Value> {
        lock(&self.values).get(key).cloned()
    }

    fn store(&self, key: &str, value: &Value) {
        lock(&self.values).insert(key.to_owned(), value.clone());
    }
}

/// Fallback persisted as a single JSON object on disk.
#[derive(Debug)]
pub struct FileFallback {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    write: Mutex<()>,
}

impl FileFallback {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_object(&self) -> Option<Map<String, Value>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_error) => {
                #[cfg(feature = "tracing")]
                if _error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %_error, "fallback read failed");
                }
                return None;
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(object)) => Some(object),
            Ok(_) | Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(path = %self.path.display(), "fallback file is not a JSON object, ignoring");
                None
            }
        }
    }
}

impl FallbackStore for FileFallback {
    fn load(&self, key: &str) -> Option<Value> {
        self.read_object()?.remove(key)
    }

    fn store(&self, key: &str, value: &Value) {
        let _write = lock(&self.write);
        let mut object = self.read_object().unwrap_or_default();
        object.insert(key.to_owned(), value.clone());

        let written = serde_json::to_vec_pretty(&Value::Object(object))
            .map_err(std::io::Error::from)
            .and_then(|bytes| fs::write(&self.path, bytes));
        if let Err(_error) = written {
            #[cfg(feature = "tracing")]
            tracing::warn!(path = %self.path.display(), key, error = %_error, "fallback write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use serde_json::json;

    use super::{FallbackStore, FileFallback, MemoryFallback};

    fn scratch_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos())
            .unwrap_or_default();
        std::env::temp_dir().join(format!(
            "notebook-sync-{name}-{}-{nanos}.json",
            std::process::id()
        ))
    }

    #[test]
    fn memory_fallback_round_trips_values() {
        let store = MemoryFallback::new();
        assert_eq!(store.load("theme"), None);
        store.store("theme", &json!("light"));
        assert_eq!(store.load("theme"), Some(json!("light")));
    }

    #[test]
    fn file_fallback_keeps_other_keys() {
        let path = scratch_path("keys");
        let store = FileFallback::new(&path);

        store.store("theme", &json!("auto"));
        store.store("language", &json!("en-US"));

        let reopened = FileFallback::new(&path);
        assert_eq!(reopened.load("theme"), Some(json!("auto")));
        assert_eq!(reopened.load("language"), Some(json!("en-US")));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn missing_or_corrupt_file_loads_nothing() {
        let path = scratch_path("corrupt");
        let store = FileFallback::new(&path);
        assert_eq!(store.load("theme"), None);

        std::fs::write(&path, b"not json").expect("write scratch file");
        assert_eq!(store.load("theme"), None);

        store.store("theme", &json!("dark"));
        assert_eq!(store.load("theme"), Some(json!("dark")));
        let _ = std::fs::remove_file(path);
    }
}
