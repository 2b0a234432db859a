//! Persisted preferences behind a narrow key-value seam.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde_json::{Map, Value};
use tracing::warn;

use crate::app::error::AppError;

pub const PAIRED_KEY: &str = "paired";
pub const SHOW_REVIEW_KEY: &str = "show_review";
pub const TIME_OPTIONS_KEY: &str = "time_options";

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value) -> Result<(), AppError>;

    fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|value| value.as_bool())
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), AppError> {
        self.set(key, Value::Bool(value))
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(value) => Some(value),
            _ => None,
        }
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), AppError> {
        self.set(key, Value::String(value.to_string()))
    }
}

/// A JSON object on disk, rewritten on every `set`.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    values: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Opens `path`; a missing file starts empty, an unreadable one is logged and ignored.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path)
                .map_err(|err| AppError::system(format!("Failed to read preferences: {err}"), ""))?;
            match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(values) => values,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "preferences file is corrupt, starting empty");
                    Map::new()
                }
            }
        } else {
            Map::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let payload = serde_json::to_string_pretty(values)
            .map_err(|err| AppError::system(format!("Failed to serialize preferences: {err}"), ""))?;
        fs::write(&self.path, payload)
            .map_err(|err| AppError::system(format!("Failed to write preferences: {err}"), ""))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        let mut guard = self
            .values
            .lock()
            .map_err(|_| AppError::system("preferences lock poisoned", ""))?;
        guard.insert(key.to_string(), value);
        self.persist(&guard)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<(), AppError> {
        self.values
            .lock()
            .map_err(|_| AppError::system("preferences lock poisoned", ""))?
            .insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("preferences.json");

        let store = JsonFileStore::open(&path).expect("open");
        assert_eq!(store.get_bool(PAIRED_KEY), None);
        store.set_bool(PAIRED_KEY, true).expect("set");
        store.set_string("last_app", "com.netflix.ninja").expect("set");

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.get_bool(PAIRED_KEY), Some(true));
        assert_eq!(reopened.get_string("last_app").as_deref(), Some("com.netflix.ninja"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("preferences.json");
        fs::write(&path, "not json").expect("write");
        let store = JsonFileStore::open(&path).expect("open");
        assert_eq!(store.get(PAIRED_KEY), None);
    }

    #[test]
    fn typed_getters_ignore_other_types() {
        let store = MemoryStore::new();
        store.set_string(SHOW_REVIEW_KEY, "yes").expect("set");
        assert_eq!(store.get_bool(SHOW_REVIEW_KEY), None);
        store.set_bool(SHOW_REVIEW_KEY, true).expect("set");
        assert_eq!(store.get_string(SHOW_REVIEW_KEY), None);
        assert_eq!(store.get_bool(SHOW_REVIEW_KEY), Some(true));
    }
}
