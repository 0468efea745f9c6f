use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use super::KeyValueStore;
use crate::errors::WalletResult;

/// Process-local store, used by tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> WalletResult<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> WalletResult<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn clear(&self) -> WalletResult<()> {
        self.entries.lock().clear();
        Ok(())
    }
}
