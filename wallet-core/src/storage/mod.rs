pub mod file;
pub mod memory;
pub mod paths;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use paths::WalletPaths;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::WalletResult;

/// Opaque persistent key-value storage backing the wallet.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> WalletResult<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> WalletResult<()>;
    /// Remove every key.
    fn clear(&self) -> WalletResult<()>;
}

/// Read a key and deserialize it into `T`.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> WalletResult<Option<T>> {
    match store.get(key)? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> WalletResult<()> {
    store.set(key, serde_json::to_value(value)?)
}
