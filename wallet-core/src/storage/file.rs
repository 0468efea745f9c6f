use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{KeyValueStore, WalletPaths};
use crate::errors::{WalletError, WalletResult};

/// Backups kept after a destructive `clear`.
const BACKUPS_TO_KEEP: usize = 3;

/// Durable store: a single JSON object file rewritten atomically on every
/// mutation (write to `.new`, fsync, rename).
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    paths: Option<WalletPaths>,
    entries: Mutex<Map<String, Value>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> WalletResult<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = read_entries(&path)?;
        Ok(Self {
            path,
            paths: None,
            entries: Mutex::new(entries),
        })
    }

    /// Open the store inside a wallet directory; `clear` then snapshots the
    /// file into the backup directory first.
    pub fn from_paths(paths: &WalletPaths) -> WalletResult<Self> {
        let mut store = Self::open(paths.store_file())?;
        store.paths = Some(paths.clone());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Swap in a backup produced before a `clear` and reload it.
    pub fn restore_from_backup(&self, backup_path: &Path) -> WalletResult<()> {
        let paths = self
            .paths
            .as_ref()
            .ok_or_else(|| WalletError::StorageError("Store has no backup directory".to_string()))?;
        let mut entries = self.entries.lock();
        paths.restore_store_from_backup(backup_path)?;
        *entries = read_entries(&self.path)?;
        Ok(())
    }

    fn persist(&self, entries: &Map<String, Value>) -> WalletResult<()> {
        let dir = self
            .path
            .parent()
            .ok_or_else(|| WalletError::StorageError("Invalid store path".to_string()))?;
        fs::create_dir_all(dir)?;

        let tmp_path = self.path.with_extension("new");
        let mut file = File::create(&tmp_path)?;
        file.write_all(&serde_json::to_vec_pretty(entries)?)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn snapshot_before_clear(&self) -> WalletResult<()> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        if !self.path.exists() {
            return Ok(());
        }
        let backup = paths.create_store_backup()?;
        log::info!("Store snapshot written to {}", backup.display());
        paths.prune_old_backups(BACKUPS_TO_KEEP)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> WalletResult<Option<Value>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> WalletResult<()> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_string(), value);
        self.persist(&next)?;
        *entries = next;
        Ok(())
    }

    fn clear(&self) -> WalletResult<()> {
        let mut entries = self.entries.lock();
        self.snapshot_before_clear()?;
        self.persist(&Map::new())?;
        entries.clear();
        Ok(())
    }
}

fn read_entries(path: &Path) -> WalletResult<Map<String, Value>> {
    if !path.exists() {
        return Ok(Map::new());
    }

    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(&bytes)? {
        Value::Object(map) => Ok(map),
        _ => Err(WalletError::StorageError(format!(
            "Store file {} is not a JSON object",
            path.display()
        ))),
    }
}
