use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::errors::{WalletError, WalletResult};

/// Filesystem layout of the wallet data directory.
#[derive(Debug, Clone)]
pub struct WalletPaths {
    root_dir: PathBuf,
    /// Key-value store holding accounts, password record and selections.
    store_file: PathBuf,
    backup_dir: PathBuf,
    config_file: PathBuf,
}

impl WalletPaths {
    pub const DEFAULT_STORE_FILENAME: &'static str = "wallet-store.json";
    pub const BACKUP_EXTENSION: &'static str = "store.bak";

    pub fn new(root: impl AsRef<Path>) -> WalletResult<Self> {
        let root_dir = root.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(WalletError::StorageError(
                "Wallet root directory cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            store_file: root_dir.join(Self::DEFAULT_STORE_FILENAME),
            backup_dir: root_dir.join("backups"),
            config_file: root_dir.join("wallet.config"),
            root_dir,
        })
    }

    pub fn ensure_directories(&self) -> WalletResult<()> {
        fs::create_dir_all(&self.root_dir)?;
        fs::create_dir_all(&self.backup_dir)?;
        Ok(())
    }

    pub fn store_file(&self) -> &Path {
        &self.store_file
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Copy the store file into the backup directory under a timestamped name.
    pub fn create_store_backup(&self) -> WalletResult<PathBuf> {
        if !self.store_file.exists() {
            return Err(WalletError::NotFound(
                "Store file does not exist, cannot create backup".to_string(),
            ));
        }

        fs::create_dir_all(&self.backup_dir)?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let backup_path = self
            .backup_dir
            .join(format!("wallet_{}.{}", timestamp, Self::BACKUP_EXTENSION));

        fs::copy(&self.store_file, &backup_path)?;

        let original_size = fs::metadata(&self.store_file)?.len();
        let backup_size = fs::metadata(&backup_path)?.len();
        if original_size != backup_size {
            fs::remove_file(&backup_path)?;
            return Err(WalletError::StorageError(
                "Backup verification failed: size mismatch".to_string(),
            ));
        }

        Ok(backup_path)
    }

    /// Replace the store file with a backup. The current file is put back if
    /// the copy fails.
    pub fn restore_store_from_backup(&self, backup_path: impl AsRef<Path>) -> WalletResult<()> {
        let backup_path = backup_path.as_ref();
        if !backup_path.exists() {
            return Err(WalletError::NotFound(format!(
                "Backup file does not exist: {}",
                backup_path.display()
            )));
        }

        let rollback = if self.store_file.exists() {
            let rollback_path = self
                .backup_dir
                .join(format!("wallet_pre_restore_{}.tmp", Utc::now().timestamp()));
            fs::copy(&self.store_file, &rollback_path)?;
            Some(rollback_path)
        } else {
            None
        };

        match fs::copy(backup_path, &self.store_file) {
            Ok(_) => {
                if let Some(path) = rollback {
                    let _ = fs::remove_file(path);
                }
                Ok(())
            }
            Err(err) => {
                if let Some(path) = rollback {
                    let _ = fs::copy(&path, &self.store_file);
                    let _ = fs::remove_file(path);
                }
                Err(WalletError::StorageError(format!(
                    "Failed to restore store from backup: {}",
                    err
                )))
            }
        }
    }

    /// Backups, newest first.
    pub fn list_backups(&self) -> WalletResult<Vec<PathBuf>> {
        if !self.backup_dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups = Vec::new();
        for entry in fs::read_dir(&self.backup_dir)? {
            let path = entry?.path();
            let is_backup = path
                .file_name()
                .and_then(|name| name.to_str())
                .map(|name| name.ends_with(Self::BACKUP_EXTENSION))
                .unwrap_or(false);
            if path.is_file() && is_backup {
                backups.push(path);
            }
        }

        // Timestamped names sort chronologically.
        backups.sort_by(|a, b| b.cmp(a));
        Ok(backups)
    }

    pub fn prune_old_backups(&self, keep_count: usize) -> WalletResult<usize> {
        let backups = self.list_backups()?;
        let mut deleted = 0;
        for path in backups.iter().skip(keep_count) {
            fs::remove_file(path)?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
