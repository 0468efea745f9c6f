use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{WalletError, WalletResult};
use crate::models::{default_networks, ensure_unique_networks, Network, DEFAULT_NETWORK_ID};
use crate::security::PolicyOverrides;
use crate::storage::WalletPaths;

const CONFIG_VERSION: u16 = 1;

/// Install-level settings: the network registry seed and policy tweaks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletConfig {
    pub networks: Vec<Network>,
    pub default_network: String,
    #[serde(default)]
    pub policy: PolicyOverrides,
    pub environment: String,
    pub last_updated: DateTime<Utc>,
    pub version: u16,
}

impl WalletConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            networks: default_networks(),
            default_network: DEFAULT_NETWORK_ID.to_string(),
            policy: PolicyOverrides::default(),
            environment: environment.into(),
            last_updated: Utc::now(),
            version: CONFIG_VERSION,
        }
    }

    pub fn touch(&mut self) {
        self.last_updated = Utc::now();
    }

    /// Configured networks with `default_network` marked active.
    pub fn seed_networks(&self) -> Vec<Network> {
        let mut networks = self.networks.clone();
        let known = networks.iter().any(|n| n.id == self.default_network);
        for (index, network) in networks.iter_mut().enumerate() {
            network.is_active = if known {
                network.id == self.default_network
            } else {
                index == 0
            };
        }
        networks
    }

    fn validate(&self) -> WalletResult<()> {
        if self.networks.is_empty() {
            return Err(WalletError::ValidationError(
                "Config must list at least one network".to_string(),
            ));
        }
        ensure_unique_networks(&self.networks)?;
        self.policy.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigEnvelope {
    version: u16,
    checksum: String,
    payload: WalletConfig,
}

/// Persists [`WalletConfig`] with a BLAKE3 integrity checksum.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_paths(paths: &WalletPaths) -> Self {
        Self {
            path: paths.config_file().to_path_buf(),
        }
    }

    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load_or_default(&self, environment: impl Into<String>) -> WalletResult<WalletConfig> {
        if !self.path.exists() {
            let config = WalletConfig::new(environment);
            self.save(&config)?;
            log::info!("Wrote default wallet config to {}", self.path.display());
            return Ok(config);
        }

        let bytes = fs::read(&self.path)?;
        let envelope: ConfigEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
            WalletError::ValidationError(format!("Config file is unreadable: {}", e))
        })?;
        if envelope.version != CONFIG_VERSION {
            return Err(WalletError::ValidationError(format!(
                "Unsupported config version {}",
                envelope.version
            )));
        }

        if checksum(&envelope.payload)? != envelope.checksum {
            log::warn!("Wallet config checksum mismatch");
            return Err(WalletError::ValidationError(
                "Config integrity verification failed".to_string(),
            ));
        }

        envelope.payload.validate()?;
        Ok(envelope.payload)
    }

    pub fn save(&self, config: &WalletConfig) -> WalletResult<()> {
        config.validate()?;
        let mut payload = config.clone();
        payload.touch();

        let envelope = ConfigEnvelope {
            version: CONFIG_VERSION,
            checksum: checksum(&payload)?,
            payload,
        };

        let serialized = serde_json::to_vec_pretty(&envelope)?;
        let tmp_path = self.path.with_extension("new");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    pub fn update<F>(&self, environment: impl Into<String>, updater: F) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let mut config = self.load_or_default(environment)?;
        updater(&mut config)?;
        self.save(&config)?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn checksum(config: &WalletConfig) -> WalletResult<String> {
    let encoded = serde_json::to_vec(config)?;
    Ok(blake3::hash(&encoded).to_hex().to_string())
}
