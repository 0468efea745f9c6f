use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{WalletError, WalletResult};

/// A wallet account as persisted. The private key exists only inside
/// `encrypted_private_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub address: String,
    pub display_name: String,
    pub encrypted_private_key: String,
    pub public_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Public view of an [`Account`], safe to hand to pages and the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub address: String,
    pub display_name: String,
    pub public_key: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            address: account.address.clone(),
            display_name: account.display_name.clone(),
            public_key: account.public_key.clone(),
            is_active: account.is_active,
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    pub id: String,
    pub name: String,
    pub rpc_endpoint: String,
    pub chain_id: u64,
    pub symbol: String,
    pub block_explorer_url: String,
    /// Etherscan-compatible API used for transaction history.
    #[serde(default)]
    pub explorer_api_url: Option<String>,
    #[serde(default)]
    pub is_active: bool,
}

pub const DEFAULT_NETWORK_ID: &str = "ethereum-mainnet";

/// Built-in network registry. Mainnet is active.
pub fn default_networks() -> Vec<Network> {
    vec![
        Network {
            id: DEFAULT_NETWORK_ID.to_string(),
            name: "Ethereum Mainnet".to_string(),
            rpc_endpoint: "https://ethereum-rpc.publicnode.com".to_string(),
            chain_id: 1,
            symbol: "ETH".to_string(),
            block_explorer_url: "https://etherscan.io".to_string(),
            explorer_api_url: Some("https://api.etherscan.io/api".to_string()),
            is_active: true,
        },
        Network {
            id: "ethereum-sepolia".to_string(),
            name: "Ethereum Sepolia".to_string(),
            rpc_endpoint: "https://ethereum-sepolia-rpc.publicnode.com".to_string(),
            chain_id: 11_155_111,
            symbol: "ETH".to_string(),
            block_explorer_url: "https://sepolia.etherscan.io".to_string(),
            explorer_api_url: Some("https://api-sepolia.etherscan.io/api".to_string()),
            is_active: false,
        },
        Network {
            id: "polygon-mainnet".to_string(),
            name: "Polygon Mainnet".to_string(),
            rpc_endpoint: "https://polygon-rpc.com".to_string(),
            chain_id: 137,
            symbol: "MATIC".to_string(),
            block_explorer_url: "https://polygonscan.com".to_string(),
            explorer_api_url: Some("https://api.polygonscan.com/api".to_string()),
            is_active: false,
        },
    ]
}

/// A registry may not repeat a network id or a chain id.
pub fn ensure_unique_networks(networks: &[Network]) -> WalletResult<()> {
    let mut ids = HashSet::new();
    let mut chain_ids = HashSet::new();
    for network in networks {
        if !ids.insert(network.id.as_str()) {
            return Err(WalletError::ValidationError(format!(
                "Duplicate network id {}",
                network.id
            )));
        }
        if !chain_ids.insert(network.chain_id) {
            return Err(WalletError::ValidationError(format!(
                "Duplicate chain id {}",
                network.chain_id
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

/// A transaction this wallet signed and broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Decimal ether string as entered.
    pub amount: String,
    pub gas_price: Option<String>,
    pub gas_limit: Option<String>,
    pub nonce: Option<u64>,
    pub data: Option<String>,
    pub status: TransactionStatus,
    pub hash: Option<String>,
    pub raw_transaction: Option<String>,
    pub created_at: DateTime<Utc>,
    pub network_id: String,
}

impl PendingTransaction {
    pub fn new(from: String, to: String, amount: String, network_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from,
            to,
            amount,
            gas_price: None,
            gas_limit: None,
            nonce: None,
            data: None,
            status: TransactionStatus::Pending,
            hash: None,
            raw_transaction: None,
            created_at: Utc::now(),
            network_id,
        }
    }

    /// Move to a terminal status. Statuses only ever advance out of `Pending`.
    pub fn transition(&mut self, next: TransactionStatus) -> WalletResult<()> {
        if self.status.is_terminal() || !next.is_terminal() {
            return Err(WalletError::ValidationError(format!(
                "Invalid transaction status transition: {:?} -> {:?}",
                self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }
}

/// Parameters of a user-initiated value transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendTransactionParams {
    #[serde(default)]
    pub to: String,
    /// Decimal ether amount.
    #[serde(default)]
    pub amount: Option<String>,
    /// Gas price in wei.
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub gas_limit: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

/// Entry of an address's on-chain history as reported by an explorer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub hash: String,
    pub from: String,
    pub to: String,
    /// Value in wei, decimal.
    pub value: String,
    pub block_number: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: TransactionStatus,
}

/// Persisted credential material for the master password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordRecord {
    pub digest: String,
    pub encrypted_password: String,
    pub kdf_iterations: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletPhase {
    Uninitialized,
    Locked,
    Unlocked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletStatus {
    pub phase: WalletPhase,
    pub is_initialized: bool,
    pub is_unlocked: bool,
    /// Populated only while unlocked.
    pub accounts: Vec<AccountView>,
    pub current_account: Option<AccountView>,
    pub current_network: Option<Network>,
}
