use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::WalletError;
use crate::models::SendTransactionParams;

/// Messages the extension UI and content script send to the background.
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackgroundMessage {
    GetWalletStatus,
    #[serde(rename_all = "camelCase")]
    CreateWallet {
        password: String,
        #[serde(default)]
        mnemonic: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    UnlockWallet { password: String },
    LockWallet,
    GetAccounts,
    #[serde(rename_all = "camelCase")]
    GetBalance { address: String },
    SendTransaction(SendTransactionParams),
    #[serde(rename_all = "camelCase")]
    SwitchAccount { account_id: String },
    GetNetworks,
    #[serde(rename_all = "camelCase")]
    SwitchNetwork { network_id: String },
    ConnectWallet,
    DisconnectWallet,
    #[serde(rename_all = "camelCase")]
    WalletRequest {
        method: String,
        #[serde(default)]
        params: Vec<Value>,
    },
}

impl BackgroundMessage {
    /// Wire name of the message, safe to log.
    pub fn kind(&self) -> &'static str {
        match self {
            BackgroundMessage::GetWalletStatus => "GET_WALLET_STATUS",
            BackgroundMessage::CreateWallet { .. } => "CREATE_WALLET",
            BackgroundMessage::UnlockWallet { .. } => "UNLOCK_WALLET",
            BackgroundMessage::LockWallet => "LOCK_WALLET",
            BackgroundMessage::GetAccounts => "GET_ACCOUNTS",
            BackgroundMessage::GetBalance { .. } => "GET_BALANCE",
            BackgroundMessage::SendTransaction(_) => "SEND_TRANSACTION",
            BackgroundMessage::SwitchAccount { .. } => "SWITCH_ACCOUNT",
            BackgroundMessage::GetNetworks => "GET_NETWORKS",
            BackgroundMessage::SwitchNetwork { .. } => "SWITCH_NETWORK",
            BackgroundMessage::ConnectWallet => "CONNECT_WALLET",
            BackgroundMessage::DisconnectWallet => "DISCONNECT_WALLET",
            BackgroundMessage::WalletRequest { .. } => "WALLET_REQUEST",
        }
    }
}

/// `{success, data?, error?}` envelope returned for every background message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error code: EIP-1193 for provider requests, wallet error code otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<Value>,
}

impl MessageResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
            code: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            code: None,
        }
    }
}

impl From<WalletError> for MessageResponse {
    fn from(error: WalletError) -> Self {
        Self {
            code: Some(Value::from(error.code())),
            ..Self::failure(error.to_string())
        }
    }
}

impl From<ProviderError> for MessageResponse {
    fn from(error: ProviderError) -> Self {
        Self {
            code: Some(Value::from(error.code)),
            ..Self::failure(error.message)
        }
    }
}

/// EIP-1193 provider error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderError {
    pub code: i64,
    pub message: String,
}

impl ProviderError {
    pub const UNAUTHORIZED: i64 = 4100;
    pub const UNSUPPORTED_METHOD: i64 = 4200;
    pub const UNRECOGNIZED_CHAIN: i64 = 4902;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;

    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, message)
    }

    pub fn unsupported(method: &str) -> Self {
        Self::new(
            Self::UNSUPPORTED_METHOD,
            format!("Unsupported method: {}", method),
        )
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ProviderError {}

impl From<WalletError> for ProviderError {
    fn from(error: WalletError) -> Self {
        let code = match error {
            WalletError::WalletLocked
            | WalletError::SessionExpired
            | WalletError::LockedOut { .. } => Self::UNAUTHORIZED,
            WalletError::ValidationError(_) | WalletError::NotFound(_) => Self::INVALID_PARAMS,
            _ => Self::INTERNAL_ERROR,
        };
        Self::new(code, error.to_string())
    }
}

/// What the connected page currently sees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub is_connected: bool,
    pub accounts: Vec<String>,
    pub selected_address: Option<String>,
    /// Active chain id as a `0x` quantity.
    pub chain_id: String,
}
