use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletError {
    // Input errors
    ValidationError(String),

    // Lock state errors
    WalletLocked,
    LockedOut { retry_after_secs: u64 },
    SessionExpired,

    // Credential and signing errors
    DecryptionError,
    KeyGenerationError(String),
    SigningError(String),
    CryptoError(String),

    // Lookup errors
    NotFound(String),
    AlreadyExists(String),
    NotInitialized,

    // Infrastructure errors
    StorageError(String),
    NetworkError(String),
    InvalidResponse(String),
}

impl WalletError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            WalletError::ValidationError(_) => "VALIDATION_ERROR",
            WalletError::WalletLocked => "WALLET_LOCKED",
            WalletError::LockedOut { .. } => "LOCKED_OUT",
            WalletError::SessionExpired => "SESSION_EXPIRED",
            WalletError::DecryptionError => "DECRYPTION_ERROR",
            WalletError::KeyGenerationError(_) => "KEY_GENERATION_ERROR",
            WalletError::SigningError(_) => "SIGNING_ERROR",
            WalletError::CryptoError(_) => "CRYPTO_ERROR",
            WalletError::NotFound(_) => "NOT_FOUND",
            WalletError::AlreadyExists(_) => "ALREADY_EXISTS",
            WalletError::NotInitialized => "NOT_INITIALIZED",
            WalletError::StorageError(_) => "STORAGE_ERROR",
            WalletError::NetworkError(_) => "NETWORK_ERROR",
            WalletError::InvalidResponse(_) => "INVALID_RESPONSE",
        }
    }
}

impl fmt::Display for WalletError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WalletError::ValidationError(msg) => write!(f, "Validation error: {}", msg),

            WalletError::WalletLocked => write!(f, "Wallet is locked"),
            WalletError::LockedOut { retry_after_secs } => write!(
                f,
                "Too many failed attempts. Please try again in {}",
                retry_wait(*retry_after_secs)
            ),
            WalletError::SessionExpired => {
                write!(f, "Session expired. Please unlock your wallet again")
            }

            WalletError::DecryptionError => write!(f, "Failed to decrypt data"),
            WalletError::KeyGenerationError(msg) => write!(f, "Key generation failed: {}", msg),
            WalletError::SigningError(msg) => write!(f, "Signing failed: {}", msg),
            WalletError::CryptoError(msg) => write!(f, "Cryptographic error: {}", msg),

            WalletError::NotFound(msg) => write!(f, "Not found: {}", msg),
            WalletError::AlreadyExists(msg) => write!(f, "Already exists: {}", msg),
            WalletError::NotInitialized => write!(f, "Wallet not initialized"),

            WalletError::StorageError(msg) => write!(f, "Storage error: {}", msg),
            WalletError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            WalletError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for WalletError {}

/// Rounds up to whole minutes, or whole hours past two hours.
fn retry_wait(secs: u64) -> String {
    let minutes = secs.div_ceil(60).max(1);
    match minutes {
        1 => "1 minute".to_string(),
        2..=119 => format!("{} minutes", minutes),
        _ => match minutes.div_ceil(60) {
            hours @ 2..=24 => format!("{} hours", hours),
            _ => "more than a day".to_string(),
        },
    }
}

pub type WalletResult<T> = Result<T, WalletError>;

// Conversion helpers
impl From<std::io::Error> for WalletError {
    fn from(error: std::io::Error) -> Self {
        WalletError::StorageError(error.to_string())
    }
}

impl From<serde_json::Error> for WalletError {
    fn from(error: serde_json::Error) -> Self {
        WalletError::StorageError(format!("JSON error: {}", error))
    }
}
