// lib.rs - Core library structure for the extension wallet

pub mod api;
pub mod app_state;
pub mod chain_client;
pub mod config_store;
pub mod errors;
pub mod models;
pub mod provider;
pub mod security;
pub mod session;
pub mod signer;
pub mod storage;
pub mod throttle;
pub mod units;
pub mod validation;
pub mod vault;

// Re-export common types
pub use api::{BackgroundMessage, ConnectionState, MessageResponse, ProviderError};
pub use app_state::{SharedWalletContext, WalletContext};
pub use chain_client::{ChainClient, JsonRpcChainClient};
pub use config_store::{ConfigStore, WalletConfig};
pub use errors::{WalletError, WalletResult};
pub use models::{
    Account, AccountView, Network, PendingTransaction, SendTransactionParams, TransactionRecord,
    TransactionStatus, WalletPhase, WalletStatus,
};
pub use provider::ProviderFacade;
pub use security::{Environment, PolicyOverrides, SecurityPolicy};
pub use session::{SessionConfig, WalletSession};
pub use signer::{Secp256k1Signer, SigningProvider};
pub use storage::{FileStore, KeyValueStore, MemoryStore, WalletPaths};
pub use throttle::{AttemptCheck, ThrottleGuard, ThrottlePolicy};
pub use units::Amount;
pub use validation::{InputValidator, ValidationOutcome};
pub use vault::CredentialVault;
