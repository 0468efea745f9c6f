use std::sync::Arc;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::chain_client::ChainClient;
use crate::errors::{WalletError, WalletResult};
use crate::models::{
    default_networks, ensure_unique_networks, Account, AccountView, Network, PasswordRecord,
    PendingTransaction, SendTransactionParams, TransactionRecord, WalletPhase, WalletStatus,
};
use crate::signer::{KeyPair, SigningProvider, UnsignedTransaction};
use crate::storage::{self, KeyValueStore};
use crate::throttle::{ThrottleGuard, ThrottlePolicy};
use crate::units::{parse_quantity, Amount};
use crate::validation::{InputValidator, MIN_GAS_LIMIT};
use crate::vault::{CredentialVault, MIN_PBKDF2_ITERATIONS};

/// Throttle and session identifier for the wallet's master password.
pub const WALLET_IDENTIFIER: &str = "wallet";

pub const ACCOUNTS_KEY: &str = "wallet_accounts";
pub const PASSWORD_KEY: &str = "wallet_password";
pub const NETWORKS_KEY: &str = "wallet_networks";
pub const ACTIVE_NETWORK_KEY: &str = "wallet_active_network";

pub const DEFAULT_GAS_PRICE_GWEI: u128 = 20;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub throttle: ThrottlePolicy,
    pub kdf_iterations: u32,
    pub networks: Vec<Network>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            throttle: ThrottlePolicy::default(),
            kdf_iterations: MIN_PBKDF2_ITERATIONS,
            networks: default_networks(),
        }
    }
}

/// Secrets held only while unlocked. Dropping it wipes the password.
struct UnlockedSession {
    password: SecretString,
    /// Vault parameterised like the persisted password record.
    vault: CredentialVault,
    unlocked_at: DateTime<Utc>,
}

impl UnlockedSession {
    fn new(password: &SecretString, vault: CredentialVault) -> Self {
        Self {
            password: SecretString::from(password.expose_secret().to_string()),
            vault,
            unlocked_at: Utc::now(),
        }
    }
}

struct WalletState {
    accounts: Vec<Account>,
    networks: Vec<Network>,
    session: Option<UnlockedSession>,
}

/// Orchestrates account lifecycle, lock state and signing for one wallet.
///
/// All state sits behind one async mutex held for the whole of each
/// operation, so concurrent calls (two unlocks, say) are serialized.
pub struct WalletSession {
    store: Arc<dyn KeyValueStore>,
    signer: Arc<dyn SigningProvider>,
    chain: Arc<dyn ChainClient>,
    vault: CredentialVault,
    throttle: ThrottleGuard,
    validator: InputValidator,
    default_networks: Vec<Network>,
    state: Mutex<WalletState>,
}

impl WalletSession {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        signer: Arc<dyn SigningProvider>,
        chain: Arc<dyn ChainClient>,
        config: SessionConfig,
    ) -> WalletResult<Self> {
        let validator = InputValidator::new()?;
        let default_networks = if config.networks.is_empty() {
            default_networks()
        } else {
            config.networks
        };
        ensure_unique_networks(&default_networks)?;

        let mut networks: Vec<Network> =
            storage::load(store.as_ref(), NETWORKS_KEY)?.unwrap_or_else(|| default_networks.clone());
        ensure_unique_networks(&networks)?;
        let active_id: Option<String> = storage::load(store.as_ref(), ACTIVE_NETWORK_KEY)?;
        select_network(&mut networks, active_id.as_deref());

        Ok(Self {
            store,
            signer,
            chain,
            vault: CredentialVault::new(config.kdf_iterations),
            throttle: ThrottleGuard::new(config.throttle),
            validator,
            default_networks,
            state: Mutex::new(WalletState {
                accounts: Vec::new(),
                networks,
                session: None,
            }),
        })
    }

    pub fn validator(&self) -> &InputValidator {
        &self.validator
    }

    pub fn throttle(&self) -> &ThrottleGuard {
        &self.throttle
    }

    pub async fn create_wallet(
        &self,
        password: &SecretString,
        mnemonic: Option<&str>,
    ) -> WalletResult<AccountView> {
        let mut state = self.state.lock().await;

        self.validator.require_password(password.expose_secret())?;
        if let Some(phrase) = mnemonic {
            self.validator.require_mnemonic(phrase)?;
        }
        if self.password_record()?.is_some() {
            return Err(WalletError::AlreadyExists(
                "Wallet already initialized".to_string(),
            ));
        }

        let key_pair = self.signer.generate_key_pair(mnemonic)?;
        let account = new_account(&self.vault, &key_pair, "Account 1".to_string(), true, password)?;
        let record = PasswordRecord {
            digest: self.vault.hash(password),
            encrypted_password: self
                .vault
                .encrypt(password.expose_secret().as_bytes(), password)?,
            kdf_iterations: self.vault.iterations(),
        };

        let accounts = vec![account];
        storage::save(self.store.as_ref(), ACCOUNTS_KEY, &accounts)?;
        // Written last: a wallet counts as initialized only once this exists.
        storage::save(self.store.as_ref(), PASSWORD_KEY, &record)?;

        let view = AccountView::from(&accounts[0]);
        state.accounts = accounts;
        state.session = Some(UnlockedSession::new(password, self.vault));
        self.throttle.start_session(WALLET_IDENTIFIER);

        log::info!("Wallet created with account {}", view.address);
        Ok(view)
    }

    /// `Ok(false)` for a wrong password; errors are reserved for lockout and
    /// infrastructure failures.
    pub async fn unlock_wallet(&self, password: &SecretString) -> WalletResult<bool> {
        let mut state = self.state.lock().await;

        let record = self.password_record()?.ok_or(WalletError::NotInitialized)?;

        let check = self.throttle.check_attempt(WALLET_IDENTIFIER);
        if !check.allowed {
            let retry_after_secs = check.retry_after_secs.unwrap_or_default();
            log::warn!("Unlock refused: locked out for another {}s", retry_after_secs);
            return Err(WalletError::LockedOut { retry_after_secs });
        }

        // Digest check and KDF decrypt both run on every attempt.
        let record_vault = CredentialVault::new(record.kdf_iterations);
        let digest_matches = self.vault.verify(password, &record.digest);
        let decrypted = record_vault.decrypt(&record.encrypted_password, password);

        if !digest_matches {
            self.throttle.record_attempt(WALLET_IDENTIFIER, false);
            let remaining = self.throttle.check_attempt(WALLET_IDENTIFIER).remaining;
            log::warn!("Unlock failed: incorrect password ({} attempts remaining)", remaining);
            return Ok(false);
        }

        let stored = match decrypted {
            Ok(stored) => stored,
            Err(err) => {
                log::error!("Password record could not be decrypted ({})", err.code());
                return Err(err);
            }
        };
        if !bool::from(stored.as_slice().ct_eq(password.expose_secret().as_bytes())) {
            log::error!("Password record is inconsistent ({})", WalletError::DecryptionError.code());
            return Err(WalletError::DecryptionError);
        }

        self.throttle.record_attempt(WALLET_IDENTIFIER, true);

        let mut accounts: Vec<Account> =
            storage::load(self.store.as_ref(), ACCOUNTS_KEY)?.unwrap_or_default();
        if !accounts.is_empty() && accounts.iter().filter(|a| a.is_active).count() != 1 {
            let active = accounts.iter().position(|a| a.is_active).unwrap_or(0);
            for (index, account) in accounts.iter_mut().enumerate() {
                account.is_active = index == active;
            }
            storage::save(self.store.as_ref(), ACCOUNTS_KEY, &accounts)?;
        }

        state.accounts = accounts;
        state.session = Some(UnlockedSession::new(password, record_vault));
        self.throttle.start_session(WALLET_IDENTIFIER);

        log::info!("Wallet unlocked");
        Ok(true)
    }

    pub async fn lock_wallet(&self) {
        let mut state = self.state.lock().await;
        self.lock_state(&mut state);
    }

    pub async fn get_accounts(&self) -> WalletResult<Vec<AccountView>> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;
        Ok(state.accounts.iter().map(AccountView::from).collect())
    }

    pub async fn get_current_account(&self) -> WalletResult<Option<AccountView>> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;
        Ok(state
            .accounts
            .iter()
            .find(|a| a.is_active)
            .map(AccountView::from))
    }

    pub async fn set_current_account(&self, account_id: &str) -> WalletResult<AccountView> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;

        if !state.accounts.iter().any(|a| a.id == account_id) {
            return Err(WalletError::NotFound(format!("Account {}", account_id)));
        }

        let mut accounts = state.accounts.clone();
        for account in accounts.iter_mut() {
            account.is_active = account.id == account_id;
        }
        storage::save(self.store.as_ref(), ACCOUNTS_KEY, &accounts)?;
        state.accounts = accounts;

        let view = state
            .accounts
            .iter()
            .find(|a| a.is_active)
            .map(AccountView::from)
            .ok_or_else(|| WalletError::NotFound(format!("Account {}", account_id)))?;
        log::info!("Switched active account to {}", view.address);
        Ok(view)
    }

    pub async fn add_account(&self, display_name: Option<&str>) -> WalletResult<AccountView> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;

        let name = display_name
            .map(|name| self.validator.sanitize_input(name))
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Account {}", state.accounts.len() + 1));

        let key_pair = self.signer.generate_key_pair(None)?;
        let session = state.session.as_ref().ok_or(WalletError::WalletLocked)?;
        let account = new_account(&session.vault, &key_pair, name, false, &session.password)?;

        let mut accounts = state.accounts.clone();
        accounts.push(account);
        storage::save(self.store.as_ref(), ACCOUNTS_KEY, &accounts)?;
        state.accounts = accounts;

        let view = state
            .accounts
            .last()
            .map(AccountView::from)
            .ok_or_else(|| WalletError::NotFound("Account".to_string()))?;
        log::info!("Added account {}", view.address);
        Ok(view)
    }

    pub async fn get_networks(&self) -> Vec<Network> {
        self.state.lock().await.networks.clone()
    }

    pub async fn get_current_network(&self) -> Option<Network> {
        let state = self.state.lock().await;
        state.networks.iter().find(|n| n.is_active).cloned()
    }

    pub async fn set_current_network(&self, network_id: &str) -> WalletResult<Network> {
        let mut state = self.state.lock().await;

        let network = state
            .networks
            .iter()
            .find(|n| n.id == network_id)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(format!("Network {}", network_id)))?;

        storage::save(self.store.as_ref(), ACTIVE_NETWORK_KEY, &network.id)?;
        select_network(&mut state.networks, Some(network_id));

        log::info!("Switched network to {} (chain {})", network.name, network.chain_id);
        Ok(Network {
            is_active: true,
            ..network
        })
    }

    pub async fn add_network(&self, network: Network) -> WalletResult<Network> {
        let mut state = self.state.lock().await;
        self.validator.require_network(&network)?;

        if state.networks.iter().any(|n| n.id == network.id) {
            return Err(WalletError::AlreadyExists(format!("Network {}", network.id)));
        }
        if state.networks.iter().any(|n| n.chain_id == network.chain_id) {
            return Err(WalletError::AlreadyExists(format!(
                "Chain id {}",
                network.chain_id
            )));
        }

        let network = Network {
            is_active: false,
            ..network
        };
        let mut networks = state.networks.clone();
        networks.push(network.clone());
        storage::save(self.store.as_ref(), NETWORKS_KEY, &networks)?;
        state.networks = networks;

        log::info!("Added network {} (chain {})", network.name, network.chain_id);
        Ok(network)
    }

    pub async fn network_by_chain_id(&self, chain_id: u64) -> Option<Network> {
        let state = self.state.lock().await;
        state.networks.iter().find(|n| n.chain_id == chain_id).cloned()
    }

    pub async fn get_balance(&self, address: &str) -> WalletResult<Amount> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;
        self.validator.require_address(address)?;
        let network = active_network(&state)?;

        let wei = self.chain.get_balance(&network, address).await?;
        Ok(Amount::from_wei(wei))
    }

    pub async fn send_transaction(
        &self,
        params: SendTransactionParams,
    ) -> WalletResult<PendingTransaction> {
        let mut state = self.state.lock().await;
        if state.session.is_none() {
            return Err(WalletError::WalletLocked);
        }
        let account = active_account(&state)?;
        if account.encrypted_private_key.is_empty() {
            return Err(WalletError::NotFound(format!(
                "Key material for account {}",
                account.address
            )));
        }
        let network = active_network(&state)?;

        self.validator.require_transaction(&params)?;
        self.ensure_session(&mut state)?;

        let amount = match params.amount.as_deref().filter(|a| !a.is_empty()) {
            Some(amount) => Amount::from_ether_str(amount)?,
            None => Amount::default(),
        };
        let gas_price = match params.gas_price.as_deref().filter(|g| !g.is_empty()) {
            Some(price) => parse_quantity(price)?,
            None => Amount::from_gwei(DEFAULT_GAS_PRICE_GWEI)?.wei(),
        };
        let gas_limit = match params.gas_limit.as_deref().filter(|g| !g.is_empty()) {
            Some(limit) => parse_quantity(limit)?,
            None => MIN_GAS_LIMIT,
        };
        let data = match params.data.as_deref().filter(|d| !d.is_empty()) {
            Some(data) => hex::decode(data.trim_start_matches("0x"))
                .map_err(|_| WalletError::ValidationError("Invalid transaction data".to_string()))?,
            None => Vec::new(),
        };

        let nonce = self
            .chain
            .get_transaction_count(&network, &account.address)
            .await?;

        let unsigned = UnsignedTransaction {
            nonce,
            gas_price,
            gas_limit,
            to: params.to.clone(),
            value: amount.wei(),
            data,
            chain_id: network.chain_id,
        };

        let signed = {
            let session = state.session.as_ref().ok_or(WalletError::WalletLocked)?;
            let private_key = session
                .vault
                .decrypt(&account.encrypted_private_key, &session.password)?;
            self.signer.sign_transaction(&private_key, &unsigned)?
        };

        let hash = self
            .chain
            .send_raw_transaction(&network, &signed.raw_transaction)
            .await?;
        if !hash.eq_ignore_ascii_case(&signed.hash) {
            log::warn!("Node reported hash {} for locally computed {}", hash, signed.hash);
        }

        let mut pending = PendingTransaction::new(
            account.address.clone(),
            params.to,
            amount.to_ether_string(),
            network.id.clone(),
        );
        pending.gas_price = Some(gas_price.to_string());
        pending.gas_limit = Some(gas_limit.to_string());
        pending.nonce = Some(nonce);
        pending.data = params.data.filter(|d| !d.is_empty());
        pending.hash = Some(hash);
        pending.raw_transaction = Some(signed.raw_transaction);

        log::info!(
            "Broadcast transaction {} from {} on {}",
            pending.hash.as_deref().unwrap_or_default(),
            pending.from,
            network.id
        );
        Ok(pending)
    }

    /// EIP-191 signature by the given account, or the active one.
    pub async fn sign_message(&self, message: &[u8], address: Option<&str>) -> WalletResult<String> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;

        let account = match address {
            Some(address) => state
                .accounts
                .iter()
                .find(|a| a.address.eq_ignore_ascii_case(address))
                .cloned()
                .ok_or_else(|| WalletError::NotFound(format!("Account {}", address)))?,
            None => active_account(&state)?,
        };
        if account.encrypted_private_key.is_empty() {
            return Err(WalletError::NotFound(format!(
                "Key material for account {}",
                account.address
            )));
        }

        let session = state.session.as_ref().ok_or(WalletError::WalletLocked)?;
        let private_key = session
            .vault
            .decrypt(&account.encrypted_private_key, &session.password)?;
        self.signer.sign_message(&private_key, message)
    }

    pub fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> WalletResult<bool> {
        self.validator.require_address(address)?;
        self.signer.verify_message(message, signature, address)
    }

    pub async fn get_transaction_history(
        &self,
        address: Option<&str>,
    ) -> WalletResult<Vec<TransactionRecord>> {
        let mut state = self.state.lock().await;
        self.ensure_session(&mut state)?;
        let network = active_network(&state)?;

        let address = match address {
            Some(address) => {
                self.validator.require_address(address)?;
                address.to_string()
            }
            None => active_account(&state)?.address,
        };

        self.chain.get_transaction_history(&network, &address).await
    }

    pub async fn get_transaction_count(&self, address: &str) -> WalletResult<u64> {
        let state = self.state.lock().await;
        self.validator.require_address(address)?;
        let network = active_network(&state)?;
        self.chain.get_transaction_count(&network, address).await
    }

    pub async fn gas_price(&self) -> WalletResult<Amount> {
        let state = self.state.lock().await;
        let network = active_network(&state)?;
        Ok(Amount::from_wei(self.chain.gas_price(&network).await?))
    }

    pub async fn estimate_gas(&self, call: &Value) -> WalletResult<u128> {
        let state = self.state.lock().await;
        let network = active_network(&state)?;
        self.chain.estimate_gas(&network, call).await
    }

    pub async fn get_status(&self) -> WalletResult<WalletStatus> {
        let state = self.state.lock().await;
        let is_initialized = self.password_record()?.is_some();
        let is_unlocked =
            state.session.is_some() && self.throttle.peek_session_valid(WALLET_IDENTIFIER);

        let phase = match (is_initialized, is_unlocked) {
            (false, _) => WalletPhase::Uninitialized,
            (true, false) => WalletPhase::Locked,
            (true, true) => WalletPhase::Unlocked,
        };

        let (accounts, current_account) = if is_unlocked {
            (
                state.accounts.iter().map(AccountView::from).collect(),
                state.accounts.iter().find(|a| a.is_active).map(AccountView::from),
            )
        } else {
            (Vec::new(), None)
        };

        Ok(WalletStatus {
            phase,
            is_initialized,
            is_unlocked,
            accounts,
            current_account,
            current_network: state.networks.iter().find(|n| n.is_active).cloned(),
        })
    }

    /// When the current session was opened, if unlocked.
    pub async fn unlocked_at(&self) -> Option<DateTime<Utc>> {
        let state = self.state.lock().await;
        state.session.as_ref().map(|s| s.unlocked_at)
    }

    /// Lock and erase all persisted wallet data.
    pub async fn reset_wallet(&self) -> WalletResult<()> {
        let mut state = self.state.lock().await;
        self.lock_state(&mut state);
        self.store.clear()?;

        let mut networks = self.default_networks.clone();
        select_network(&mut networks, None);
        state.networks = networks;

        log::warn!("Wallet data cleared");
        Ok(())
    }

    fn lock_state(&self, state: &mut WalletState) {
        let was_unlocked = state.session.take().is_some();
        state.accounts.clear();
        self.throttle.clear_session(WALLET_IDENTIFIER);
        if was_unlocked {
            log::info!("Wallet locked");
        }
    }

    /// Unlocked and not expired. An expired session locks the wallet.
    fn ensure_session(&self, state: &mut WalletState) -> WalletResult<()> {
        if state.session.is_none() {
            return Err(WalletError::WalletLocked);
        }
        if !self.throttle.is_session_valid(WALLET_IDENTIFIER) {
            self.lock_state(state);
            log::info!("Session expired");
            return Err(WalletError::SessionExpired);
        }
        Ok(())
    }

    fn password_record(&self) -> WalletResult<Option<PasswordRecord>> {
        storage::load(self.store.as_ref(), PASSWORD_KEY)
    }
}

fn new_account(
    vault: &CredentialVault,
    key_pair: &KeyPair,
    display_name: String,
    is_active: bool,
    password: &SecretString,
) -> WalletResult<Account> {
    Ok(Account {
        id: Uuid::new_v4().to_string(),
        address: key_pair.address.clone(),
        display_name,
        encrypted_private_key: vault.encrypt(&key_pair.private_key, password)?,
        public_key: key_pair.public_key.clone(),
        is_active,
        created_at: Utc::now(),
    })
}

fn active_account(state: &WalletState) -> WalletResult<Account> {
    state
        .accounts
        .iter()
        .find(|a| a.is_active)
        .cloned()
        .ok_or_else(|| WalletError::NotFound("No active account".to_string()))
}

fn active_network(state: &WalletState) -> WalletResult<Network> {
    state
        .networks
        .iter()
        .find(|n| n.is_active)
        .cloned()
        .ok_or_else(|| WalletError::NotFound("No active network".to_string()))
}

/// Leave exactly one network active: `preferred` if present, else the
/// currently active one, else the first.
fn select_network(networks: &mut [Network], preferred: Option<&str>) {
    let index = preferred
        .and_then(|id| networks.iter().position(|n| n.id == id))
        .or_else(|| networks.iter().position(|n| n.is_active))
        .unwrap_or(0);
    for (i, network) in networks.iter_mut().enumerate() {
        network.is_active = i == index;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_client::ChainClient;
    use crate::signer::{keccak256, Secp256k1Signer, SignedTransaction};
    use crate::storage::MemoryStore;
    use crate::throttle::MAX_ATTEMPTS;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const PASSWORD: &str = "Passw0rdOk";
    const RECIPIENT: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    #[derive(Default)]
    struct RecordingSigner {
        inner: Secp256k1Signer,
        sign_calls: AtomicUsize,
    }

    impl SigningProvider for RecordingSigner {
        fn generate_key_pair(&self, mnemonic: Option<&str>) -> WalletResult<KeyPair> {
            self.inner.generate_key_pair(mnemonic)
        }

        fn sign_transaction(
            &self,
            private_key: &[u8],
            tx: &UnsignedTransaction,
        ) -> WalletResult<SignedTransaction> {
            self.sign_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.sign_transaction(private_key, tx)
        }

        fn sign_message(&self, private_key: &[u8], message: &[u8]) -> WalletResult<String> {
            self.sign_calls.fetch_add(1, Ordering::SeqCst);
            self.inner.sign_message(private_key, message)
        }

        fn verify_message(&self, message: &[u8], signature: &str, address: &str) -> WalletResult<bool> {
            self.inner.verify_message(message, signature, address)
        }
    }

    #[derive(Default)]
    struct StubChain {
        calls: parking_lot::Mutex<Vec<String>>,
    }

    impl StubChain {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ChainClient for StubChain {
        async fn get_balance(&self, _network: &Network, _address: &str) -> WalletResult<u128> {
            self.calls.lock().push("get_balance".into());
            Ok(Amount::WEI_PER_ETHER)
        }

        async fn get_transaction_history(
            &self,
            _network: &Network,
            _address: &str,
        ) -> WalletResult<Vec<TransactionRecord>> {
            self.calls.lock().push("get_transaction_history".into());
            Ok(Vec::new())
        }

        async fn get_transaction_count(&self, _network: &Network, _address: &str) -> WalletResult<u64> {
            self.calls.lock().push("get_transaction_count".into());
            Ok(3)
        }

        async fn send_raw_transaction(&self, _network: &Network, raw: &str) -> WalletResult<String> {
            self.calls.lock().push("send_raw_transaction".into());
            let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
            Ok(format!("0x{}", hex::encode(keccak256(&bytes))))
        }

        async fn gas_price(&self, _network: &Network) -> WalletResult<u128> {
            Ok(1)
        }

        async fn estimate_gas(&self, _network: &Network, _call: &Value) -> WalletResult<u128> {
            Ok(21_000)
        }
    }

    struct Harness {
        session: WalletSession,
        signer: Arc<RecordingSigner>,
        chain: Arc<StubChain>,
        store: Arc<MemoryStore>,
    }

    fn harness(throttle: ThrottlePolicy) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let signer = Arc::new(RecordingSigner::default());
        let chain = Arc::new(StubChain::default());
        let session = WalletSession::new(
            store.clone(),
            signer.clone(),
            chain.clone(),
            SessionConfig {
                throttle,
                ..SessionConfig::default()
            },
        )
        .unwrap();
        Harness {
            session,
            signer,
            chain,
            store,
        }
    }

    fn secret(password: &str) -> SecretString {
        SecretString::from(password.to_string())
    }

    fn transfer() -> SendTransactionParams {
        SendTransactionParams {
            to: RECIPIENT.to_string(),
            amount: Some("0.1".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_rejects_weak_password_and_reinitialization() {
        let h = harness(ThrottlePolicy::default());
        assert!(matches!(
            h.session.create_wallet(&secret("weak"), None).await,
            Err(WalletError::ValidationError(_))
        ));

        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        assert!(matches!(
            h.session.create_wallet(&secret(PASSWORD), None).await,
            Err(WalletError::AlreadyExists(_))
        ));
    }

    #[tokio::test]
    async fn create_persists_without_cleartext_secrets() {
        let h = harness(ThrottlePolicy::default());
        let view = h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        assert!(view.is_active);

        let accounts = h.store.get(ACCOUNTS_KEY).unwrap().unwrap().to_string();
        let record = h.store.get(PASSWORD_KEY).unwrap().unwrap().to_string();
        assert!(!accounts.contains(PASSWORD));
        assert!(!record.contains(PASSWORD));
        assert!(accounts.contains("encryptedPrivateKey"));
    }

    #[tokio::test]
    async fn unlock_before_create_is_not_initialized() {
        let h = harness(ThrottlePolicy::default());
        assert_eq!(
            h.session.unlock_wallet(&secret(PASSWORD)).await.unwrap_err(),
            WalletError::NotInitialized
        );
    }

    #[tokio::test]
    async fn lock_is_idempotent_and_blocks_reads() {
        let h = harness(ThrottlePolicy::default());
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();

        h.session.lock_wallet().await;
        h.session.lock_wallet().await;

        assert_eq!(h.session.get_accounts().await.unwrap_err(), WalletError::WalletLocked);
        let status = h.session.get_status().await.unwrap();
        assert_eq!(status.phase, WalletPhase::Locked);
        assert!(status.accounts.is_empty());
        assert!(h.session.unlocked_at().await.is_none());
    }

    #[tokio::test]
    async fn unlock_restores_active_account() {
        let h = harness(ThrottlePolicy::default());
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        let second = h.session.add_account(Some("Savings")).await.unwrap();
        assert!(!second.is_active);
        h.session.set_current_account(&second.id).await.unwrap();
        h.session.lock_wallet().await;

        assert!(!h.session.unlock_wallet(&secret("Wr0ngPassword")).await.unwrap());
        assert!(h.session.unlock_wallet(&secret(PASSWORD)).await.unwrap());

        let current = h.session.get_current_account().await.unwrap().unwrap();
        assert_eq!(current.id, second.id);
        assert_eq!(current.display_name, "Savings");
        let accounts = h.session.get_accounts().await.unwrap();
        assert_eq!(accounts.iter().filter(|a| a.is_active).count(), 1);
    }

    #[tokio::test]
    async fn lockout_after_repeated_failures() {
        let h = harness(ThrottlePolicy {
            lockout_duration: Duration::from_secs(3),
            ..ThrottlePolicy::default()
        });
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        h.session.lock_wallet().await;

        for _ in 0..5 {
            assert!(!h.session.unlock_wallet(&secret("Wr0ngPassword")).await.unwrap());
        }
        assert!(matches!(
            h.session.unlock_wallet(&secret(PASSWORD)).await,
            Err(WalletError::LockedOut { .. })
        ));

        tokio::time::sleep(Duration::from_millis(3200)).await;
        assert!(h.session.unlock_wallet(&secret(PASSWORD)).await.unwrap());
    }

    #[tokio::test]
    async fn set_current_account_unknown_id() {
        let h = harness(ThrottlePolicy::default());
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        assert!(matches!(
            h.session.set_current_account("missing").await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn send_transaction_signs_and_broadcasts() {
        let h = harness(ThrottlePolicy::default());
        let account = h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();

        let pending = h.session.send_transaction(transfer()).await.unwrap();
        assert_eq!(pending.status, crate::models::TransactionStatus::Pending);
        assert_eq!(pending.from, account.address);
        assert_eq!(pending.nonce, Some(3));
        assert_eq!(pending.gas_price.as_deref(), Some("20000000000"));
        assert_eq!(pending.gas_limit.as_deref(), Some("21000"));
        assert_eq!(pending.network_id, "ethereum-mainnet");
        assert!(pending.hash.as_deref().unwrap().starts_with("0x"));

        assert_eq!(
            h.chain.calls(),
            vec!["get_transaction_count", "send_raw_transaction"]
        );
        assert_eq!(h.signer.sign_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_transaction_never_reaches_signer() {
        let h = harness(ThrottlePolicy::default());
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();

        let params = SendTransactionParams {
            gas_limit: Some("100".to_string()),
            ..transfer()
        };
        assert!(matches!(
            h.session.send_transaction(params).await,
            Err(WalletError::ValidationError(_))
        ));
        assert!(h.chain.calls().is_empty());
        assert_eq!(h.signer.sign_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_session_blocks_send_and_locks() {
        let h = harness(ThrottlePolicy {
            session_timeout: Duration::from_millis(20),
            ..ThrottlePolicy::default()
        });
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(
            h.session.send_transaction(transfer()).await.unwrap_err(),
            WalletError::SessionExpired
        );
        assert!(h.chain.calls().is_empty());
        assert_eq!(h.signer.sign_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.session.get_accounts().await.unwrap_err(),
            WalletError::WalletLocked
        );
    }

    #[tokio::test]
    async fn sign_and_verify_message() {
        let h = harness(ThrottlePolicy::default());
        let account = h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();

        let signature = h.session.sign_message(b"hello", None).await.unwrap();
        assert!(h
            .session
            .verify_message(b"hello", &signature, &account.address)
            .unwrap());
        assert!(!h
            .session
            .verify_message(b"hello", &signature, RECIPIENT)
            .unwrap());

        assert!(matches!(
            h.session.sign_message(b"hello", Some(RECIPIENT)).await,
            Err(WalletError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn networks_keep_single_active_and_unique_chain_ids() {
        let h = harness(ThrottlePolicy::default());

        let sepolia = h.session.set_current_network("ethereum-sepolia").await.unwrap();
        assert_eq!(sepolia.chain_id, 11_155_111);
        let networks = h.session.get_networks().await;
        assert_eq!(networks.iter().filter(|n| n.is_active).count(), 1);
        assert!(matches!(
            h.session.set_current_network("nope").await,
            Err(WalletError::NotFound(_))
        ));

        let mut duplicate = default_networks().remove(2);
        duplicate.id = "polygon-copy".to_string();
        assert!(matches!(
            h.session.add_network(duplicate).await,
            Err(WalletError::AlreadyExists(_))
        ));

        let mut custom = default_networks().remove(0);
        custom.id = "local".to_string();
        custom.chain_id = 31_337;
        custom.is_active = true;
        let added = h.session.add_network(custom).await.unwrap();
        assert!(!added.is_active);
        assert!(h.session.network_by_chain_id(31_337).await.is_some());
        assert_eq!(h.session.get_networks().await.iter().filter(|n| n.is_active).count(), 1);
    }

    #[tokio::test]
    async fn network_selection_survives_restart() {
        let h = harness(ThrottlePolicy::default());
        h.session.set_current_network("polygon-mainnet").await.unwrap();

        let reopened = WalletSession::new(
            h.store.clone(),
            h.signer.clone(),
            h.chain.clone(),
            SessionConfig::default(),
        )
        .unwrap();
        assert_eq!(
            reopened.get_current_network().await.unwrap().id,
            "polygon-mainnet"
        );
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let h = harness(ThrottlePolicy::default());
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        h.session.set_current_network("ethereum-sepolia").await.unwrap();

        h.session.reset_wallet().await.unwrap();
        assert!(h.store.is_empty());
        let status = h.session.get_status().await.unwrap();
        assert_eq!(status.phase, WalletPhase::Uninitialized);
        assert_eq!(status.current_network.unwrap().id, "ethereum-mainnet");
    }

    #[tokio::test]
    async fn duplicate_networks_are_refused_at_construction() {
        let mut networks = default_networks();
        let mut copy = networks[0].clone();
        copy.id = "mainnet-copy".to_string();
        networks.push(copy);
        let result = WalletSession::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Secp256k1Signer::new()),
            Arc::new(StubChain::default()),
            SessionConfig {
                networks,
                ..SessionConfig::default()
            },
        );
        assert!(matches!(result, Err(WalletError::ValidationError(_))));

        let store = Arc::new(MemoryStore::new());
        let mut persisted = default_networks();
        let mut twin = persisted[2].clone();
        twin.chain_id = 1;
        twin.id = "polygon-twin".to_string();
        persisted.push(twin);
        storage::save(store.as_ref(), NETWORKS_KEY, &persisted).unwrap();
        let result = WalletSession::new(
            store,
            Arc::new(Secp256k1Signer::new()),
            Arc::new(StubChain::default()),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(WalletError::ValidationError(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_wrong_passwords_respect_the_attempt_cap() {
        let session = Arc::new(
            WalletSession::new(
                Arc::new(MemoryStore::new()),
                Arc::new(Secp256k1Signer::new()),
                Arc::new(StubChain::default()),
                SessionConfig::default(),
            )
            .unwrap(),
        );
        session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        session.lock_wallet().await;

        let tasks: Vec<_> = (0..12)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.unlock_wallet(&secret("Wr0ngPassword")).await })
            })
            .collect();

        let mut rejected = 0;
        let mut locked_out = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(false) => rejected += 1,
                Err(WalletError::LockedOut { .. }) => locked_out += 1,
                other => panic!("unexpected unlock outcome: {:?}", other),
            }
        }
        assert_eq!(rejected, MAX_ATTEMPTS);
        assert_eq!(locked_out, 12 - MAX_ATTEMPTS);
        assert!(matches!(
            session.unlock_wallet(&secret(PASSWORD)).await,
            Err(WalletError::LockedOut { .. })
        ));
    }

    #[tokio::test]
    async fn signing_with_missing_key_material_is_not_found() {
        let h = harness(ThrottlePolicy::default());
        let account = h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        h.session.lock_wallet().await;

        let mut accounts: Vec<Account> = storage::load(h.store.as_ref(), ACCOUNTS_KEY)
            .unwrap()
            .unwrap();
        accounts[0].encrypted_private_key.clear();
        storage::save(h.store.as_ref(), ACCOUNTS_KEY, &accounts).unwrap();
        assert!(h.session.unlock_wallet(&secret(PASSWORD)).await.unwrap());

        assert!(matches!(
            h.session.sign_message(b"hello", None).await,
            Err(WalletError::NotFound(_))
        ));
        assert!(matches!(
            h.session.sign_message(b"hello", Some(&account.address)).await,
            Err(WalletError::NotFound(_))
        ));
        assert_eq!(h.signer.sign_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn status_reports_expiry_without_purging() {
        let h = harness(ThrottlePolicy {
            session_timeout: Duration::from_millis(20),
            ..ThrottlePolicy::default()
        });
        h.session.create_wallet(&secret(PASSWORD), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let status = h.session.get_status().await.unwrap();
        assert_eq!(status.phase, WalletPhase::Locked);
        assert!(h.session.throttle().has_session(WALLET_IDENTIFIER));

        assert_eq!(
            h.session.get_accounts().await.unwrap_err(),
            WalletError::SessionExpired
        );
        assert!(!h.session.throttle().has_session(WALLET_IDENTIFIER));
    }
}
