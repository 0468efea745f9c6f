use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::chain_client::{ChainClient, JsonRpcChainClient};
use crate::config_store::{ConfigStore, WalletConfig};
use crate::errors::WalletResult;
use crate::provider::ProviderFacade;
use crate::security::{Environment, SecurityPolicy};
use crate::session::{SessionConfig, WalletSession};
use crate::signer::Secp256k1Signer;
use crate::storage::{FileStore, WalletPaths};

const EXPLORER_API_KEY_VAR: &str = "EXTWALLET_EXPLORER_API_KEY";
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything one wallet install needs, rooted at a single directory.
pub struct WalletContext {
    paths: WalletPaths,
    config_store: ConfigStore,
    store: Arc<FileStore>,
    chain: Arc<dyn ChainClient>,
    environment: Environment,
    policy: SecurityPolicy,
    session: Arc<WalletSession>,
    provider: Arc<ProviderFacade>,
}

impl WalletContext {
    /// Opens (or creates) the wallet under `root_dir` with a live JSON-RPC
    /// client and the environment chosen by `EXTWALLET_ENVIRONMENT`.
    pub fn initialize(root_dir: PathBuf) -> WalletResult<Self> {
        let api_key = std::env::var(EXPLORER_API_KEY_VAR).ok();
        let chain = Arc::new(JsonRpcChainClient::new(HTTP_TIMEOUT, api_key)?);
        Self::initialize_with(root_dir, Environment::from_env(), chain)
    }

    pub fn initialize_with(
        root_dir: PathBuf,
        environment: Environment,
        chain: Arc<dyn ChainClient>,
    ) -> WalletResult<Self> {
        let paths = WalletPaths::new(&root_dir)?;
        paths.ensure_directories()?;

        let config_store = ConfigStore::from_paths(&paths);
        let config = config_store.load_or_default(environment.as_str())?;
        let store = Arc::new(FileStore::from_paths(&paths)?);

        let policy = SecurityPolicy::resolve(environment, &config.policy)?;
        let session = build_session(&store, &chain, &config, &policy)?;
        log::info!("Wallet context ready at {}", paths.root_dir().display());

        Ok(Self {
            paths,
            config_store,
            store,
            chain,
            environment,
            policy,
            provider: Arc::new(ProviderFacade::new(session.clone())),
            session,
        })
    }

    pub fn session(&self) -> &Arc<WalletSession> {
        &self.session
    }

    pub fn provider(&self) -> &Arc<ProviderFacade> {
        &self.provider
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config_store
    }

    pub fn store(&self) -> &Arc<FileStore> {
        &self.store
    }

    pub fn paths(&self) -> &WalletPaths {
        &self.paths
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    pub fn load_config(&self) -> WalletResult<WalletConfig> {
        self.config_store.load_or_default(self.environment.as_str())
    }

    /// Persists a config change and rebuilds the session under the new
    /// policy. The wallet comes back locked.
    pub fn update_config<F>(&mut self, updater: F) -> WalletResult<WalletConfig>
    where
        F: FnOnce(&mut WalletConfig) -> WalletResult<()>,
    {
        let updated = self.config_store.update(self.environment.as_str(), updater)?;
        let policy = SecurityPolicy::resolve(self.environment, &updated.policy)?;
        let session = build_session(&self.store, &self.chain, &updated, &policy)?;

        self.policy = policy;
        self.provider = Arc::new(ProviderFacade::new(session.clone()));
        self.session = session;
        log::info!("Wallet config updated, session rebuilt");
        Ok(updated)
    }
}

fn build_session(
    store: &Arc<FileStore>,
    chain: &Arc<dyn ChainClient>,
    config: &WalletConfig,
    policy: &SecurityPolicy,
) -> WalletResult<Arc<WalletSession>> {
    let session_config = SessionConfig {
        throttle: policy.throttle_policy(),
        kdf_iterations: policy.kdf_iterations,
        networks: config.seed_networks(),
    };
    let session = WalletSession::new(
        store.clone(),
        Arc::new(Secp256k1Signer::new()),
        chain.clone(),
        session_config,
    )?;
    Ok(Arc::new(session))
}

/// Shared wallet context handed to the message loop.
#[derive(Clone)]
pub struct SharedWalletContext(pub Arc<RwLock<WalletContext>>);

impl SharedWalletContext {
    pub fn new(inner: WalletContext) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    pub fn read<F, T>(&self, op: F) -> WalletResult<T>
    where
        F: FnOnce(&WalletContext) -> WalletResult<T>,
    {
        let guard = self.0.read();
        op(&guard)
    }

    pub fn write<F, T>(&self, op: F) -> WalletResult<T>
    where
        F: FnOnce(&mut WalletContext) -> WalletResult<T>,
    {
        let mut guard = self.0.write();
        op(&mut guard)
    }

    /// Current provider. Clone the handle out so no lock is held across
    /// awaits.
    pub fn provider(&self) -> Arc<ProviderFacade> {
        self.0.read().provider().clone()
    }
}
