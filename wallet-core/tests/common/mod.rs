#![allow(dead_code)]

use async_trait::async_trait;
use extension_wallet_lib::signer::keccak256;
use extension_wallet_lib::units::Amount;
use extension_wallet_lib::{ChainClient, Network, TransactionRecord, WalletResult};
use parking_lot::Mutex;
use serde_json::Value;

pub const PASSWORD: &str = "Passw0rdOk";
pub const RECIPIENT: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";
pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
pub const TEST_MNEMONIC_ADDRESS: &str = "0x9858EfFD232B4033E47d90003D41EC34EcaEda94";

/// In-process chain client: two ether per address, nonce 7, echoes the
/// keccak hash of broadcast transactions.
#[derive(Default)]
pub struct StubChain {
    calls: Mutex<Vec<String>>,
}

impl StubChain {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn record(&self, call: &str, network: &Network) {
        self.calls.lock().push(format!("{}@{}", call, network.chain_id));
    }
}

#[async_trait]
impl ChainClient for StubChain {
    async fn get_balance(&self, network: &Network, _address: &str) -> WalletResult<u128> {
        self.record("get_balance", network);
        Ok(2 * Amount::WEI_PER_ETHER)
    }

    async fn get_transaction_history(
        &self,
        network: &Network,
        _address: &str,
    ) -> WalletResult<Vec<TransactionRecord>> {
        self.record("get_transaction_history", network);
        Ok(Vec::new())
    }

    async fn get_transaction_count(&self, network: &Network, _address: &str) -> WalletResult<u64> {
        self.record("get_transaction_count", network);
        Ok(7)
    }

    async fn send_raw_transaction(&self, network: &Network, raw: &str) -> WalletResult<String> {
        self.record("send_raw_transaction", network);
        let bytes = hex::decode(raw.trim_start_matches("0x")).unwrap();
        Ok(format!("0x{}", hex::encode(keccak256(&bytes))))
    }

    async fn gas_price(&self, network: &Network) -> WalletResult<u128> {
        self.record("gas_price", network);
        Ok(30_000_000_000)
    }

    async fn estimate_gas(&self, network: &Network, _call: &Value) -> WalletResult<u128> {
        self.record("estimate_gas", network);
        Ok(21_000)
    }
}
