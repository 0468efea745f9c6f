use std::sync::Arc;

use parking_lot::RwLock;
use secrecy::SecretString;
use serde_json::{json, Value};

use crate::api::{BackgroundMessage, ConnectionState, MessageResponse, ProviderError};
use crate::errors::{WalletError, WalletResult};
use crate::models::SendTransactionParams;
use crate::session::WalletSession;
use crate::units::{parse_quantity, to_quantity, Amount};

#[derive(Debug, Default)]
struct Connection {
    is_connected: bool,
    accounts: Vec<String>,
}

/// EIP-1193 provider and background-message router over a [`WalletSession`].
pub struct ProviderFacade {
    session: Arc<WalletSession>,
    connection: RwLock<Connection>,
}

impl ProviderFacade {
    pub fn new(session: Arc<WalletSession>) -> Self {
        Self {
            session,
            connection: RwLock::new(Connection::default()),
        }
    }

    pub fn session(&self) -> &Arc<WalletSession> {
        &self.session
    }

    /// Expose the active account to the page. Requires an unlocked wallet.
    pub async fn connect(&self) -> WalletResult<Vec<String>> {
        let account = self
            .session
            .get_current_account()
            .await?
            .ok_or_else(|| WalletError::NotFound("No active account".to_string()))?;

        let accounts = vec![account.address];
        let mut connection = self.connection.write();
        connection.is_connected = true;
        connection.accounts = accounts.clone();
        log::info!("Provider connected");
        Ok(accounts)
    }

    pub fn disconnect(&self) {
        let mut connection = self.connection.write();
        if connection.is_connected {
            log::info!("Provider disconnected");
        }
        *connection = Connection::default();
    }

    pub async fn connection_state(&self) -> ConnectionState {
        let chain_id = self.chain_id().await;
        let connection = self.connection.read();
        ConnectionState {
            is_connected: connection.is_connected,
            accounts: connection.accounts.clone(),
            selected_address: connection.accounts.first().cloned(),
            chain_id: to_quantity(u128::from(chain_id)),
        }
    }

    /// Dispatch an EIP-1193 `request({method, params})`.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, ProviderError> {
        log::debug!("Provider request {}", method);
        match method {
            "eth_requestAccounts" => Ok(json!(self.connect().await?)),
            "eth_accounts" => self.accounts().await,
            "eth_chainId" => Ok(json!(to_quantity(u128::from(self.chain_id().await)))),
            "net_version" => Ok(json!(self.chain_id().await.to_string())),
            "eth_getBalance" => {
                let address = string_param(&params, 0, "address")?;
                let balance = self.session.get_balance(address).await?;
                Ok(json!(balance.to_quantity()))
            }
            "eth_sendTransaction" => {
                let tx = params
                    .first()
                    .ok_or_else(|| ProviderError::invalid_params("Missing transaction"))?;
                let send_params = self.transaction_params(tx).await?;
                let pending = self.session.send_transaction(send_params).await?;
                Ok(json!(pending.hash))
            }
            "wallet_switchEthereumChain" => {
                let chain_id = params
                    .first()
                    .and_then(|p| p.get("chainId"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| ProviderError::invalid_params("Missing chainId"))?;
                let chain_id = parse_quantity(chain_id)
                    .ok()
                    .and_then(|id| u64::try_from(id).ok())
                    .ok_or_else(|| ProviderError::invalid_params("Invalid chainId"))?;

                let network = self.session.network_by_chain_id(chain_id).await.ok_or_else(|| {
                    ProviderError::new(
                        ProviderError::UNRECOGNIZED_CHAIN,
                        format!("Unrecognized chain ID {}", to_quantity(u128::from(chain_id))),
                    )
                })?;
                self.session.set_current_network(&network.id).await?;
                Ok(Value::Null)
            }
            "personal_sign" => {
                let message = string_param(&params, 0, "message")?;
                let address = params.get(1).and_then(Value::as_str);
                let signature = self
                    .session
                    .sign_message(&message_bytes(message), address)
                    .await?;
                Ok(json!(signature))
            }
            "eth_signTypedData_v4" => {
                let address = string_param(&params, 0, "address")?;
                let typed_data = params
                    .get(1)
                    .ok_or_else(|| ProviderError::invalid_params("Missing typed data"))?;
                let payload = match typed_data {
                    Value::String(raw) => raw.clone(),
                    other => other.to_string(),
                };
                let signature = self
                    .session
                    .sign_message(payload.as_bytes(), Some(address))
                    .await?;
                Ok(json!(signature))
            }
            "eth_getTransactionCount" => {
                let address = string_param(&params, 0, "address")?;
                let count = self.session.get_transaction_count(address).await?;
                Ok(json!(to_quantity(u128::from(count))))
            }
            "eth_estimateGas" => {
                let call = params
                    .first()
                    .ok_or_else(|| ProviderError::invalid_params("Missing call object"))?;
                let gas = self.session.estimate_gas(call).await?;
                Ok(json!(to_quantity(gas)))
            }
            "eth_gasPrice" => {
                let price = self.session.gas_price().await?;
                Ok(json!(price.to_quantity()))
            }
            other => Err(ProviderError::unsupported(other)),
        }
    }

    /// Route a background-script message. Never fails; errors travel in the
    /// envelope.
    pub async fn handle_message(&self, message: BackgroundMessage) -> MessageResponse {
        log::debug!("Background message {}", message.kind());
        match self.route(message).await {
            Ok(response) => response,
            Err(err) => {
                log::warn!("Background message failed: {}", err.code());
                MessageResponse::from(err)
            }
        }
    }

    async fn route(&self, message: BackgroundMessage) -> WalletResult<MessageResponse> {
        let response = match message {
            BackgroundMessage::GetWalletStatus => {
                MessageResponse::ok(serde_json::to_value(self.session.get_status().await?)?)
            }
            BackgroundMessage::CreateWallet { password, mnemonic } => {
                let password = SecretString::from(password);
                let account = self
                    .session
                    .create_wallet(&password, mnemonic.as_deref())
                    .await?;
                MessageResponse::ok(serde_json::to_value(account)?)
            }
            BackgroundMessage::UnlockWallet { password } => {
                let password = SecretString::from(password);
                let unlocked = self.session.unlock_wallet(&password).await?;
                MessageResponse::ok(json!({ "unlocked": unlocked }))
            }
            BackgroundMessage::LockWallet => {
                self.session.lock_wallet().await;
                self.disconnect();
                MessageResponse::ok(json!({ "locked": true }))
            }
            BackgroundMessage::GetAccounts => {
                MessageResponse::ok(serde_json::to_value(self.session.get_accounts().await?)?)
            }
            BackgroundMessage::GetBalance { address } => {
                let balance = self.session.get_balance(&address).await?;
                MessageResponse::ok(json!(balance.to_ether_string()))
            }
            BackgroundMessage::SendTransaction(params) => {
                let pending = self.session.send_transaction(params).await?;
                MessageResponse::ok(serde_json::to_value(pending)?)
            }
            BackgroundMessage::SwitchAccount { account_id } => {
                let account = self.session.set_current_account(&account_id).await?;
                let mut connection = self.connection.write();
                if connection.is_connected {
                    connection.accounts = vec![account.address];
                }
                MessageResponse::ok_empty()
            }
            BackgroundMessage::GetNetworks => {
                MessageResponse::ok(serde_json::to_value(self.session.get_networks().await)?)
            }
            BackgroundMessage::SwitchNetwork { network_id } => {
                self.session.set_current_network(&network_id).await?;
                MessageResponse::ok_empty()
            }
            BackgroundMessage::ConnectWallet => {
                let accounts = self.connect().await?;
                MessageResponse::ok(json!({ "accounts": accounts }))
            }
            BackgroundMessage::DisconnectWallet => {
                self.disconnect();
                MessageResponse::ok_empty()
            }
            BackgroundMessage::WalletRequest { method, params } => {
                match self.request(&method, params).await {
                    Ok(result) => MessageResponse::ok(result),
                    Err(err) => MessageResponse::from(err),
                }
            }
        };
        Ok(response)
    }

    /// `eth_accounts`: connected accounts, or none while locked.
    async fn accounts(&self) -> Result<Value, ProviderError> {
        match self.session.get_accounts().await {
            Ok(accounts) => {
                let mut addresses: Vec<String> = Vec::with_capacity(accounts.len());
                for account in accounts.iter().filter(|a| a.is_active) {
                    addresses.push(account.address.clone());
                }
                for account in accounts.iter().filter(|a| !a.is_active) {
                    addresses.push(account.address.clone());
                }
                Ok(json!(addresses))
            }
            Err(WalletError::WalletLocked) | Err(WalletError::SessionExpired) => {
                self.disconnect();
                Ok(json!([]))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn chain_id(&self) -> u64 {
        self.session
            .get_current_network()
            .await
            .map(|network| network.chain_id)
            .unwrap_or(1)
    }

    /// Convert an EIP-1193 transaction object (hex wei quantities) into the
    /// wallet's own parameters.
    async fn transaction_params(&self, tx: &Value) -> Result<SendTransactionParams, ProviderError> {
        let field = |name: &str| tx.get(name).and_then(Value::as_str);

        if let Some(from) = field("from") {
            let active = self.session.get_current_account().await?;
            let is_active = active
                .map(|account| account.address.eq_ignore_ascii_case(from))
                .unwrap_or(false);
            if !is_active {
                return Err(ProviderError::new(
                    ProviderError::UNAUTHORIZED,
                    "Requested account is not the active account",
                ));
            }
        }

        let amount = match field("value") {
            Some(value) => {
                let wei = parse_quantity(value)
                    .map_err(|_| ProviderError::invalid_params("Invalid transaction value"))?;
                Some(Amount::from_wei(wei).to_ether_string())
            }
            None => None,
        };
        let quantity = |name: &str| -> Result<Option<String>, ProviderError> {
            field(name)
                .map(|raw| {
                    parse_quantity(raw)
                        .map(|v| v.to_string())
                        .map_err(|_| ProviderError::invalid_params(format!("Invalid {}", name)))
                })
                .transpose()
        };

        Ok(SendTransactionParams {
            to: field("to").unwrap_or_default().to_string(),
            amount,
            gas_price: quantity("gasPrice")?,
            gas_limit: match quantity("gas")? {
                Some(gas) => Some(gas),
                None => quantity("gasLimit")?,
            },
            data: field("data").or_else(|| field("input")).map(str::to_string),
        })
    }
}

fn string_param<'a>(params: &'a [Value], index: usize, name: &str) -> Result<&'a str, ProviderError> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::invalid_params(format!("Missing {} parameter", name)))
}

/// `personal_sign` payloads arrive either as `0x` hex or as plain text.
fn message_bytes(message: &str) -> Vec<u8> {
    message
        .strip_prefix("0x")
        .and_then(|hex_body| hex::decode(hex_body).ok())
        .unwrap_or_else(|| message.as_bytes().to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_sign_payload_decoding() {
        assert_eq!(message_bytes("0x68656c6c6f"), b"hello".to_vec());
        assert_eq!(message_bytes("hello"), b"hello".to_vec());
        assert_eq!(message_bytes("0xnothex"), b"0xnothex".to_vec());
    }

    #[test]
    fn string_params_are_required() {
        let params = vec![json!("0xabc"), json!(5)];
        assert_eq!(string_param(&params, 0, "address").unwrap(), "0xabc");
        assert_eq!(
            string_param(&params, 1, "message").unwrap_err().code,
            ProviderError::INVALID_PARAMS
        );
        assert!(string_param(&params, 2, "message").is_err());
    }
}
