//! Chain queries over Ethereum JSON-RPC, plus Etherscan-style explorer APIs
//! for address history.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::{WalletError, WalletResult};
use crate::models::{Network, TransactionRecord, TransactionStatus};
use crate::units::parse_quantity;

/// Explorer page size for history queries.
pub const HISTORY_PAGE_SIZE: u32 = 50;

#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Balance in wei.
    async fn get_balance(&self, network: &Network, address: &str) -> WalletResult<u128>;

    async fn get_transaction_history(
        &self,
        network: &Network,
        address: &str,
    ) -> WalletResult<Vec<TransactionRecord>>;

    /// Next nonce, counting pending transactions.
    async fn get_transaction_count(&self, network: &Network, address: &str) -> WalletResult<u64>;

    /// Broadcast a signed transaction and return its hash.
    async fn send_raw_transaction(&self, network: &Network, raw_transaction: &str)
        -> WalletResult<String>;

    async fn gas_price(&self, network: &Network) -> WalletResult<u128>;

    async fn estimate_gas(&self, network: &Network, call: &Value) -> WalletResult<u128>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ExplorerResponse {
    status: String,
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerTransaction {
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    value: String,
    #[serde(default)]
    block_number: Option<String>,
    #[serde(default)]
    time_stamp: Option<String>,
    #[serde(default)]
    is_error: Option<String>,
}

/// HTTP client for EVM nodes. The endpoint is taken from the network passed
/// to each call, so one client serves every configured network.
pub struct JsonRpcChainClient {
    client: Client,
    explorer_api_key: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcChainClient {
    pub fn new(timeout: Duration, explorer_api_key: Option<String>) -> WalletResult<Self> {
        let client = Client::builder().timeout(timeout).build().map_err(|e| {
            WalletError::NetworkError(format!("Failed to create HTTP client: {}", e))
        })?;

        Ok(Self {
            client,
            explorer_api_key: explorer_api_key.filter(|key| !key.is_empty()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_defaults() -> WalletResult<Self> {
        Self::new(Duration::from_secs(30), None)
    }

    async fn rpc_call(&self, network: &Network, method: &str, params: Value) -> WalletResult<Value> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };

        let response = self
            .client
            .post(&network.rpc_endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let rpc_response: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| WalletError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(WalletError::NetworkError(format!(
                "RPC error {}: {}",
                error.code, error.message
            )));
        }

        rpc_response
            .result
            .ok_or_else(|| WalletError::InvalidResponse("No result in RPC response".to_string()))
    }

    async fn rpc_quantity(&self, network: &Network, method: &str, params: Value) -> WalletResult<u128> {
        let result = self.rpc_call(network, method, params).await?;
        let quantity = result.as_str().ok_or_else(|| {
            WalletError::InvalidResponse(format!("{} returned a non-string result", method))
        })?;
        parse_quantity(quantity)
            .map_err(|_| WalletError::InvalidResponse(format!("{} returned {}", method, quantity)))
    }
}

#[async_trait]
impl ChainClient for JsonRpcChainClient {
    async fn get_balance(&self, network: &Network, address: &str) -> WalletResult<u128> {
        self.rpc_quantity(network, "eth_getBalance", json!([address, "latest"]))
            .await
    }

    async fn get_transaction_history(
        &self,
        network: &Network,
        address: &str,
    ) -> WalletResult<Vec<TransactionRecord>> {
        let api_url = network.explorer_api_url.as_deref().ok_or_else(|| {
            WalletError::NetworkError(format!(
                "No explorer API configured for network {}",
                network.id
            ))
        })?;

        let page_size = HISTORY_PAGE_SIZE.to_string();
        let mut query = vec![
            ("module", "account"),
            ("action", "txlist"),
            ("address", address),
            ("startblock", "0"),
            ("endblock", "99999999"),
            ("page", "1"),
            ("offset", page_size.as_str()),
            ("sort", "desc"),
        ];
        if let Some(key) = &self.explorer_api_key {
            query.push(("apikey", key.as_str()));
        }

        let response = self
            .client
            .get(api_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| WalletError::NetworkError(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(WalletError::NetworkError(format!(
                "HTTP error: {}",
                response.status()
            )));
        }

        let body: ExplorerResponse = response
            .json()
            .await
            .map_err(|e| WalletError::InvalidResponse(format!("Failed to parse response: {}", e)))?;
        parse_history(body)
    }

    async fn get_transaction_count(&self, network: &Network, address: &str) -> WalletResult<u64> {
        let count = self
            .rpc_quantity(
                network,
                "eth_getTransactionCount",
                json!([address, "pending"]),
            )
            .await?;
        u64::try_from(count)
            .map_err(|_| WalletError::InvalidResponse("Transaction count out of range".to_string()))
    }

    async fn send_raw_transaction(
        &self,
        network: &Network,
        raw_transaction: &str,
    ) -> WalletResult<String> {
        let result = self
            .rpc_call(network, "eth_sendRawTransaction", json!([raw_transaction]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| WalletError::InvalidResponse("Invalid transaction response".to_string()))
    }

    async fn gas_price(&self, network: &Network) -> WalletResult<u128> {
        self.rpc_quantity(network, "eth_gasPrice", json!([])).await
    }

    async fn estimate_gas(&self, network: &Network, call: &Value) -> WalletResult<u128> {
        self.rpc_quantity(network, "eth_estimateGas", json!([call]))
            .await
    }
}

fn parse_history(body: ExplorerResponse) -> WalletResult<Vec<TransactionRecord>> {
    if body.status != "1" {
        // Explorers report an empty history as a failure.
        if body.message.starts_with("No transactions found") {
            return Ok(Vec::new());
        }
        let detail = body.result.as_str().unwrap_or_default();
        return Err(WalletError::NetworkError(format!(
            "Explorer error: {} {}",
            body.message, detail
        )));
    }

    let entries: Vec<ExplorerTransaction> = serde_json::from_value(body.result)
        .map_err(|e| WalletError::InvalidResponse(format!("Unexpected explorer payload: {}", e)))?;

    Ok(entries
        .into_iter()
        .map(|tx| TransactionRecord {
            hash: tx.hash,
            from: tx.from,
            to: tx.to,
            value: tx.value,
            block_number: tx.block_number.and_then(|b| b.parse().ok()),
            timestamp: tx
                .time_stamp
                .and_then(|t| t.parse::<i64>().ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            status: if tx.is_error.as_deref() == Some("1") {
                TransactionStatus::Failed
            } else {
                TransactionStatus::Confirmed
            },
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::default_networks;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response and hand back the raw request.
    async fn serve_once(body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(header_end) = text.find("\r\n\r\n") {
                    let content_length = text[..header_end]
                        .lines()
                        .find_map(|line| {
                            let lower = line.to_ascii_lowercase();
                            lower
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                        })
                        .unwrap_or(0);
                    if request.len() >= header_end + 4 + content_length {
                        break;
                    }
                }
                if n == 0 {
                    break;
                }
            }

            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (url, handle)
    }

    fn network_at(url: &str) -> Network {
        let mut network = default_networks().remove(0);
        network.rpc_endpoint = url.to_string();
        network.explorer_api_url = Some(format!("{}/api", url));
        network
    }

    #[tokio::test]
    async fn balance_is_parsed_from_hex_quantity() {
        let (url, server) = serve_once(r#"{"jsonrpc":"2.0","id":1,"result":"0xde0b6b3a7640000"}"#).await;
        let client = JsonRpcChainClient::with_defaults().unwrap();

        let balance = client
            .get_balance(&network_at(&url), "0x742d35Cc6634C0532925a3b844Bc454e4438f44e")
            .await
            .unwrap();
        assert_eq!(balance, 1_000_000_000_000_000_000);

        let request = server.await.unwrap();
        assert!(request.contains("\"eth_getBalance\""));
        assert!(request.contains("\"latest\""));
    }

    #[tokio::test]
    async fn rpc_errors_surface_as_network_errors() {
        let (url, server) = serve_once(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#,
        )
        .await;
        let client = JsonRpcChainClient::with_defaults().unwrap();

        let err = client
            .send_raw_transaction(&network_at(&url), "0xf86c")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            WalletError::NetworkError("RPC error -32000: nonce too low".to_string())
        );
        server.await.unwrap();
    }

    #[tokio::test]
    async fn transaction_count_uses_pending_block() {
        let (url, server) = serve_once(r#"{"jsonrpc":"2.0","id":1,"result":"0x7"}"#).await;
        let client = JsonRpcChainClient::with_defaults().unwrap();

        let nonce = client
            .get_transaction_count(&network_at(&url), "0x742d35Cc6634C0532925a3b844Bc454e4438f44e")
            .await
            .unwrap();
        assert_eq!(nonce, 7);
        assert!(server.await.unwrap().contains("\"pending\""));
    }

    #[tokio::test]
    async fn history_requires_explorer_api() {
        let client = JsonRpcChainClient::with_defaults().unwrap();
        let mut network = default_networks().remove(0);
        network.explorer_api_url = None;

        let err = client
            .get_transaction_history(&network, "0x742d35Cc6634C0532925a3b844Bc454e4438f44e")
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::NetworkError(_)));
    }

    #[tokio::test]
    async fn history_is_fetched_from_explorer() {
        let (url, server) = serve_once(
            r#"{"status":"1","message":"OK","result":[{"hash":"0xabc","from":"0x1","to":"0x2","value":"1000","blockNumber":"42","timeStamp":"1700000000","isError":"0"}]}"#,
        )
        .await;
        let client = JsonRpcChainClient::with_defaults().unwrap();

        let history = client
            .get_transaction_history(&network_at(&url), "0x742d35Cc6634C0532925a3b844Bc454e4438f44e")
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block_number, Some(42));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api?"));
        assert!(request.contains("action=txlist"));
    }

    #[test]
    fn explorer_payloads() {
        let empty = ExplorerResponse {
            status: "0".into(),
            message: "No transactions found".into(),
            result: json!([]),
        };
        assert!(parse_history(empty).unwrap().is_empty());

        let failure = ExplorerResponse {
            status: "0".into(),
            message: "NOTOK".into(),
            result: json!("Invalid API Key"),
        };
        assert!(matches!(
            parse_history(failure),
            Err(WalletError::NetworkError(_))
        ));

        let failed_tx = ExplorerResponse {
            status: "1".into(),
            message: "OK".into(),
            result: json!([{"hash": "0x1", "from": "0x2", "to": "", "value": "0", "isError": "1"}]),
        };
        let records = parse_history(failed_tx).unwrap();
        assert_eq!(records[0].status, TransactionStatus::Failed);
        assert_eq!(records[0].timestamp, None);
    }
}
