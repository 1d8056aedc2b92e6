use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const RPC_TIMEOUT: Duration = Duration::from_secs(5);

/// On-chain activity lookup for a wallet.
#[async_trait]
pub trait WalletClient: Send + Sync + 'static {
    /// Number of transactions the wallet has ever sent (its nonce).
    async fn transaction_count(&self, wallet: &str) -> Result<u64>;
}

/// JSON-RPC `eth_getTransactionCount` against a Polygon endpoint.
pub struct PolygonRpcClient {
    client: Client,
    rpc_url: String,
}

impl PolygonRpcClient {
    pub fn new(client: Client, rpc_url: String) -> PolygonRpcClient {
        Self { client, rpc_url }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[async_trait]
impl WalletClient for PolygonRpcClient {
    async fn transaction_count(&self, wallet: &str) -> Result<u64> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_getTransactionCount",
            "params": [wallet, "latest"],
        });

        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .timeout(RPC_TIMEOUT)
            .send()
            .await
            .context("requesting transaction count")?;

        if !resp.status().is_success() {
            anyhow::bail!("RPC error: {}", resp.status());
        }

        let rpc: RpcResponse = resp.json().await.context("parsing RPC response")?;
        if let Some(err) = rpc.error {
            anyhow::bail!("RPC error response: {err}");
        }
        let hex = rpc.result.context("RPC response missing result")?;
        parse_hex_quantity(&hex)
    }
}

/// Parse an `0x`-prefixed hex quantity.
fn parse_hex_quantity(hex: &str) -> Result<u64> {
    let digits = hex.trim().trim_start_matches("0x");
    u64::from_str_radix(digits, 16).with_context(|| format!("invalid hex quantity: {hex}"))
}
