//! Ethereum JSON-RPC access.
//!
//! ## Resilience
//!
//! * Exponential back-off is applied when the RPC transport fails or
//!   rate-limits, up to [`MAX_BACKOFF_SECS`] seconds.
//! * JSON-RPC level errors are not retried here; the caller decides what a
//!   node-side rejection means (a declined `eth_sendTransaction` is a
//!   rejected transfer, not a transient fault).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::amount::Amount;
use crate::errors::{LedgerError, Result};

const MAX_BACKOFF_SECS: u64 = 60;
const INITIAL_BACKOFF_SECS: u64 = 2;
const MAX_TRANSPORT_RETRIES: u32 = 5;

// ─────────────────────────────────────────────────────────
// Chain-facing types
// ─────────────────────────────────────────────────────────

/// A native-asset transaction as read back from the chain.
#[derive(Debug, Clone)]
pub struct TxInfo {
    pub hash: String,
    pub to: Option<String>,
    pub value: Amount,
    pub block_number: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub block_number: u64,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct BlockInfo {
    pub number: u64,
    pub timestamp: i64,
}

/// Everything the donation core needs from the chain: submit a transfer and
/// read transactions, receipts, and blocks.  Submission suspends until the
/// signer has signed and broadcast; once broadcast there is no cancellation,
/// only local abandonment.
#[async_trait]
pub trait ChainAccess: Send + Sync {
    async fn submit_transfer(&self, to: &str, amount: &Amount) -> Result<String>;
    async fn await_inclusion(&self, hash: &str) -> Result<()>;
    async fn transaction(&self, hash: &str) -> Result<Option<TxInfo>>;
    async fn transaction_receipt(&self, hash: &str) -> Result<Option<TxReceipt>>;
    async fn block_by_number(&self, number: u64) -> Result<Option<BlockInfo>>;
}

// ─────────────────────────────────────────────────────────
// Address helpers
// ─────────────────────────────────────────────────────────

/// Syntactic check for a 20-byte hex address (`0x` + 40 hex digits).
pub fn is_address(s: &str) -> bool {
    match s.strip_prefix("0x") {
        Some(body) if body.len() == 40 => hex::decode(body).is_ok(),
        _ => false,
    }
}

/// Chain addresses are case-insensitive for equality.
pub fn same_address(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// Explorer link for a transaction hash.
pub fn explorer_tx_url(base: &str, hash: &str) -> String {
    format!("{}/tx/{}", base.trim_end_matches('/'), hash)
}

// ─────────────────────────────────────────────────────────
// JSON-RPC response shapes
// ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawTx {
    hash: String,
    to: Option<String>,
    value: String,
    #[serde(rename = "blockNumber")]
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReceipt {
    status: Option<String>,
    #[serde(rename = "blockNumber")]
    block_number: String,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    number: String,
    timestamp: String,
}

/// Parse a JSON-RPC hex quantity into a u64 (block numbers, timestamps).
fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16)
        .map_err(|_| LedgerError::Rpc(format!("bad hex quantity: {s:?}")))
}

// ─────────────────────────────────────────────────────────
// RPC client
// ─────────────────────────────────────────────────────────

pub struct EthRpc {
    client: Client,
    rpc_url: String,
    /// Node-managed account used for server-side dispatch; `None` disables
    /// `submit_transfer` (the browser wallet signs instead).
    sender: Option<String>,
    inclusion_poll: Duration,
    inclusion_timeout: Duration,
}

impl EthRpc {
    pub fn new(
        client: Client,
        rpc_url: String,
        sender: Option<String>,
        inclusion_poll: Duration,
        inclusion_timeout: Duration,
    ) -> Self {
        EthRpc {
            client,
            rpc_url,
            sender,
            inclusion_poll,
            inclusion_timeout,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut backoff = INITIAL_BACKOFF_SECS;
        let mut attempts = 0u32;

        loop {
            let response = self.client.post(&self.rpc_url).json(&payload).send().await;

            match response {
                Err(e) => {
                    attempts += 1;
                    if attempts > MAX_TRANSPORT_RETRIES {
                        return Err(e.into());
                    }
                    warn!("RPC request failed (will retry in {backoff}s): {e}");
                    tokio::time::sleep(Duration::from_secs(backoff)).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                }
                Ok(resp) => {
                    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        attempts += 1;
                        if attempts > MAX_TRANSPORT_RETRIES {
                            return Err(LedgerError::Rpc("rate-limited by RPC".to_string()));
                        }
                        warn!("Rate-limited by RPC (will retry in {backoff}s)");
                        tokio::time::sleep(Duration::from_secs(backoff)).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF_SECS);
                        continue;
                    }

                    let body: RpcEnvelope = resp.json().await?;
                    if let Some(err) = body.error {
                        return Err(LedgerError::Rpc(format!("{}: {}", err.code, err.message)));
                    }
                    return Ok(body.result.unwrap_or(Value::Null));
                }
            }
        }
    }
}

#[async_trait]
impl ChainAccess for EthRpc {
    async fn submit_transfer(&self, to: &str, amount: &Amount) -> Result<String> {
        let from = self.sender.as_deref().ok_or_else(|| {
            LedgerError::Config(
                "SENDER_ADDRESS is not set; server-side dispatch is disabled".to_string(),
            )
        })?;

        let result = self
            .call(
                "eth_sendTransaction",
                json!([{
                    "from": from,
                    "to": to,
                    "value": amount.to_hex_quantity(),
                }]),
            )
            .await
            .map_err(|e| match e {
                LedgerError::Rpc(msg) => LedgerError::TransferRejected(msg),
                other => other,
            })?;

        result
            .as_str()
            .map(String::from)
            .ok_or_else(|| LedgerError::Rpc("eth_sendTransaction returned no hash".to_string()))
    }

    async fn await_inclusion(&self, hash: &str) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.inclusion_timeout;
        loop {
            if self.transaction_receipt(hash).await?.is_some() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(LedgerError::Rpc(format!(
                    "transaction {hash} not included within {:?}",
                    self.inclusion_timeout
                )));
            }
            tokio::time::sleep(self.inclusion_poll).await;
        }
    }

    async fn transaction(&self, hash: &str) -> Result<Option<TxInfo>> {
        let result = self.call("eth_getTransactionByHash", json!([hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawTx = serde_json::from_value(result)?;
        Ok(Some(TxInfo {
            value: Amount::from_hex_quantity(&raw.value)?,
            block_number: raw.block_number.as_deref().map(parse_quantity).transpose()?,
            hash: raw.hash,
            to: raw.to,
        }))
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Option<TxReceipt>> {
        let result = self.call("eth_getTransactionReceipt", json!([hash])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawReceipt = serde_json::from_value(result)?;
        Ok(Some(TxReceipt {
            block_number: parse_quantity(&raw.block_number)?,
            succeeded: raw.status.as_deref() == Some("0x1"),
        }))
    }

    async fn block_by_number(&self, number: u64) -> Result<Option<BlockInfo>> {
        let tag = format!("0x{number:x}");
        let result = self.call("eth_getBlockByNumber", json!([tag, false])).await?;
        if result.is_null() {
            return Ok(None);
        }
        let raw: RawBlock = serde_json::from_value(result)?;
        Ok(Some(BlockInfo {
            number: parse_quantity(&raw.number)?,
            timestamp: parse_quantity(&raw.timestamp)? as i64,
        }))
    }
}

// ─────────────────────────────────────────────────────────
// Scripted chain for tests
// ─────────────────────────────────────────────────────────


// ─────────────────────────────────────────────────────────
// Unit tests
// ─────────────────────────────────────────────────────────
