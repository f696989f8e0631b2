//! Application configuration loaded from environment variables.

use crate::errors::{LedgerError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Ethereum JSON-RPC endpoint (Sepolia by default)
    pub rpc_url: String,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Chain the service expects donation transfers on
    pub chain_id: u64,
    /// Block-explorer base; a confirmed hash is presented as `{base}/tx/{hash}`
    pub explorer_base_url: String,
    /// Node-managed account used for server-side dispatch (optional)
    pub sender_address: Option<String>,
    /// Extra verification attempts while a transaction is not yet indexed
    pub verify_retries: u32,
    /// Initial delay between verification retries; doubles each attempt
    pub verify_retry_delay_ms: u64,
    /// Poll interval while waiting for a submitted transfer to be mined
    pub inclusion_poll_ms: u64,
    /// Give up waiting for inclusion after this long
    pub inclusion_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL")
                .unwrap_or_else(|_| "https://ethereum-sepolia-rpc.publicnode.com".to_string()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./donation_ledger.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid API_PORT".to_string()))?,
            chain_id: env_var("CHAIN_ID")
                .unwrap_or_else(|_| "11155111".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid CHAIN_ID".to_string()))?,
            explorer_base_url: env_var("EXPLORER_BASE_URL")
                .unwrap_or_else(|_| "https://sepolia.etherscan.io".to_string()),
            sender_address: env_var("SENDER_ADDRESS").ok(),
            verify_retries: env_var("VERIFY_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid VERIFY_RETRIES".to_string()))?,
            verify_retry_delay_ms: env_var("VERIFY_RETRY_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid VERIFY_RETRY_DELAY_MS".to_string()))?,
            inclusion_poll_ms: env_var("INCLUSION_POLL_MS")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid INCLUSION_POLL_MS".to_string()))?,
            inclusion_timeout_secs: env_var("INCLUSION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "180".to_string())
                .parse()
                .map_err(|_| LedgerError::Config("Invalid INCLUSION_TIMEOUT_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| LedgerError::Config(format!("Missing env var: {key}")))
}
