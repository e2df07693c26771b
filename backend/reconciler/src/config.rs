//! Application configuration loaded from environment variables.

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the ledger node
    pub rpc_url: String,
    /// Address of the crowdfunding contract on the ledger
    pub contract_address: String,
    /// Path to the SQLite mirror database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Request-level timeout for ledger RPC calls, in seconds.
    /// A timeout is reported as `LedgerUnavailable`, not as failure.
    pub rpc_timeout_secs: u64,
    /// Optional webhook endpoint for verification notifications
    pub notify_webhook_url: Option<String>,
    /// Optional blob store endpoint for organization documents
    pub blob_store_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            rpc_url: env_var("RPC_URL").unwrap_or_else(|_| "http://127.0.0.1:7545".to_string()),
            contract_address: env_var("CONTRACT_ADDRESS").map_err(|_| {
                EngineError::Config("CONTRACT_ADDRESS environment variable is required".to_string())
            })?,
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./decrowd_mirror.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid API_PORT".to_string()))?,
            rpc_timeout_secs: env_var("RPC_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| EngineError::Config("Invalid RPC_TIMEOUT_SECS".to_string()))?,
            notify_webhook_url: env_var("NOTIFY_WEBHOOK_URL").ok(),
            blob_store_url: env_var("BLOB_STORE_URL").ok(),
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| EngineError::Config(format!("Missing env var: {key}")))
}
