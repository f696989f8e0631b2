//! Application-wide error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid campaign configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Transfer rejected: {0}")]
    TransferRejected(String),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Invalid amount: {0}")]
    Amount(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Reconciliation error: {0}")]
    Reconciliation(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;
