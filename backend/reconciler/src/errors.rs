//! Application-wide error types.
//!
//! The taxonomy separates failures that happen *before* a ledger
//! submission (returnable as plain request errors) from failures *after*
//! a submission succeeded, where money has already moved and the only
//! honest answer is "confirmed on the ledger, mirror catching up".

use thiserror::Error;

use crate::status::CampaignStatus;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad input, caught before any I/O.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Caller or organization precondition failed.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Campaign lifecycle state forbids donating.
    #[error("Campaign is not accepting donations (status: {0})")]
    CampaignNotDonatable(CampaignStatus),

    /// Refund precondition failed (not ended, or already withdrawn).
    #[error("Refund not allowed: {0}")]
    RefundNotAllowed(String),

    /// Gas estimation predicts the call would revert. Never retried.
    #[error("Ledger call would revert: {0}")]
    WouldRevert(String),

    /// Transient network/timeout failure talking to the ledger. Retriable.
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// A signed transaction was submitted but no receipt was obtained.
    /// The caller must not assume failure — the transaction may land.
    #[error("Transaction {0} submitted, confirmation pending")]
    PendingConfirmation(String),

    /// A ledger write succeeded but expected confirmation data was
    /// missing or malformed. Always logged at error level upstream.
    #[error("Reconciliation error: {0}")]
    Reconciliation(String),

    /// Mirror write failed after a successful ledger write. The ledger
    /// action stands; the record must be re-derived from the ledger.
    #[error("Mirror unavailable: {0}")]
    MirrorUnavailable(String),

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
}

impl EngineError {
    /// Whether a caller may safely retry the whole operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::LedgerUnavailable(_))
    }

    /// Whether the error was raised after a ledger write already
    /// succeeded. Such errors must never be reported as "the operation
    /// failed" — money has moved.
    pub fn ledger_write_succeeded(&self) -> bool {
        matches!(
            self,
            EngineError::PendingConfirmation(_)
                | EngineError::Reconciliation(_)
                | EngineError::MirrorUnavailable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
