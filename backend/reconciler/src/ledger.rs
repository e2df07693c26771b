//! Typed surface of the crowdfunding contract.
//!
//! [`LedgerClient`] is the trait seam between the coordinators and the
//! actual ledger node; the production implementation lives in
//! [`crate::rpc`], and tests substitute an in-memory fake. Everything
//! crossing this boundary is in the ledger's native integer unit —
//! decimal conversion happens in the coordinators, never here.
//!
//! Event extraction from a receipt is a fallible decode step. A receipt
//! that lacks the expected event after a successful submission is a
//! [`EngineError::Reconciliation`], never a silently-absent field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{EngineError, Result};

pub const EVENT_CAMPAIGN_CREATED: &str = "CampaignCreated";
pub const EVENT_DONATION_RECEIVED: &str = "DonationReceived";
pub const EVENT_FUNDS_WITHDRAWN: &str = "FundsWithdrawn";
pub const EVENT_REFUND_ISSUED: &str = "RefundIssued";

/// A campaign record exactly as the ledger stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawCampaign {
    pub title: String,
    pub description: String,
    pub owner_address: String,
    #[serde(with = "amount_str")]
    pub goal: u128,
    #[serde(with = "amount_str")]
    pub funds_raised: u128,
    pub start_date: i64,
    pub end_date: i64,
    pub is_active: bool,
    pub is_paused: bool,
    pub is_withdrawn: bool,
}

/// A state-changing contract invocation, ready for gas estimation and
/// submission.
#[derive(Debug, Clone)]
pub struct ContractCall {
    pub method: &'static str,
    pub args: Vec<Value>,
    pub from: String,
    /// Native-unit value attached to the transaction (payable calls).
    pub value: Option<u128>,
}

impl ContractCall {
    pub fn new(method: &'static str, from: impl Into<String>) -> Self {
        ContractCall {
            method,
            args: Vec::new(),
            from: from.into(),
            value: None,
        }
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn value(mut self, native: u128) -> Self {
        self.value = Some(native);
        self
    }
}

/// A decoded contract event, either from a receipt or from a log query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub name: String,
    /// JSON-decoded event payload, keyed by parameter name.
    pub data: Value,
}

impl LedgerEvent {
    pub fn u64_field(&self, key: &str) -> Result<u64> {
        let v = self.field(key)?;
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
            .ok_or_else(|| {
                EngineError::Reconciliation(format!(
                    "event {} field {key} is not a u64: {v}",
                    self.name
                ))
            })
    }

    /// Native-unit amounts arrive as decimal strings (or plain numbers
    /// for small values).
    pub fn amount_field(&self, key: &str) -> Result<u128> {
        let v = self.field(key)?;
        v.as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| v.as_u64().map(u128::from))
            .ok_or_else(|| {
                EngineError::Reconciliation(format!(
                    "event {} field {key} is not an amount: {v}",
                    self.name
                ))
            })
    }

    pub fn address_field(&self, key: &str) -> Result<String> {
        let v = self.field(key)?;
        v.as_str().map(String::from).ok_or_else(|| {
            EngineError::Reconciliation(format!(
                "event {} field {key} is not an address: {v}",
                self.name
            ))
        })
    }

    fn field(&self, key: &str) -> Result<&Value> {
        self.data.get(key).ok_or_else(|| {
            EngineError::Reconciliation(format!("event {} is missing field {key}", self.name))
        })
    }
}

/// Receipt returned once the ledger has included a submitted transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxReceipt {
    pub transaction_hash: String,
    pub block: u64,
    pub events: Vec<LedgerEvent>,
}

impl TxReceipt {
    /// Find the expected confirmation event in this receipt.
    ///
    /// Absence means the ledger write succeeded but its effects cannot be
    /// safely decoded — a first-class reconciliation failure, surfaced
    /// loudly and never treated as "the transaction failed".
    pub fn require_event(&self, name: &str) -> Result<&LedgerEvent> {
        self.events.iter().find(|e| e.name == name).ok_or_else(|| {
            EngineError::Reconciliation(format!(
                "transaction {} confirmed but {name} event is missing from the receipt",
                self.transaction_hash
            ))
        })
    }
}

/// An event hit from a log-range query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub event: LedgerEvent,
    pub tx_hash: String,
    pub block: u64,
    pub timestamp: i64,
}

/// Read and write access to the crowdfunding contract.
///
/// Implementations surface typed results and [`EngineError`] variants;
/// they carry no business logic. `estimate_and_send` estimates gas first
/// (a predicted revert is [`EngineError::WouldRevert`], never retried),
/// adds a flat safety buffer, submits, and blocks until a receipt exists.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// `campaigns(id)` read call. `None` when the slot is unoccupied.
    async fn read_campaign(&self, campaign_id: u64) -> Result<Option<RawCampaign>>;

    /// `getCampaignBalance(id)` read call, in native units.
    async fn campaign_balance(&self, campaign_id: u64) -> Result<u128>;

    /// `getAllActiveCampaigns()` read call — the mirror-bypassing
    /// fallback read path.
    async fn all_active_campaigns(&self) -> Result<Vec<(u64, RawCampaign)>>;

    /// Estimate gas, add the safety buffer, sign and submit, wait for the
    /// receipt.
    async fn estimate_and_send(&self, call: ContractCall) -> Result<TxReceipt>;

    /// Query historical event logs, optionally filtered to one campaign.
    async fn events(
        &self,
        name: &str,
        campaign_id: Option<u64>,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<EventLogEntry>>;
}

/// Serialize u128 amounts as decimal strings inside JSON, the way the
/// ledger node expects them.
pub mod amount_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &u128, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u128, D::Error> {
        let raw = serde_json::Value::deserialize(d)?;
        match &raw {
            serde_json::Value::String(s) => s.parse().map_err(de::Error::custom),
            serde_json::Value::Number(n) => n
                .as_u64()
                .map(u128::from)
                .ok_or_else(|| de::Error::custom(format!("amount out of range: {n}"))),
            other => Err(de::Error::custom(format!("expected amount, got {other}"))),
        }
    }
}
