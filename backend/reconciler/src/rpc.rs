//! JSON-RPC implementation of [`LedgerClient`].
//!
//! Talks to a ledger node exposing the crowdfunding contract through four
//! JSON-RPC 2.0 methods: `contract_call` (reads), `contract_estimateGas`,
//! `contract_sendTransaction` (blocks until a receipt exists) and
//! `contract_getEvents`.
//!
//! ## Failure mapping
//!
//! * A revert-shaped estimation error becomes [`EngineError::WouldRevert`]
//!   and is never retried here — it means the call would currently fail.
//! * Transport errors on reads and estimation become
//!   [`EngineError::LedgerUnavailable`] (retriable by the caller).
//! * A timeout while waiting for `contract_sendTransaction` becomes
//!   [`EngineError::PendingConfirmation`]: the transaction may have been
//!   included, so it must never be reported as a failure.

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::errors::{EngineError, Result};
use crate::ledger::{ContractCall, EventLogEntry, LedgerClient, RawCampaign, TxReceipt};

/// Flat gas headroom added on top of every estimate, absorbing minor
/// state drift between estimation and inclusion.
pub const GAS_SAFETY_BUFFER: u64 = 50_000;

/// JSON-RPC error code conventionally used for execution reverts.
const REVERT_ERROR_CODE: i64 = 3;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

pub struct RpcLedgerClient {
    client: Client,
    rpc_url: String,
    contract_address: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn is_revert(&self) -> bool {
        self.code == REVERT_ERROR_CODE
            || self.message.to_ascii_lowercase().contains("revert")
    }
}

/// A `getAllActiveCampaigns` entry: the ledger returns id + struct pairs.
#[derive(Debug, Deserialize)]
struct ActiveCampaignEntry {
    #[serde(rename = "campaignId")]
    campaign_id: u64,
    campaign: RawCampaign,
}

impl RpcLedgerClient {
    pub fn new(client: Client, rpc_url: impl Into<String>, contract_address: impl Into<String>) -> Self {
        RpcLedgerClient {
            client,
            rpc_url: rpc_url.into(),
            contract_address: contract_address.into(),
        }
    }

    /// POST a single JSON-RPC request. Transport failures map to
    /// `LedgerUnavailable`; RPC-level errors are returned for the caller
    /// to classify.
    async fn request(&self, method: &str, params: Value) -> Result<std::result::Result<Value, RpcError>> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| EngineError::LedgerUnavailable(format!("{method}: {e}")))?;

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| EngineError::LedgerUnavailable(format!("{method}: bad response: {e}")))?;

        if let Some(err) = body.error {
            return Ok(Err(err));
        }
        let result = body
            .result
            .ok_or_else(|| EngineError::LedgerUnavailable(format!("{method}: empty result")))?;
        Ok(Ok(result))
    }

    /// Read-only contract call.
    async fn read(&self, method: &str, args: Value) -> Result<Value> {
        let params = json!({
            "contract": self.contract_address,
            "method": method,
            "args": args,
        });
        match self.request("contract_call", params).await? {
            Ok(v) => Ok(v),
            Err(e) => Err(EngineError::LedgerUnavailable(format!(
                "{method} read failed: RPC error {}: {}",
                e.code, e.message
            ))),
        }
    }

    async fn estimate_gas(&self, call: &ContractCall) -> Result<u64> {
        let params = self.tx_params(call, None);
        match self.request("contract_estimateGas", params).await? {
            Ok(v) => v.as_u64().ok_or_else(|| {
                EngineError::LedgerUnavailable(format!("estimateGas: non-numeric result: {v}"))
            }),
            Err(e) if e.is_revert() => Err(EngineError::WouldRevert(e.message)),
            Err(e) => Err(EngineError::LedgerUnavailable(format!(
                "estimateGas: RPC error {}: {}",
                e.code, e.message
            ))),
        }
    }

    fn tx_params(&self, call: &ContractCall, gas: Option<u64>) -> Value {
        let mut params = json!({
            "contract": self.contract_address,
            "method": call.method,
            "args": call.args,
            "from": call.from,
        });
        if let Some(value) = call.value {
            params["value"] = json!(value.to_string());
        }
        if let Some(gas) = gas {
            params["gas"] = json!(gas);
        }
        params
    }
}

#[async_trait::async_trait]
impl LedgerClient for RpcLedgerClient {
    async fn read_campaign(&self, campaign_id: u64) -> Result<Option<RawCampaign>> {
        let value = self.read("campaigns", json!([campaign_id])).await?;
        if value.is_null() {
            return Ok(None);
        }
        let raw: RawCampaign = serde_json::from_value(value)?;
        // An unoccupied mapping slot decodes with a zero owner address.
        if raw.owner_address.is_empty() || raw.owner_address == ZERO_ADDRESS {
            return Ok(None);
        }
        Ok(Some(raw))
    }

    async fn campaign_balance(&self, campaign_id: u64) -> Result<u128> {
        let value = self.read("getCampaignBalance", json!([campaign_id])).await?;
        value
            .as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| value.as_u64().map(u128::from))
            .ok_or_else(|| {
                EngineError::Reconciliation(format!(
                    "getCampaignBalance({campaign_id}) returned a non-amount: {value}"
                ))
            })
    }

    async fn all_active_campaigns(&self) -> Result<Vec<(u64, RawCampaign)>> {
        let value = self.read("getAllActiveCampaigns", json!([])).await?;
        let entries: Vec<ActiveCampaignEntry> = serde_json::from_value(value)?;
        Ok(entries
            .into_iter()
            .map(|e| (e.campaign_id, e.campaign))
            .collect())
    }

    async fn estimate_and_send(&self, call: ContractCall) -> Result<TxReceipt> {
        let estimate = self.estimate_gas(&call).await?;
        let gas_limit = estimate + GAS_SAFETY_BUFFER;
        debug!(
            method = call.method,
            estimate, gas_limit, "gas estimated, submitting transaction"
        );

        let params = self.tx_params(&call, Some(gas_limit));
        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "contract_sendTransaction",
                "params": params,
            }))
            .send()
            .await;

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_connect() => {
                // The request never reached the node; safe to retry with
                // fresh estimation.
                return Err(EngineError::LedgerUnavailable(format!(
                    "{}: submission failed before dispatch: {e}",
                    call.method
                )));
            }
            Err(e) => {
                // The transaction may have been accepted; it must not be
                // reported as failed.
                warn!(method = call.method, "lost connection while awaiting receipt: {e}");
                return Err(EngineError::PendingConfirmation(format!(
                    "{} (no receipt: {e})",
                    call.method
                )));
            }
        };

        let body: RpcResponse = response.json().await.map_err(|e| {
            EngineError::PendingConfirmation(format!("{} (unreadable receipt: {e})", call.method))
        })?;

        if let Some(err) = body.error {
            if err.is_revert() {
                // Reverted at inclusion despite a clean estimate.
                return Err(EngineError::WouldRevert(err.message));
            }
            return Err(EngineError::PendingConfirmation(format!(
                "{}: RPC error {}: {}",
                call.method, err.code, err.message
            )));
        }

        let result = body.result.ok_or_else(|| {
            EngineError::Reconciliation(format!("{}: empty receipt", call.method))
        })?;
        let receipt: TxReceipt = serde_json::from_value(result).map_err(|e| {
            EngineError::Reconciliation(format!("{}: malformed receipt: {e}", call.method))
        })?;
        Ok(receipt)
    }

    async fn events(
        &self,
        name: &str,
        campaign_id: Option<u64>,
        from_block: u64,
        to_block: Option<u64>,
    ) -> Result<Vec<EventLogEntry>> {
        let mut filter = json!({});
        if let Some(id) = campaign_id {
            filter["campaignId"] = json!(id);
        }
        let mut params = json!({
            "contract": self.contract_address,
            "event": name,
            "filter": filter,
            "fromBlock": from_block,
        });
        if let Some(to) = to_block {
            params["toBlock"] = json!(to);
        }

        let value = match self.request("contract_getEvents", params).await? {
            Ok(v) => v,
            Err(e) => {
                return Err(EngineError::LedgerUnavailable(format!(
                    "getEvents({name}): RPC error {}: {}",
                    e.code, e.message
                )))
            }
        };
        let entries: Vec<EventLogEntry> = serde_json::from_value(value)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revert_detection_by_code_and_message() {
        let by_code = RpcError {
            code: 3,
            message: "execution failed".to_string(),
        };
        let by_message = RpcError {
            code: -32000,
            message: "VM Exception: revert Campaign has ended".to_string(),
        };
        let transient = RpcError {
            code: -32000,
            message: "nonce too low".to_string(),
        };
        assert!(by_code.is_revert());
        assert!(by_message.is_revert());
        assert!(!transient.is_revert());
    }

    #[test]
    fn receipt_deserializes_from_node_json() {
        let raw = serde_json::json!({
            "transaction_hash": "0xabc",
            "block": 120,
            "events": [
                { "name": "DonationReceived",
                  "data": { "campaignId": 5, "donor": "0xd", "amount": "4000000000000000000" } }
            ]
        });
        let receipt: TxReceipt = serde_json::from_value(raw).unwrap();
        assert_eq!(receipt.transaction_hash, "0xabc");
        let ev = receipt.require_event("DonationReceived").unwrap();
        assert_eq!(ev.amount_field("amount").unwrap(), 4_000_000_000_000_000_000);
    }

    #[test]
    fn active_campaign_entry_shape() {
        let raw = serde_json::json!([{
            "campaignId": 9,
            "campaign": {
                "title": "Wells",
                "description": "Clean water",
                "owner_address": "0xngo",
                "goal": "10000000000000000000",
                "funds_raised": "0",
                "start_date": 100,
                "end_date": 200,
                "is_active": true,
                "is_paused": false,
                "is_withdrawn": false
            }
        }]);
        let entries: Vec<ActiveCampaignEntry> = serde_json::from_value(raw).unwrap();
        assert_eq!(entries[0].campaign_id, 9);
        assert_eq!(entries[0].campaign.goal, 10_000_000_000_000_000_000);
    }
}
