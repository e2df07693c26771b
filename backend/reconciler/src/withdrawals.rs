//! Withdrawal/Refund Coordinator.
//!
//! Fund-movement-out operations plus the owner lifecycle controls
//! (pause, resume, remove). The ledger has final authority on owner
//! match and the single-withdrawal rule; the coordinator rejects what it
//! can see up front so callers get precise errors instead of a generic
//! revert.

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info};

use crate::errors::{EngineError, Result};
use crate::ledger::{
    ContractCall, LedgerClient, RawCampaign, EVENT_FUNDS_WITHDRAWN, EVENT_REFUND_ISSUED,
};
use crate::mirror;
use crate::status::{derive_status, CampaignStatus};
use crate::units;

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalOutcome {
    pub campaign_id: u64,
    pub owner_address: String,
    pub amount: String,
    pub tx_hash: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundOutcome {
    pub campaign_id: u64,
    pub amount: String,
    pub tx_hash: String,
}

async fn require_campaign(ledger: &dyn LedgerClient, campaign_id: u64) -> Result<RawCampaign> {
    ledger
        .read_campaign(campaign_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("campaign {campaign_id}")))
}

/// Maps a mirror failure raised after a confirmed ledger write into
/// `MirrorUnavailable`, so callers never see it as "the operation
/// failed". The ledger action stands either way.
fn confirmed_mirror_failure<'a>(
    campaign_id: u64,
    tx_hash: &'a str,
) -> impl FnOnce(EngineError) -> EngineError + 'a {
    move |e| {
        error!(
            campaign_id,
            tx_hash = %tx_hash,
            "mirror write failed after confirmed ledger write: {e}"
        );
        EngineError::MirrorUnavailable(format!(
            "transaction {tx_hash} confirmed on ledger; mirror write failed: {e}"
        ))
    }
}

/// Withdraw the campaign's full balance to the owner.
///
/// Allowed whenever funds exist: the ledger enforces the owner match and
/// `isWithdrawn`. The coordinator only short-circuits the already
/// withdrawn case it can see, so at most one withdrawal ever exists.
pub async fn withdraw(
    pool: &SqlitePool,
    ledger: &dyn LedgerClient,
    campaign_id: u64,
    owner_address: &str,
) -> Result<WithdrawalOutcome> {
    let raw = require_campaign(ledger, campaign_id).await?;
    if raw.is_withdrawn {
        return Err(EngineError::Validation(format!(
            "campaign {campaign_id} funds have already been withdrawn"
        )));
    }

    let call = ContractCall::new("withdrawFunds", owner_address).arg(json!(campaign_id));
    let receipt = ledger.estimate_and_send(call).await?;

    let event = receipt
        .require_event(EVENT_FUNDS_WITHDRAWN)
        .inspect_err(|e| {
            error!(
                campaign_id,
                tx_hash = %receipt.transaction_hash,
                "withdrawal confirmed on ledger but event was missing: {e}"
            );
        })?;
    let amount = units::to_decimal(event.amount_field("amount")?);
    let now = chrono::Utc::now().timestamp();

    mirror::insert_withdrawal(
        pool,
        &receipt.transaction_hash,
        campaign_id as i64,
        owner_address,
        &amount,
        now,
    )
    .await
    .map_err(confirmed_mirror_failure(campaign_id, &receipt.transaction_hash))?;
    mirror::set_campaign_status_hint(pool, campaign_id as i64, "ended")
        .await
        .map_err(confirmed_mirror_failure(campaign_id, &receipt.transaction_hash))?;

    info!(campaign_id, %amount, tx_hash = %receipt.transaction_hash, "funds withdrawn");
    Ok(WithdrawalOutcome {
        campaign_id,
        owner_address: owner_address.to_string(),
        amount,
        tx_hash: receipt.transaction_hash,
        status: "completed",
    })
}

/// Refund every donor on a failed campaign.
///
/// Preconditions are checked here, before submission, so the caller gets
/// `RefundNotAllowed` rather than a ledger revert: the derived state must
/// be `ended` and the funds must not have been withdrawn.
pub async fn refund_donors(
    pool: &SqlitePool,
    ledger: &dyn LedgerClient,
    campaign_id: u64,
    owner_address: &str,
) -> Result<RefundOutcome> {
    let raw = require_campaign(ledger, campaign_id).await?;
    let now = chrono::Utc::now().timestamp();
    let status = derive_status(&raw, now);
    if status != CampaignStatus::Ended {
        return Err(EngineError::RefundNotAllowed(format!(
            "campaign {campaign_id} is {status}, refunds require an ended campaign"
        )));
    }
    if raw.is_withdrawn {
        return Err(EngineError::RefundNotAllowed(format!(
            "campaign {campaign_id} funds were already withdrawn"
        )));
    }

    let call = ContractCall::new("refundDonors", owner_address).arg(json!(campaign_id));
    let receipt = ledger.estimate_and_send(call).await?;

    let event = receipt
        .require_event(EVENT_REFUND_ISSUED)
        .inspect_err(|e| {
            error!(
                campaign_id,
                tx_hash = %receipt.transaction_hash,
                "refund confirmed on ledger but event was missing: {e}"
            );
        })?;
    let amount = units::to_decimal(event.amount_field("amount")?);

    // Donation rows stay untouched: they are history of an append-only
    // ledger, not a balance.
    mirror::set_campaign_status_hint(pool, campaign_id as i64, "ended")
        .await
        .map_err(confirmed_mirror_failure(campaign_id, &receipt.transaction_hash))?;

    info!(campaign_id, %amount, tx_hash = %receipt.transaction_hash, "donors refunded");
    Ok(RefundOutcome {
        campaign_id,
        amount,
        tx_hash: receipt.transaction_hash,
    })
}

/// Owner-gated pause. No mirror side effects; the derived status changes
/// on the next read.
pub async fn pause(
    ledger: &dyn LedgerClient,
    campaign_id: u64,
    owner_address: &str,
) -> Result<()> {
    require_campaign(ledger, campaign_id).await?;
    let call = ContractCall::new("pauseCampaign", owner_address).arg(json!(campaign_id));
    ledger.estimate_and_send(call).await?;
    info!(campaign_id, "campaign paused");
    Ok(())
}

pub async fn resume(
    ledger: &dyn LedgerClient,
    campaign_id: u64,
    owner_address: &str,
) -> Result<()> {
    require_campaign(ledger, campaign_id).await?;
    let call = ContractCall::new("resumeCampaign", owner_address).arg(json!(campaign_id));
    ledger.estimate_and_send(call).await?;
    info!(campaign_id, "campaign resumed");
    Ok(())
}

/// Deactivate a campaign on the ledger and flag (never delete) its
/// mirror document.
pub async fn remove(
    pool: &SqlitePool,
    ledger: &dyn LedgerClient,
    campaign_id: u64,
    owner_address: &str,
) -> Result<()> {
    require_campaign(ledger, campaign_id).await?;
    let call = ContractCall::new("removeCampaign", owner_address).arg(json!(campaign_id));
    let receipt = ledger.estimate_and_send(call).await?;
    mirror::mark_campaign_removed(pool, campaign_id as i64)
        .await
        .map_err(confirmed_mirror_failure(campaign_id, &receipt.transaction_hash))?;
    info!(campaign_id, "campaign removed");
    Ok(())
}

pub async fn withdrawals_by_organization(
    pool: &SqlitePool,
    organization_id: &str,
) -> Result<Vec<mirror::WithdrawalRecord>> {
    mirror::withdrawals_by_organization(pool, organization_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::fake::FakeLedger;
    use crate::mirror::memory_pool;

    const OWNER: &str = "0xngo1";

    fn raw(start_offset: i64, end_offset: i64) -> RawCampaign {
        let now = chrono::Utc::now().timestamp();
        RawCampaign {
            title: "Wells".to_string(),
            description: "".to_string(),
            owner_address: OWNER.to_string(),
            goal: units::to_native("10").unwrap(),
            funds_raised: units::to_native("8").unwrap(),
            start_date: now + start_offset,
            end_date: now + end_offset,
            is_active: true,
            is_paused: false,
            is_withdrawn: false,
        }
    }

    #[tokio::test]
    async fn withdraw_records_exactly_one_completed_withdrawal() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));

        let outcome = withdraw(&pool, &ledger, id, OWNER).await.unwrap();
        assert_eq!(outcome.amount, "8");
        assert_eq!(outcome.status, "completed");

        // Second attempt is rejected before any ledger call.
        let submissions_before = ledger.submission_count();
        let err = withdraw(&pool, &ledger, id, OWNER).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(ledger.submission_count(), submissions_before);

        let rows = mirror::withdrawals_by_campaign(&pool, id as i64).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount, "8");
    }

    #[tokio::test]
    async fn withdraw_by_non_owner_is_rejected_by_the_ledger() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));

        let err = withdraw(&pool, &ledger, id, "0xintruder").await.unwrap_err();
        assert!(matches!(err, EngineError::WouldRevert(_)));
        assert!(mirror::withdrawals_by_campaign(&pool, id as i64).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refund_on_active_campaign_is_rejected_without_submission() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));

        let err = refund_donors(&pool, &ledger, id, OWNER).await.unwrap_err();
        assert!(matches!(err, EngineError::RefundNotAllowed(_)));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn refund_after_withdrawal_is_rejected() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-1_000, -100));
        withdraw(&pool, &ledger, id, OWNER).await.unwrap();

        let err = refund_donors(&pool, &ledger, id, OWNER).await.unwrap_err();
        assert!(matches!(err, EngineError::RefundNotAllowed(_)));
    }

    #[tokio::test]
    async fn refund_on_ended_campaign_succeeds() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-1_000, -100));

        let outcome = refund_donors(&pool, &ledger, id, OWNER).await.unwrap();
        assert_eq!(outcome.amount, "8");
        // Refund drains the balance without setting the withdrawn flag.
        assert!(!ledger.raw_campaign(id).unwrap().is_withdrawn);
    }

    #[tokio::test]
    async fn pause_and_resume_flip_the_derived_state() {
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));
        let now = chrono::Utc::now().timestamp();

        pause(&ledger, id, OWNER).await.unwrap();
        let paused = ledger.raw_campaign(id).unwrap();
        assert_eq!(derive_status(&paused, now), CampaignStatus::Paused);

        resume(&ledger, id, OWNER).await.unwrap();
        let resumed = ledger.raw_campaign(id).unwrap();
        assert_eq!(derive_status(&resumed, now), CampaignStatus::Active);
    }

    #[tokio::test]
    async fn remove_deactivates_ledger_and_flags_mirror() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));
        mirror::insert_campaign(
            &pool,
            &mirror::NewCampaign {
                campaign_id: id as i64,
                organization_id: "org-1".to_string(),
                title: "Wells".to_string(),
                description: "".to_string(),
                image_url: "".to_string(),
                category: "Water".to_string(),
                tags: vec![],
                goal: "10".to_string(),
            },
        )
        .await
        .unwrap();

        remove(&pool, &ledger, id, OWNER).await.unwrap();

        assert!(!ledger.raw_campaign(id).unwrap().is_active);
        let doc = mirror::campaign_by_id(&pool, id as i64).await.unwrap().unwrap();
        assert!(doc.removed);
    }

    #[tokio::test]
    async fn mirror_failure_after_confirmed_withdrawal_reports_ledger_success() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));
        sqlx::query("DROP TABLE campaigns").execute(&pool).await.unwrap();

        let err = withdraw(&pool, &ledger, id, OWNER).await.unwrap_err();
        assert!(matches!(err, EngineError::MirrorUnavailable(_)));
        assert!(err.ledger_write_succeeded());

        // The ledger action stands and the withdrawal row made it in;
        // only the status hint was lost.
        assert!(ledger.raw_campaign(id).unwrap().is_withdrawn);
        let rows = mirror::withdrawals_by_campaign(&pool, id as i64).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn mirror_failure_after_confirmed_remove_reports_ledger_success() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));
        sqlx::query("DROP TABLE campaigns").execute(&pool).await.unwrap();

        let err = remove(&pool, &ledger, id, OWNER).await.unwrap_err();
        assert!(matches!(err, EngineError::MirrorUnavailable(_)));
        assert!(err.ledger_write_succeeded());
        assert!(!ledger.raw_campaign(id).unwrap().is_active);
    }

    #[tokio::test]
    async fn missing_withdrawn_event_is_reconciliation_error() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = ledger.seed_campaign(raw(-100, 1_000));
        ledger.suppress_event(EVENT_FUNDS_WITHDRAWN);

        let err = withdraw(&pool, &ledger, id, OWNER).await.unwrap_err();
        assert!(matches!(err, EngineError::Reconciliation(_)));
        assert!(err.ledger_write_succeeded());
        assert!(mirror::withdrawals_by_campaign(&pool, id as i64).await.unwrap().is_empty());
    }
}
