//! Donation Coordinator.
//!
//! Sequences one donation end to end: lifecycle precondition, ledger
//! submission, confirmation-event check, authoritative balance re-read,
//! then a single atomic mirror update. The mirror's `funds_raised` is
//! *set* to the re-read ledger figure rather than incremented, which
//! makes concurrent donors' mirror writes converge on the ledger's own
//! total no matter how they interleave.

use serde::Serialize;
use serde_json::json;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::errors::{EngineError, Result};
use crate::ledger::{ContractCall, LedgerClient, EVENT_DONATION_RECEIVED};
use crate::mirror;
use crate::status::{derive_status, CampaignStatus};
use crate::units;

#[derive(Debug, Clone, Serialize)]
pub struct DonationOutcome {
    pub campaign_id: u64,
    pub donor_address: String,
    pub amount: String,
    pub total_raised: String,
    pub tx_hash: String,
    pub timestamp: i64,
}

pub async fn donate(
    pool: &SqlitePool,
    ledger: &dyn LedgerClient,
    campaign_id: u64,
    amount: &str,
    donor_address: &str,
) -> Result<DonationOutcome> {
    let raw = ledger
        .read_campaign(campaign_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("campaign {campaign_id}")))?;

    let now = chrono::Utc::now().timestamp();
    let status = derive_status(&raw, now);
    if status != CampaignStatus::Active {
        return Err(EngineError::CampaignNotDonatable(status));
    }

    let amount_native = units::to_native(amount)?;
    if amount_native == 0 {
        return Err(EngineError::Validation(
            "donation amount must be positive".to_string(),
        ));
    }

    let call = ContractCall::new("donate", donor_address)
        .arg(json!(campaign_id))
        .value(amount_native);
    let receipt = ledger.estimate_and_send(call).await?;

    // Money has moved; every failure from here on must say so.
    let event = receipt
        .require_event(EVENT_DONATION_RECEIVED)
        .inspect_err(|e| {
            error!(
                campaign_id,
                tx_hash = %receipt.transaction_hash,
                "donation confirmed on ledger but event shape was unexpected: {e}"
            );
        })?;
    let confirmed_amount = event.amount_field("amount")?;

    // Authoritative figure: re-read from the ledger, never a local sum.
    // The re-read already reflects any donation that raced with this one.
    let updated = ledger
        .read_campaign(campaign_id)
        .await
        .map_err(|e| {
            EngineError::Reconciliation(format!(
                "donation {} confirmed but balance re-read failed: {e}",
                receipt.transaction_hash
            ))
        })?
        .ok_or_else(|| {
            EngineError::Reconciliation(format!(
                "donation {} confirmed but campaign {campaign_id} vanished on re-read",
                receipt.transaction_hash
            ))
        })?;
    let total_raised = units::to_decimal(updated.funds_raised);
    let confirmed_decimal = units::to_decimal(confirmed_amount);

    let inserted = mirror::apply_confirmed_donation(
        pool,
        campaign_id as i64,
        donor_address,
        &confirmed_decimal,
        &total_raised,
        &receipt.transaction_hash,
        now,
    )
    .await
    .map_err(|e| {
        error!(
            campaign_id,
            tx_hash = %receipt.transaction_hash,
            "mirror update failed after confirmed donation; needs re-derivation: {e}"
        );
        EngineError::MirrorUnavailable(format!(
            "donation {} confirmed on ledger; mirror update failed: {e}",
            receipt.transaction_hash
        ))
    })?;

    if inserted {
        info!(
            campaign_id,
            donor = donor_address,
            amount = %confirmed_decimal,
            tx_hash = %receipt.transaction_hash,
            "donation mirrored"
        );
    } else {
        // Replay via some retry path; the ledger event already exists
        // and the mirror was untouched.
        warn!(
            campaign_id,
            tx_hash = %receipt.transaction_hash,
            "donation already mirrored, ingestion skipped"
        );
    }

    Ok(DonationOutcome {
        campaign_id,
        donor_address: donor_address.to_string(),
        amount: confirmed_decimal,
        total_raised,
        tx_hash: receipt.transaction_hash,
        timestamp: now,
    })
}

/// Donation history straight from ledger event logs (the path dashboards
/// use when they want ledger truth rather than the mirror).
pub async fn ledger_donation_history(
    ledger: &dyn LedgerClient,
    campaign_id: u64,
) -> Result<Vec<DonationOutcome>> {
    let entries = ledger
        .events(EVENT_DONATION_RECEIVED, Some(campaign_id), 0, None)
        .await?;
    let mut out = Vec::with_capacity(entries.len());
    for entry in entries {
        let amount = entry.event.amount_field("amount")?;
        out.push(DonationOutcome {
            campaign_id,
            donor_address: entry.event.address_field("donor")?,
            amount: units::to_decimal(amount),
            total_raised: String::new(),
            tx_hash: entry.tx_hash,
            timestamp: entry.timestamp,
        });
    }
    Ok(out)
}

pub async fn donations_by_donor(
    pool: &SqlitePool,
    donor_address: &str,
) -> Result<Vec<mirror::DonationRecord>> {
    mirror::donations_by_donor(pool, donor_address).await
}

pub async fn donations_by_organization(
    pool: &SqlitePool,
    organization_id: &str,
) -> Result<Vec<mirror::DonationRecord>> {
    mirror::donations_by_organization(pool, organization_id).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaigns::testutil::approved_org;
    use crate::ledger::fake::FakeLedger;
    use crate::ledger::RawCampaign;
    use crate::mirror::memory_pool;

    fn live_raw(owner: &str) -> RawCampaign {
        let now = chrono::Utc::now().timestamp();
        RawCampaign {
            title: "Wells".to_string(),
            description: "".to_string(),
            owner_address: owner.to_string(),
            goal: units::to_native("10").unwrap(),
            funds_raised: 0,
            start_date: now - 100,
            end_date: now + 1_000,
            is_active: true,
            is_paused: false,
            is_withdrawn: false,
        }
    }

    async fn mirrored_campaign(pool: &SqlitePool, ledger: &FakeLedger, owner: &str) -> u64 {
        approved_org(pool, 1).await;
        let id = ledger.seed_campaign(live_raw(owner));
        mirror::insert_campaign(
            pool,
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
        id
    }

    #[tokio::test]
    async fn donation_updates_mirror_from_ledger_balance() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = mirrored_campaign(&pool, &ledger, "0xngo1").await;

        let outcome = donate(&pool, &ledger, id, "4", "0xdonor1").await.unwrap();
        assert_eq!(outcome.amount, "4");
        assert_eq!(outcome.total_raised, "4");

        let doc = mirror::campaign_by_id(&pool, id as i64).await.unwrap().unwrap();
        assert_eq!(doc.funds_raised, "4");
        assert_eq!(mirror::donor_addresses(&pool, id as i64).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn two_donations_settle_on_ledger_total_same_donor() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = mirrored_campaign(&pool, &ledger, "0xngo1").await;

        donate(&pool, &ledger, id, "4", "0xsame").await.unwrap();
        let second = donate(&pool, &ledger, id, "4", "0xsame").await.unwrap();
        assert_eq!(second.total_raised, "8");

        let doc = mirror::campaign_by_id(&pool, id as i64).await.unwrap().unwrap();
        let ledger_total = units::to_decimal(ledger.raw_campaign(id).unwrap().funds_raised);
        assert_eq!(doc.funds_raised, ledger_total);
        assert_eq!(doc.funds_raised, "8");
        // Same address twice: donor set size 1.
        assert_eq!(mirror::donor_addresses(&pool, id as i64).await.unwrap().len(), 1);
        assert_eq!(mirror::donations_by_campaign(&pool, id as i64).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn two_donations_distinct_donors_both_counted() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = mirrored_campaign(&pool, &ledger, "0xngo1").await;

        donate(&pool, &ledger, id, "4", "0xalice").await.unwrap();
        donate(&pool, &ledger, id, "4", "0xbob").await.unwrap();

        let doc = mirror::campaign_by_id(&pool, id as i64).await.unwrap().unwrap();
        assert_eq!(doc.funds_raised, "8");
        assert_eq!(mirror::donor_addresses(&pool, id as i64).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nonpositive_amount_is_rejected_before_submission() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = mirrored_campaign(&pool, &ledger, "0xngo1").await;

        let err = donate(&pool, &ledger, id, "0", "0xdonor").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        let err = donate(&pool, &ledger, id, "-1", "0xdonor").await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn paused_campaign_is_not_donatable() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let mut raw = live_raw("0xngo1");
        raw.is_paused = true;
        let id = ledger.seed_campaign(raw);

        let err = donate(&pool, &ledger, id, "1", "0xdonor").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::CampaignNotDonatable(CampaignStatus::Paused)
        ));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn pending_campaign_is_not_donatable() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let now = chrono::Utc::now().timestamp();
        let mut raw = live_raw("0xngo1");
        raw.start_date = now + 500;
        let id = ledger.seed_campaign(raw);

        let err = donate(&pool, &ledger, id, "1", "0xdonor").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::CampaignNotDonatable(CampaignStatus::Pending)
        ));
    }

    #[tokio::test]
    async fn expired_window_with_stale_active_flag_is_rejected() {
        // endDate passed, is_active still true, is_paused false: the
        // derived state wins and the donation never reaches the ledger.
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let now = chrono::Utc::now().timestamp();
        let mut raw = live_raw("0xngo1");
        raw.end_date = now - 1;
        let id = ledger.seed_campaign(raw);

        let err = donate(&pool, &ledger, id, "1", "0xdonor").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::CampaignNotDonatable(CampaignStatus::Ended)
        ));
        assert_eq!(ledger.submission_count(), 0);
    }

    #[tokio::test]
    async fn missing_donation_event_is_reconciliation_error() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = mirrored_campaign(&pool, &ledger, "0xngo1").await;
        ledger.suppress_event(EVENT_DONATION_RECEIVED);

        let err = donate(&pool, &ledger, id, "4", "0xdonor").await.unwrap_err();
        assert!(matches!(err, EngineError::Reconciliation(_)));
        assert!(err.ledger_write_succeeded());
        // The mirror was not touched with unverifiable data.
        let doc = mirror::campaign_by_id(&pool, id as i64).await.unwrap().unwrap();
        assert_eq!(doc.funds_raised, "0");
        assert!(mirror::donations_by_campaign(&pool, id as i64).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn would_revert_surfaces_without_mirror_changes() {
        let pool = memory_pool().await;
        let ledger = FakeLedger::new();
        let id = mirrored_campaign(&pool, &ledger, "0xngo1").await;
        ledger.force_revert("insufficient funds");

        let err = donate(&pool, &ledger, id, "4", "0xdonor").await.unwrap_err();
        assert!(matches!(err, EngineError::WouldRevert(_)));
        assert!(!err.ledger_write_succeeded());
        let doc = mirror::campaign_by_id(&pool, id as i64).await.unwrap().unwrap();
        assert_eq!(doc.funds_raised, "0");
    }
}
