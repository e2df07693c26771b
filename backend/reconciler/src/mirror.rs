//! Mirror store — migrations, collections, and reconciliation helpers.
//!
//! The mirror is the fast, queryable reflection of ledger state plus
//! everything the ledger does not hold (titles, categories, donor sets,
//! organization records). It is never the origin of authority for money:
//! `funds_raised` is always *set* to a balance re-read from the ledger,
//! never incremented locally, and donation rows are `INSERT OR IGNORE`
//! keyed by `(tx_hash, campaign_id)` so replayed confirmations are no-ops.

use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::info;

use crate::errors::{EngineError, Result};

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Establish the SQLite connection pool and run pending migrations.
pub async fn init_pool(database_url: &str) -> Result<SqlitePool> {
    let url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{database_url}")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;

    MIGRATOR.run(&pool).await?;
    info!("Mirror migrations applied successfully");
    Ok(pool)
}

// ─────────────────────────────────────────────────────────
// Records
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct OrganizationRecord {
    pub id: String,
    pub wallet_address: String,
    pub registration_id: String,
    pub name: String,
    pub email: String,
    pub status: String,
    pub remarks: String,
    pub folder_key: Option<String>,
    pub document_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub verified_at: Option<i64>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct CampaignRecord {
    pub campaign_id: i64,
    pub organization_id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub category: String,
    /// JSON array of tag strings, stored verbatim.
    pub tags: String,
    pub goal: String,
    pub funds_raised: String,
    /// Display hint only; the authoritative state is derived at read time.
    pub status: String,
    pub removed: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct DonationRecord {
    pub id: i64,
    pub tx_hash: String,
    pub campaign_id: i64,
    pub donor_address: String,
    pub amount: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct WithdrawalRecord {
    pub id: i64,
    pub tx_hash: String,
    pub campaign_id: i64,
    pub owner_address: String,
    pub amount: String,
    pub status: String,
    pub timestamp: i64,
}

// ─────────────────────────────────────────────────────────
// Organizations
// ─────────────────────────────────────────────────────────

pub struct NewOrganization {
    pub id: String,
    pub wallet_address: String,
    pub registration_id: String,
    pub name: String,
    pub email: String,
}

pub async fn insert_organization(pool: &SqlitePool, org: &NewOrganization) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO organizations
            (id, wallet_address, registration_id, name, email, status, remarks,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, 'pending', '', ?6, ?6)
        "#,
    )
    .bind(&org.id)
    .bind(&org.wallet_address)
    .bind(&org.registration_id)
    .bind(&org.name)
    .bind(&org.email)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => EngineError::Validation(
            "wallet address or registration id is already registered".to_string(),
        ),
        _ => e.into(),
    })?;
    Ok(())
}

pub async fn organization_by_id(pool: &SqlitePool, id: &str) -> Result<Option<OrganizationRecord>> {
    let row = sqlx::query_as::<_, OrganizationRecord>("SELECT * FROM organizations WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

pub async fn organization_by_wallet(
    pool: &SqlitePool,
    wallet_address: &str,
) -> Result<Option<OrganizationRecord>> {
    let row = sqlx::query_as::<_, OrganizationRecord>(
        "SELECT * FROM organizations WHERE wallet_address = ?1",
    )
    .bind(wallet_address)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn organizations_by_status(
    pool: &SqlitePool,
    status: &str,
) -> Result<Vec<OrganizationRecord>> {
    let rows = sqlx::query_as::<_, OrganizationRecord>(
        "SELECT * FROM organizations WHERE status = ?1 ORDER BY created_at DESC",
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_organizations(pool: &SqlitePool) -> Result<Vec<OrganizationRecord>> {
    let rows =
        sqlx::query_as::<_, OrganizationRecord>("SELECT * FROM organizations ORDER BY created_at DESC")
            .fetch_all(pool)
            .await?;
    Ok(rows)
}

pub async fn recent_registrations(pool: &SqlitePool, limit: i64) -> Result<Vec<OrganizationRecord>> {
    let rows = sqlx::query_as::<_, OrganizationRecord>(
        "SELECT * FROM organizations ORDER BY created_at DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn update_organization_status(
    pool: &SqlitePool,
    id: &str,
    status: &str,
    remarks: &str,
) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let verified_at = if status == "approved" { Some(now) } else { None };
    let affected = sqlx::query(
        r#"
        UPDATE organizations
        SET    status = ?2, remarks = ?3, updated_at = ?4, verified_at = ?5
        WHERE  id = ?1
        "#,
    )
    .bind(id)
    .bind(status)
    .bind(remarks)
    .bind(now)
    .bind(verified_at)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

/// Persist the blob-store folder key and document URL on the
/// organization document, so repeat uploads land under a stable key
/// without any process-local state.
pub async fn set_organization_documents(
    pool: &SqlitePool,
    id: &str,
    folder_key: &str,
    document_url: &str,
) -> Result<bool> {
    let now = chrono::Utc::now().timestamp();
    let affected = sqlx::query(
        "UPDATE organizations SET folder_key = ?2, document_url = ?3, updated_at = ?4 WHERE id = ?1",
    )
    .bind(id)
    .bind(folder_key)
    .bind(document_url)
    .bind(now)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(affected > 0)
}

// ─────────────────────────────────────────────────────────
// Campaigns
// ─────────────────────────────────────────────────────────

pub struct NewCampaign {
    pub campaign_id: i64,
    pub organization_id: String,
    pub title: String,
    pub description: String,
    pub image_url: String,
    pub category: String,
    pub tags: Vec<String>,
    pub goal: String,
}

/// Create the mirror document for a ledger-assigned campaign id, with
/// zero funds raised and an empty donor set.
pub async fn insert_campaign(pool: &SqlitePool, campaign: &NewCampaign) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let tags = serde_json::to_string(&campaign.tags)?;
    sqlx::query(
        r#"
        INSERT INTO campaigns
            (campaign_id, organization_id, title, description, image_url,
             category, tags, goal, funds_raised, status, removed, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '0', 'active', 0, ?9, ?9)
        "#,
    )
    .bind(campaign.campaign_id)
    .bind(&campaign.organization_id)
    .bind(&campaign.title)
    .bind(&campaign.description)
    .bind(&campaign.image_url)
    .bind(&campaign.category)
    .bind(tags)
    .bind(&campaign.goal)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn campaign_by_id(pool: &SqlitePool, campaign_id: i64) -> Result<Option<CampaignRecord>> {
    let row =
        sqlx::query_as::<_, CampaignRecord>("SELECT * FROM campaigns WHERE campaign_id = ?1")
            .bind(campaign_id)
            .fetch_optional(pool)
            .await?;
    Ok(row)
}

pub async fn campaigns_by_organization(
    pool: &SqlitePool,
    organization_id: &str,
) -> Result<Vec<CampaignRecord>> {
    let rows = sqlx::query_as::<_, CampaignRecord>(
        "SELECT * FROM campaigns WHERE organization_id = ?1 ORDER BY created_at DESC",
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_campaigns(pool: &SqlitePool) -> Result<Vec<CampaignRecord>> {
    let rows = sqlx::query_as::<_, CampaignRecord>("SELECT * FROM campaigns ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(rows)
}

/// Refresh the cached display status. Purely a hint; readers derive the
/// real state from the ledger.
pub async fn set_campaign_status_hint(
    pool: &SqlitePool,
    campaign_id: i64,
    status: &str,
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("UPDATE campaigns SET status = ?2, updated_at = ?3 WHERE campaign_id = ?1")
        .bind(campaign_id)
        .bind(status)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flag a campaign as removed. Never deletes: donation history keeps
/// referencing the row.
pub async fn mark_campaign_removed(pool: &SqlitePool, campaign_id: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        "UPDATE campaigns SET removed = 1, status = 'ended', updated_at = ?2 WHERE campaign_id = ?1",
    )
    .bind(campaign_id)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn donor_addresses(pool: &SqlitePool, campaign_id: i64) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT donor_address FROM campaign_donors WHERE campaign_id = ?1 ORDER BY donor_address",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(a,)| a).collect())
}

// ─────────────────────────────────────────────────────────
// Donations
// ─────────────────────────────────────────────────────────

/// Apply one ledger-confirmed donation to the mirror, atomically:
///
/// 1. set `funds_raised` to the balance re-read from the ledger (never an
///    increment — concurrent donors both settle on the ledger's figure),
/// 2. add the donor to the donor set (set semantics),
/// 3. insert the immutable donation row.
///
/// All three run in one SQLite transaction. A replayed confirmation
/// (same tx hash + campaign) leaves both `campaign_donors` and
/// `donations` untouched; the balance write is idempotent by
/// construction. Returns `true` when a new donation row was created.
pub async fn apply_confirmed_donation(
    pool: &SqlitePool,
    campaign_id: i64,
    donor_address: &str,
    amount: &str,
    ledger_funds_raised: &str,
    tx_hash: &str,
    timestamp: i64,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE campaigns SET funds_raised = ?2, updated_at = ?3 WHERE campaign_id = ?1")
        .bind(campaign_id)
        .bind(ledger_funds_raised)
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO campaign_donors (campaign_id, donor_address) VALUES (?1, ?2)")
        .bind(campaign_id)
        .bind(donor_address)
        .execute(&mut *tx)
        .await?;

    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO donations (tx_hash, campaign_id, donor_address, amount, timestamp)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(tx_hash)
    .bind(campaign_id)
    .bind(donor_address)
    .bind(amount)
    .bind(timestamp)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(inserted > 0)
}

pub async fn donations_by_campaign(
    pool: &SqlitePool,
    campaign_id: i64,
) -> Result<Vec<DonationRecord>> {
    let rows = sqlx::query_as::<_, DonationRecord>(
        "SELECT * FROM donations WHERE campaign_id = ?1 ORDER BY timestamp DESC, id DESC",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn donations_by_donor(
    pool: &SqlitePool,
    donor_address: &str,
) -> Result<Vec<DonationRecord>> {
    let rows = sqlx::query_as::<_, DonationRecord>(
        "SELECT * FROM donations WHERE donor_address = ?1 ORDER BY timestamp DESC, id DESC",
    )
    .bind(donor_address)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn donations_by_organization(
    pool: &SqlitePool,
    organization_id: &str,
) -> Result<Vec<DonationRecord>> {
    let rows = sqlx::query_as::<_, DonationRecord>(
        r#"
        SELECT d.*
        FROM   donations d
        JOIN   campaigns c ON c.campaign_id = d.campaign_id
        WHERE  c.organization_id = ?1
        ORDER  BY d.timestamp DESC, d.id DESC
        "#,
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn recent_donations(pool: &SqlitePool, limit: i64) -> Result<Vec<DonationRecord>> {
    let rows = sqlx::query_as::<_, DonationRecord>(
        "SELECT * FROM donations ORDER BY timestamp DESC, id DESC LIMIT ?1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Withdrawals
// ─────────────────────────────────────────────────────────

/// Record a ledger-confirmed withdrawal. Keyed by tx hash; a replay is a
/// no-op, so at most one row ever exists per ledger withdrawal.
pub async fn insert_withdrawal(
    pool: &SqlitePool,
    tx_hash: &str,
    campaign_id: i64,
    owner_address: &str,
    amount: &str,
    timestamp: i64,
) -> Result<bool> {
    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO withdrawals
            (tx_hash, campaign_id, owner_address, amount, status, timestamp)
        VALUES (?1, ?2, ?3, ?4, 'completed', ?5)
        "#,
    )
    .bind(tx_hash)
    .bind(campaign_id)
    .bind(owner_address)
    .bind(amount)
    .bind(timestamp)
    .execute(pool)
    .await?
    .rows_affected();
    Ok(inserted > 0)
}

pub async fn withdrawals_by_organization(
    pool: &SqlitePool,
    organization_id: &str,
) -> Result<Vec<WithdrawalRecord>> {
    let rows = sqlx::query_as::<_, WithdrawalRecord>(
        r#"
        SELECT w.*
        FROM   withdrawals w
        JOIN   campaigns c ON c.campaign_id = w.campaign_id
        WHERE  c.organization_id = ?1
        ORDER  BY w.timestamp DESC, w.id DESC
        "#,
    )
    .bind(organization_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn withdrawals_by_campaign(
    pool: &SqlitePool,
    campaign_id: i64,
) -> Result<Vec<WithdrawalRecord>> {
    let rows = sqlx::query_as::<_, WithdrawalRecord>(
        "SELECT * FROM withdrawals WHERE campaign_id = ?1 ORDER BY timestamp DESC, id DESC",
    )
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

// ─────────────────────────────────────────────────────────
// Test support
// ─────────────────────────────────────────────────────────

/// In-memory pool for tests. One connection only — each `sqlite::memory:`
/// connection is its own database.
#[cfg(test)]
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    MIGRATOR.run(&pool).await.expect("migrations");
    pool
}
