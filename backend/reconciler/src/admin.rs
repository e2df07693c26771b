//! Admin Verification Workflow and dashboard aggregates.
//!
//! Organization approval is an off-chain gate with no ledger
//! counterpart: the whole workflow is a single mirror document update
//! plus a notification. Campaign creation for unapproved organizations
//! is blocked in `campaigns::create_campaign`, not here.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::SqlitePool;
use tracing::warn;

use crate::errors::{EngineError, Result};
use crate::external::{BlobStore, Notifier, TEMPLATE_ORG_APPROVED, TEMPLATE_ORG_REJECTED};
use crate::mirror::{self, OrganizationRecord};
use crate::units;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationStatus {
    Pending,
    Approved,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl FromStr for VerificationStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(EngineError::Validation(format!(
                "invalid verification status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterOrganizationInput {
    pub name: String,
    pub email: String,
    pub wallet_address: String,
    pub registration_id: String,
}

/// Register an organization in `pending` state.
pub async fn register_organization(
    pool: &SqlitePool,
    input: RegisterOrganizationInput,
) -> Result<OrganizationRecord> {
    if input.name.trim().is_empty()
        || input.email.trim().is_empty()
        || input.wallet_address.trim().is_empty()
        || input.registration_id.trim().is_empty()
    {
        return Err(EngineError::Validation(
            "name, email, wallet address and registration id are required".to_string(),
        ));
    }

    let org = mirror::NewOrganization {
        // Deterministic id from the external registration id, which is
        // unique by construction.
        id: format!("org-{}", input.registration_id),
        wallet_address: input.wallet_address,
        registration_id: input.registration_id,
        name: input.name,
        email: input.email,
    };
    mirror::insert_organization(pool, &org).await?;
    mirror::organization_by_id(pool, &org.id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("organization {}", org.id)))
}

/// Move an organization through the verification state machine.
///
/// `pending → approved` and `pending → rejected` are the normal
/// transitions. Re-opening a decided organization back to `pending`
/// requires the explicit override flag; every other transition is
/// rejected. Approval/rejection triggers the notifier, whose failure is
/// logged and swallowed — the transition already happened.
pub async fn set_verification_status(
    pool: &SqlitePool,
    notifier: &dyn Notifier,
    organization_id: &str,
    new_status: VerificationStatus,
    remarks: &str,
    admin_override: bool,
) -> Result<OrganizationRecord> {
    let org = mirror::organization_by_id(pool, organization_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("organization {organization_id}")))?;
    let current: VerificationStatus = org.status.parse()?;

    let allowed = match (current, new_status) {
        (VerificationStatus::Pending, VerificationStatus::Approved)
        | (VerificationStatus::Pending, VerificationStatus::Rejected) => true,
        (_, VerificationStatus::Pending) => admin_override,
        _ => false,
    };
    if !allowed {
        return Err(EngineError::Validation(format!(
            "transition {} -> {} is not allowed",
            current.as_str(),
            new_status.as_str()
        )));
    }

    mirror::update_organization_status(pool, organization_id, new_status.as_str(), remarks).await?;

    let template = match new_status {
        VerificationStatus::Approved => Some(TEMPLATE_ORG_APPROVED),
        VerificationStatus::Rejected => Some(TEMPLATE_ORG_REJECTED),
        VerificationStatus::Pending => None,
    };
    if let Some(template) = template {
        let variables = json!({
            "organization": org.name,
            "status": new_status.as_str(),
            "remarks": remarks,
        });
        if let Err(e) = notifier.notify(&org.email, template, variables).await {
            warn!(organization_id, "verification notification failed: {e}");
        }
    }

    mirror::organization_by_id(pool, organization_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("organization {organization_id}")))
}

/// Store verification documents for an organization and persist the
/// destination key + URL on its mirror document.
pub async fn attach_documents(
    pool: &SqlitePool,
    blobs: &dyn BlobStore,
    organization_id: &str,
    bytes: Vec<u8>,
    mime_type: &str,
) -> Result<String> {
    if bytes.is_empty() {
        return Err(EngineError::Validation("empty document upload".to_string()));
    }
    let org = mirror::organization_by_id(pool, organization_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("organization {organization_id}")))?;

    let folder_key = org
        .folder_key
        .unwrap_or_else(|| format!("organizations/{}", org.id));
    let url = blobs.store(bytes, mime_type, &folder_key).await?;
    mirror::set_organization_documents(pool, organization_id, &folder_key, &url).await?;
    Ok(url)
}

// ─────────────────────────────────────────────────────────
// Dashboard aggregates
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DashboardStats {
    pub total_organizations: usize,
    pub pending_approvals: usize,
    pub active_organizations: usize,
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    /// Sum of every campaign's mirrored `funds_raised`, as a decimal
    /// string. Mirror figures, so eventually consistent by design.
    pub total_funds_raised: String,
}

pub async fn dashboard_stats(pool: &SqlitePool) -> Result<DashboardStats> {
    let orgs = mirror::all_organizations(pool).await?;
    let campaigns = mirror::all_campaigns(pool).await?;

    let mut total_native: u128 = 0;
    for c in &campaigns {
        total_native = total_native.saturating_add(units::to_native(&c.funds_raised)?);
    }

    Ok(DashboardStats {
        total_organizations: orgs.len(),
        pending_approvals: orgs.iter().filter(|o| o.status == "pending").count(),
        active_organizations: orgs.iter().filter(|o| o.status == "approved").count(),
        total_campaigns: campaigns.len(),
        active_campaigns: campaigns
            .iter()
            .filter(|c| c.status == "active" && !c.removed)
            .count(),
        total_funds_raised: units::to_decimal(total_native),
    })
}

pub async fn recent_registrations(pool: &SqlitePool) -> Result<Vec<OrganizationRecord>> {
    mirror::recent_registrations(pool, 5).await
}

pub async fn recent_donations(pool: &SqlitePool) -> Result<Vec<mirror::DonationRecord>> {
    mirror::recent_donations(pool, 5).await
}
