//! Axum REST API handlers.
//!
//! Every handler is a thin adapter over exactly one coordinator
//! operation; no consistency logic lives here. Coordinator errors map to
//! HTTP statuses in one place, and any error raised after a successful
//! ledger write is reported as "confirmed on ledger" rather than as a
//! failure.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::error;

use crate::admin::{self, RegisterOrganizationInput, VerificationStatus};
use crate::campaigns::{self, CreateCampaignInput};
use crate::donations;
use crate::errors::EngineError;
use crate::external::{BlobStore, Notifier};
use crate::ledger::LedgerClient;
use crate::mirror;
use crate::withdrawals;

pub struct ApiState {
    pub pool: SqlitePool,
    pub ledger: Arc<dyn LedgerClient>,
    pub notifier: Arc<dyn Notifier>,
    pub blobs: Option<Arc<dyn BlobStore>>,
}

type AppState = State<Arc<ApiState>>;

// ─────────────────────────────────────────────────────────
// Error mapping
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    /// True when the underlying ledger transaction succeeded and only
    /// the mirror/confirmation step failed — the action must not be
    /// retried as if nothing happened.
    ledger_confirmed: bool,
    retriable: bool,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = match &self {
            EngineError::Validation(_) | EngineError::Config(_) => StatusCode::BAD_REQUEST,
            EngineError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::CampaignNotDonatable(_) | EngineError::RefundNotAllowed(_) => {
                StatusCode::CONFLICT
            }
            EngineError::WouldRevert(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::LedgerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::PendingConfirmation(_)
            | EngineError::Reconciliation(_)
            | EngineError::MirrorUnavailable(_)
            | EngineError::Database(_)
            | EngineError::Migrate(_)
            | EngineError::Http(_)
            | EngineError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let ledger_confirmed = self.ledger_write_succeeded();
        let message = if ledger_confirmed {
            format!(
                "transaction succeeded on the ledger; its effects may take a moment to appear ({self})"
            )
        } else {
            self.to_string()
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("request failed: {self}");
        }

        (
            status,
            Json(ErrorResponse {
                error: message,
                ledger_confirmed,
                retriable: self.is_retriable(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, EngineError>;

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ListResponse<T> {
    pub count: usize,
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        ListResponse {
            count: items.len(),
            items,
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Deserialize)]
pub struct OrganizationFilter {
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusUpdateRequest {
    pub status: VerificationStatus,
    #[serde(default)]
    pub remarks: String,
    /// Required to re-open a decided organization back to pending.
    #[serde(default)]
    pub admin_override: bool,
}

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub owner_address: String,
    #[serde(flatten)]
    pub input: CreateCampaignInput,
}

#[derive(Deserialize)]
pub struct DonateRequest {
    pub donor_address: String,
    /// Decimal display units.
    pub amount: String,
}

#[derive(Deserialize)]
pub struct OwnerRequest {
    pub owner_address: String,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub url: String,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /organizations`
pub async fn register_organization(
    State(state): AppState,
    Json(input): Json<RegisterOrganizationInput>,
) -> ApiResult<impl IntoResponse> {
    let org = admin::register_organization(&state.pool, input).await?;
    Ok((StatusCode::CREATED, Json(org)))
}

/// `GET /organizations?status=pending`
pub async fn list_organizations(
    State(state): AppState,
    Query(filter): Query<OrganizationFilter>,
) -> ApiResult<impl IntoResponse> {
    let orgs = match filter.status.as_deref() {
        Some(status) => {
            let status: VerificationStatus = status.parse()?;
            mirror::organizations_by_status(&state.pool, status.as_str()).await?
        }
        None => mirror::all_organizations(&state.pool).await?,
    };
    Ok(Json(ListResponse::from(orgs)))
}

/// `GET /organizations/wallet/:wallet`
pub async fn organization_by_wallet(
    State(state): AppState,
    Path(wallet): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let org = mirror::organization_by_wallet(&state.pool, &wallet)
        .await?
        .ok_or_else(|| EngineError::NotFound(format!("organization for wallet {wallet}")))?;
    Ok(Json(org))
}

/// `PUT /organizations/:id/status`
pub async fn update_organization_status(
    State(state): AppState,
    Path(id): Path<String>,
    Json(req): Json<StatusUpdateRequest>,
) -> ApiResult<impl IntoResponse> {
    let org = admin::set_verification_status(
        &state.pool,
        state.notifier.as_ref(),
        &id,
        req.status,
        &req.remarks,
        req.admin_override,
    )
    .await?;
    Ok(Json(org))
}

/// `POST /organizations/:id/documents` — raw bytes, content-type header.
pub async fn upload_organization_documents(
    State(state): AppState,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let blobs = state
        .blobs
        .as_ref()
        .ok_or_else(|| EngineError::Config("no blob store configured".to_string()))?;
    let mime = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream");
    let url = admin::attach_documents(&state.pool, blobs.as_ref(), &id, body.to_vec(), mime).await?;
    Ok((StatusCode::CREATED, Json(DocumentResponse { url })))
}

/// `GET /admin/stats`
pub async fn dashboard_stats(State(state): AppState) -> ApiResult<impl IntoResponse> {
    Ok(Json(admin::dashboard_stats(&state.pool).await?))
}

/// `GET /admin/recent-registrations`
pub async fn recent_registrations(State(state): AppState) -> ApiResult<impl IntoResponse> {
    Ok(Json(ListResponse::from(
        admin::recent_registrations(&state.pool).await?,
    )))
}

/// `GET /admin/recent-donations`
pub async fn recent_donations(State(state): AppState) -> ApiResult<impl IntoResponse> {
    Ok(Json(ListResponse::from(
        admin::recent_donations(&state.pool).await?,
    )))
}

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): AppState,
    Json(req): Json<CreateCampaignRequest>,
) -> ApiResult<impl IntoResponse> {
    let view = campaigns::create_campaign(
        &state.pool,
        state.ledger.as_ref(),
        req.input,
        &req.owner_address,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// `GET /campaigns` — the ledger-backed active set, mirror bypassed.
pub async fn list_active_campaigns(State(state): AppState) -> ApiResult<impl IntoResponse> {
    let views = campaigns::list_active_campaigns(&state.pool, state.ledger.as_ref()).await?;
    Ok(Json(ListResponse::from(views)))
}

/// `GET /campaigns/:id`
pub async fn get_campaign(
    State(state): AppState,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    let view = campaigns::get_campaign(&state.pool, state.ledger.as_ref(), id).await?;
    Ok(Json(view))
}

/// `GET /campaigns/organization/:org_id`
pub async fn campaigns_by_organization(
    State(state): AppState,
    Path(org_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let records = campaigns::campaigns_by_organization(&state.pool, &org_id).await?;
    Ok(Json(ListResponse::from(records)))
}

/// `GET /campaigns/:id/donations` — ledger event history.
pub async fn campaign_donations(
    State(state): AppState,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    let history = donations::ledger_donation_history(state.ledger.as_ref(), id).await?;
    Ok(Json(ListResponse::from(history)))
}

/// `POST /campaigns/:id/donate`
pub async fn donate(
    State(state): AppState,
    Path(id): Path<u64>,
    Json(req): Json<DonateRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome = donations::donate(
        &state.pool,
        state.ledger.as_ref(),
        id,
        &req.amount,
        &req.donor_address,
    )
    .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// `POST /campaigns/:id/withdraw`
pub async fn withdraw(
    State(state): AppState,
    Path(id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome =
        withdrawals::withdraw(&state.pool, state.ledger.as_ref(), id, &req.owner_address).await?;
    Ok(Json(outcome))
}

/// `POST /campaigns/:id/refund`
pub async fn refund_donors(
    State(state): AppState,
    Path(id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<impl IntoResponse> {
    let outcome =
        withdrawals::refund_donors(&state.pool, state.ledger.as_ref(), id, &req.owner_address)
            .await?;
    Ok(Json(outcome))
}

/// `POST /campaigns/:id/pause`
pub async fn pause_campaign(
    State(state): AppState,
    Path(id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<impl IntoResponse> {
    withdrawals::pause(state.ledger.as_ref(), id, &req.owner_address).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /campaigns/:id/resume`
pub async fn resume_campaign(
    State(state): AppState,
    Path(id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<impl IntoResponse> {
    withdrawals::resume(state.ledger.as_ref(), id, &req.owner_address).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /campaigns/:id/remove`
pub async fn remove_campaign(
    State(state): AppState,
    Path(id): Path<u64>,
    Json(req): Json<OwnerRequest>,
) -> ApiResult<impl IntoResponse> {
    withdrawals::remove(&state.pool, state.ledger.as_ref(), id, &req.owner_address).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /donations/donor/:address`
pub async fn donations_by_donor(
    State(state): AppState,
    Path(address): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let records = donations::donations_by_donor(&state.pool, &address).await?;
    Ok(Json(ListResponse::from(records)))
}

/// `GET /donations/organization/:org_id`
pub async fn donations_by_organization(
    State(state): AppState,
    Path(org_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let records = donations::donations_by_organization(&state.pool, &org_id).await?;
    Ok(Json(ListResponse::from(records)))
}

/// `GET /withdrawals/organization/:org_id`
pub async fn withdrawals_by_organization(
    State(state): AppState,
    Path(org_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let records = withdrawals::withdrawals_by_organization(&state.pool, &org_id).await?;
    Ok(Json(ListResponse::from(records)))
}
