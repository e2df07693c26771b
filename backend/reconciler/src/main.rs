//! DeCrowd reconciliation engine — entry point.
//!
//! Wires the JSON-RPC ledger client, the SQLite mirror, and the external
//! collaborators into an Axum REST API. Every route is a thin adapter
//! over one coordinator operation; the ledger-first write discipline
//! lives in the coordinator modules.

mod admin;
mod api;
mod campaigns;
mod config;
mod donations;
mod errors;
mod external;
mod ledger;
mod mirror;
mod rpc;
mod status;
mod units;
mod withdrawals;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use external::{BlobStore, HttpBlobStore, NoopNotifier, Notifier, WebhookNotifier};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite mirror pool and run migrations.
    let pool = mirror::init_pool(&config.database_url).await?;

    // One HTTP client shared by the ledger RPC and the collaborators;
    // its timeout is what turns a hung ledger call into LedgerUnavailable.
    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(config.rpc_timeout_secs))
        .build()?;

    let ledger = Arc::new(rpc::RpcLedgerClient::new(
        client.clone(),
        config.rpc_url.clone(),
        config.contract_address.clone(),
    ));

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(client.clone(), url.clone())),
        None => Arc::new(NoopNotifier),
    };
    let blobs: Option<Arc<dyn BlobStore>> = config
        .blob_store_url
        .as_ref()
        .map(|url| Arc::new(HttpBlobStore::new(client.clone(), url.clone())) as Arc<dyn BlobStore>);

    let state = Arc::new(api::ApiState {
        pool,
        ledger,
        notifier,
        blobs,
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route(
            "/organizations",
            post(api::register_organization).get(api::list_organizations),
        )
        .route("/organizations/wallet/:wallet", get(api::organization_by_wallet))
        .route("/organizations/:id/status", put(api::update_organization_status))
        .route(
            "/organizations/:id/documents",
            post(api::upload_organization_documents),
        )
        .route("/admin/stats", get(api::dashboard_stats))
        .route("/admin/recent-registrations", get(api::recent_registrations))
        .route("/admin/recent-donations", get(api::recent_donations))
        .route(
            "/campaigns",
            post(api::create_campaign).get(api::list_active_campaigns),
        )
        .route("/campaigns/:id", get(api::get_campaign))
        .route("/campaigns/organization/:org_id", get(api::campaigns_by_organization))
        .route("/campaigns/:id/donations", get(api::campaign_donations))
        .route("/campaigns/:id/donate", post(api::donate))
        .route("/campaigns/:id/withdraw", post(api::withdraw))
        .route("/campaigns/:id/refund", post(api::refund_donors))
        .route("/campaigns/:id/pause", post(api::pause_campaign))
        .route("/campaigns/:id/resume", post(api::resume_campaign))
        .route("/campaigns/:id/remove", post(api::remove_campaign))
        .route("/donations/donor/:address", get(api::donations_by_donor))
        .route(
            "/donations/organization/:org_id",
            get(api::donations_by_organization),
        )
        .route(
            "/withdrawals/organization/:org_id",
            get(api::withdrawals_by_organization),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
