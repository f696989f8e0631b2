//! Donation ledger service — entry point.
//!
//! Bridges client-reported Ethereum donation transfers to an authoritative
//! off-chain ledger: transaction hashes are verified against the chain
//! (recipient, amount within tolerance, successful receipt) before campaign
//! totals and donor statistics are reconciled in SQLite.  A small Axum REST
//! API exposes the confirmation path and donation listings.

mod amount;
mod api;
mod chain;
mod config;
mod dispatch;
mod errors;
mod flow;
mod ledger;
mod store;
mod verify;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chain::EthRpc;
use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    // Load config from environment.
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = store::init_pool(&config.database_url).await?;

    // HTTP client backing the chain RPC.
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;

    let chain = EthRpc::new(
        client,
        config.rpc_url.clone(),
        config.sender_address.clone(),
        Duration::from_millis(config.inclusion_poll_ms),
        Duration::from_secs(config.inclusion_timeout_secs),
    );

    info!(
        "Chain RPC: {} (chain id {}, explorer {})",
        config.rpc_url, config.chain_id, config.explorer_base_url
    );

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState {
        pool,
        chain,
        config: config.clone(),
    });

    let app = Router::new()
        .route("/health", get(api::health))
        .route(
            "/donations",
            post(api::create_donation).get(api::list_donations),
        )
        .route("/campaigns", post(api::create_campaign))
        .route("/campaigns/:id", get(api::get_campaign))
        .route("/campaigns/:id/donate", post(api::donate_to_campaign))
        .route("/campaigns/:id/donations", get(api::campaign_donations))
        .route("/auth/send-code", post(api::send_code))
        .route("/auth/verify-code", post(api::verify_code))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
