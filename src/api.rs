//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::amount::Amount;
use crate::chain::{is_address, EthRpc};
use crate::config::Config;
use crate::errors::LedgerError;
use crate::flow::{self, DonorIdentity};
use crate::store::{self, Donation, DonationFilter, NewCampaign};

/// Sign-in codes stay valid for ten minutes.
const CODE_TTL_SECS: i64 = 600;

pub struct ApiState {
    pub pool: SqlitePool,
    pub chain: EthRpc,
    pub config: Config,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Deserialize)]
pub struct CreateDonationRequest {
    pub campaign_id: i64,
    pub donor_wallet: String,
    pub amount: Amount,
    pub transaction_hash: String,
    pub auth_user_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Serialize)]
pub struct DonationResponse {
    pub donation: Option<Donation>,
    pub explorer_url: String,
    pub duplicate: bool,
    pub warnings: Vec<String>,
}

#[derive(Deserialize)]
pub struct DonationQuery {
    pub campaign_id: Option<i64>,
    pub donor_wallet: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize)]
pub struct DonationsResponse {
    pub count: usize,
    pub donations: Vec<Donation>,
}

#[derive(Deserialize)]
pub struct CreateCampaignRequest {
    pub title: String,
    pub goal_amount: Amount,
    pub receiving_wallet_address: Option<String>,
    pub platform_fee_address: Option<String>,
    pub platform_fee_amount: Option<Amount>,
    #[serde(default)]
    pub is_featured: bool,
}

#[derive(Deserialize)]
pub struct DonateRequest {
    pub donor_wallet: String,
    pub amount: Amount,
    pub auth_user_id: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize)]
pub struct SendCodeRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

fn error_response(e: LedgerError) -> Response {
    let status = match &e {
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::Amount(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidConfiguration(_) | LedgerError::VerificationFailed(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LedgerError::TransferRejected(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
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

/// `POST /donations`
///
/// Accepts a client-reported transaction hash, verifies it against the
/// campaign's receiving address and claimed amount, and reconciles the
/// ledger.  The hash is the idempotence key, so resubmitting is safe.
pub async fn create_donation(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateDonationRequest>,
) -> Response {
    if !is_address(&req.donor_wallet) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid donor wallet address {:?}", req.donor_wallet),
            }),
        )
            .into_response();
    }

    let identity = DonorIdentity {
        auth_user_id: req.auth_user_id,
        email: req.email,
    };

    match flow::confirm(
        &state.chain,
        &state.pool,
        &state.config,
        req.campaign_id,
        &req.donor_wallet,
        &req.amount,
        &req.transaction_hash,
        &identity,
    )
    .await
    {
        Ok(outcome) => {
            let donation = store::donation_by_hash(&state.pool, &outcome.transaction_hash)
                .await
                .unwrap_or(None);
            (
                StatusCode::CREATED,
                Json(DonationResponse {
                    donation,
                    explorer_url: outcome.explorer_url,
                    duplicate: outcome.reconciliation.duplicate,
                    warnings: outcome.reconciliation.warnings,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `POST /campaigns/:id/donate`
///
/// Server-side dispatch for deployments with a node-managed sender account:
/// submits the transfer(s) — platform fee first when configured — waits for
/// inclusion, verifies, and records.
pub async fn donate_to_campaign(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<i64>,
    Json(req): Json<DonateRequest>,
) -> Response {
    if !is_address(&req.donor_wallet) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("invalid donor wallet address {:?}", req.donor_wallet),
            }),
        )
            .into_response();
    }

    let identity = DonorIdentity {
        auth_user_id: req.auth_user_id,
        email: req.email,
    };

    match flow::donate(
        &state.chain,
        &state.pool,
        &state.config,
        campaign_id,
        &req.donor_wallet,
        &req.amount,
        &identity,
    )
    .await
    {
        Ok(outcome) => {
            let donation = store::donation_by_hash(&state.pool, &outcome.transaction_hash)
                .await
                .unwrap_or(None);
            (
                StatusCode::CREATED,
                Json(DonationResponse {
                    donation,
                    explorer_url: outcome.explorer_url,
                    duplicate: outcome.reconciliation.duplicate,
                    warnings: outcome.reconciliation.warnings,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `GET /donations?campaign_id=&donor_wallet=&status=&limit=`
pub async fn list_donations(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<DonationQuery>,
) -> Response {
    let filter = DonationFilter {
        campaign_id: query.campaign_id,
        donor_wallet: query.donor_wallet,
        status: query.status,
        limit: query.limit,
    };
    match store::list_donations(&state.pool, &filter).await {
        Ok(donations) => Json(DonationsResponse {
            count: donations.len(),
            donations,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /campaigns/:id/donations`
pub async fn campaign_donations(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<i64>,
) -> Response {
    match store::donations_for_campaign(&state.pool, campaign_id).await {
        Ok(donations) => Json(DonationsResponse {
            count: donations.len(),
            donations,
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

/// `GET /campaigns/:id`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(campaign_id): Path<i64>,
) -> Response {
    match store::campaign_by_id(&state.pool, campaign_id).await {
        Ok(Some(campaign)) => Json(campaign).into_response(),
        Ok(None) => error_response(LedgerError::NotFound(format!("campaign {campaign_id}"))),
        Err(e) => error_response(e),
    }
}

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<CreateCampaignRequest>,
) -> Response {
    if let Some(address) = req.receiving_wallet_address.as_deref() {
        if !is_address(address) {
            return error_response(LedgerError::InvalidConfiguration(format!(
                "invalid receiving wallet address {address:?}"
            )));
        }
    }

    let new = NewCampaign {
        title: &req.title,
        goal_amount: &req.goal_amount,
        receiving_wallet_address: req.receiving_wallet_address.as_deref(),
        platform_fee_address: req.platform_fee_address.as_deref(),
        platform_fee_amount: req.platform_fee_amount.as_ref(),
        is_featured: req.is_featured,
    };
    match store::insert_campaign(&state.pool, &new).await {
        Ok(campaign) => (StatusCode::CREATED, Json(campaign)).into_response(),
        Err(e) => error_response(e),
    }
}

/// `POST /auth/send-code`
///
/// Stores an expiring sign-in code; delivery belongs to the external mailer.
pub async fn send_code(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<SendCodeRequest>,
) -> Response {
    match store::issue_verification_code(&state.pool, &req.email, CODE_TTL_SECS).await {
        Ok(_) => {
            debug!("verification code issued for {}", req.email);
            Json(serde_json::json!({ "message": "verification code sent" })).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// `POST /auth/verify-code`
pub async fn verify_code(
    State(state): State<Arc<ApiState>>,
    Json(req): Json<VerifyCodeRequest>,
) -> Response {
    match store::consume_verification_code(&state.pool, &req.email, &req.code).await {
        Ok(valid) => Json(serde_json::json!({ "valid": valid })).into_response(),
        Err(e) => error_response(e),
    }
}
