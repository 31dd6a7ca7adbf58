// src/api.rs
use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, error};

use crate::context::{RelayContext, Target};
use crate::error::RelayError;
use crate::types::{SenderInfo, UserOperation};

type Params = Query<HashMap<String, String>>;

/// Maps [`RelayError`] onto an HTTP status and a JSON error body.
pub struct ApiError(RelayError);

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_fault() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        match (status.is_server_error(), self.0.op_hash()) {
            (true, Some(op_hash)) => error!("Request for userop {:?} failed: {}", op_hash, self.0),
            (true, None) => error!("Request failed: {}", self.0),
            (false, Some(op_hash)) => debug!("Rejected userop {:?}: {}", op_hash, self.0),
            (false, None) => debug!("Rejected request: {}", self.0),
        }
        let code = match &self.0 {
            RelayError::InvalidInput { .. } => "INVALID_INPUT",
            RelayError::Resolution { .. } => "RESOLUTION_ERROR",
            RelayError::Encoding(_) => "ENCODING_ERROR",
            RelayError::Sponsorship { .. } => "SPONSORSHIP_ERROR",
            RelayError::Simulation { .. } => "SIMULATION_ERROR",
            RelayError::SignatureLength(_) | RelayError::Signature(_) => "SIGNATURE_ERROR",
            RelayError::SenderMismatch { .. } => "SENDER_MISMATCH",
            RelayError::NotSealed { .. } => "NOT_SEALED",
            RelayError::Submission { .. } => "SUBMISSION_ERROR",
            RelayError::Provider(_) => "PROVIDER_ERROR",
            RelayError::NotConfigured(_) => "NOT_CONFIGURED",
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.0.to_string(),
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(ctx: Arc<RelayContext>) -> Router {
    let erc4337 = Router::new()
        .route("/sender-info", get(sender_info))
        .route("/sender-address", get(sender_address))
        .route("/userop/approve", get(user_op_approve))
        .route("/userop/mint", get(user_op_mint))
        .route("/userop/withdrawto", get(user_op_withdraw_to))
        .route("/userop/transfer", get(user_op_transfer))
        .route("/userop/send", post(user_op_send));

    Router::new()
        .route("/health", get(health))
        .nest("/erc4337", erc4337)
        .layer(CorsLayer::permissive())
        .with_state(ctx)
}

// ---------------------------------------------------------------------------
// Parameter parsing
// ---------------------------------------------------------------------------

/// Hex address with or without `0x`, exactly 20 bytes, not the zero address.
pub fn parse_address(name: &'static str, raw: &str) -> Result<Address, RelayError> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    if digits.len() != 40 {
        return Err(RelayError::invalid(name, "expected 20 hex encoded bytes"));
    }
    let bytes = hex::decode(digits).map_err(|e| RelayError::invalid(name, e.to_string()))?;
    let address = Address::from_slice(&bytes);
    if address.is_zero() {
        return Err(RelayError::invalid(name, "zero address"));
    }
    Ok(address)
}

fn required_address(params: &HashMap<String, String>, name: &'static str) -> Result<Address, RelayError> {
    let raw = params
        .get(name)
        .ok_or_else(|| RelayError::invalid(name, "missing"))?;
    parse_address(name, raw)
}

fn salt(params: &HashMap<String, String>) -> Result<U256, RelayError> {
    match params.get("salt").map(String::as_str) {
        None | Some("") => Ok(U256::zero()),
        Some(raw) => raw
            .parse::<u64>()
            .map(U256::from)
            .map_err(|e| RelayError::invalid("salt", e.to_string())),
    }
}

fn amount(params: &HashMap<String, String>) -> Result<U256, RelayError> {
    let raw = params
        .get("amount")
        .ok_or_else(|| RelayError::invalid("amount", "missing"))?;
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RelayError::invalid("amount", "expected a base 10 integer"));
    }
    U256::from_dec_str(raw).map_err(|e| RelayError::invalid("amount", e.to_string()))
}

fn target(params: &HashMap<String, String>) -> Result<Target, RelayError> {
    Ok(Target {
        owner: required_address(params, "owner")?,
        salt: salt(params)?,
        contract: required_address(params, "target")?,
    })
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct SenderAddressResponse {
    pub sender: Address,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub op_hash: H256,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub op: UserOperation,
    pub op_hash: H256,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub entry_point: Option<String>,
    pub op: UserOperation,
    #[serde(default)]
    pub salt: Option<u64>,
}

async fn health() -> &'static str {
    "ok"
}

async fn sender_info(State(ctx): State<Arc<RelayContext>>, Query(params): Params) -> ApiResult<SenderInfo> {
    let owner = required_address(&params, "owner")?;
    let salt = salt(&params)?;
    Ok(Json(ctx.sender_info(owner, salt).await?))
}

async fn sender_address(
    State(ctx): State<Arc<RelayContext>>,
    Query(params): Params,
) -> ApiResult<SenderAddressResponse> {
    let owner = required_address(&params, "owner")?;
    let salt = salt(&params)?;
    let sender = ctx.sender_address(owner, salt).await?;
    debug!("Owner {:?} has sender {:?}", owner, sender);
    Ok(Json(SenderAddressResponse { sender }))
}

async fn user_op_approve(
    State(ctx): State<Arc<RelayContext>>,
    Query(params): Params,
) -> ApiResult<UserOperation> {
    let target = target(&params)?;
    let spender = required_address(&params, "spender")?;
    let amount = amount(&params)?;

    let op = ctx.approve_op(target, spender, amount).await?;
    Ok(Json(op.into_user_op()))
}

async fn user_op_mint(
    State(ctx): State<Arc<RelayContext>>,
    Query(params): Params,
) -> ApiResult<UserOperation> {
    let target = target(&params)?;
    let to = required_address(&params, "to")?;
    let amount = amount(&params)?;

    let op = ctx.mint_op(target, to, amount).await?;
    Ok(Json(op.into_user_op()))
}

async fn user_op_withdraw_to(
    State(ctx): State<Arc<RelayContext>>,
    Query(params): Params,
) -> ApiResult<UserOperation> {
    let target = target(&params)?;
    let to = required_address(&params, "to")?;
    let amount = amount(&params)?;

    let op = ctx.withdraw_to_op(target, to, amount).await?;
    Ok(Json(op.into_user_op()))
}

async fn user_op_transfer(
    State(ctx): State<Arc<RelayContext>>,
    Query(params): Params,
) -> ApiResult<TransferResponse> {
    let target = target(&params)?;
    let to = required_address(&params, "to")?;
    let amount = amount(&params)?;

    let submitted = ctx.transfer(target, to, amount).await?;
    Ok(Json(TransferResponse {
        op: submitted.op,
        op_hash: submitted.op_hash,
    }))
}

async fn user_op_send(
    State(ctx): State<Arc<RelayContext>>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<SubmitResponse> {
    let Json(request) = payload.map_err(|e| RelayError::invalid("body", e.body_text()))?;

    if let Some(raw) = request.entry_point.as_deref() {
        let entry_point = parse_address("entryPoint", raw)?;
        if entry_point != ctx.entry_point() {
            return Err(RelayError::invalid("entryPoint", format!("unsupported entry point {entry_point:?}")).into());
        }
    }

    let salt = U256::from(request.salt.unwrap_or_default());
    let op_hash = ctx.send_signed(request.op, salt).await?;
    Ok(Json(SubmitResponse { op_hash }))
}
