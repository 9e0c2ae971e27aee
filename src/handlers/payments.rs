use axum::{
    extract::{Json, Query, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::catalog::Level;
use crate::errors::ServiceError;
use crate::services::callback::TransactionNotification;
use crate::services::gateway::BillingData;
use crate::ApiResponse;
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({ "level": "LEVEL_A1" }))]
pub struct CheckoutRequest {
    /// Level to purchase
    #[validate(length(min = 1, message = "level is required"))]
    #[schema(example = "LEVEL_A1")]
    pub level: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CheckoutResponse {
    /// Hosted checkout URL the client completes payment on
    pub checkout_url: String,
}

#[derive(Debug, Serialize, Deserialize, Validate, ToSchema)]
#[schema(example = json!({ "transaction_id": "9001" }))]
pub struct RefundRequest {
    /// Gateway transaction id of the completed payment
    #[validate(length(min = 1, message = "transaction_id is required"))]
    pub transaction_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RefundResponse {
    /// Whether the gateway accepted the refund
    pub success: bool,
}

/// Acknowledgment returned to the gateway for every verified-or-not
/// callback; carries no validation detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CallbackAck {
    pub accepted: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OwnedLevelsResponse {
    pub levels: Vec<Level>,
}

/// POST body shape the gateway delivers: the transaction object is nested
/// under `obj` with the originating order and buyer inside it.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackBody {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub obj: CallbackTransaction,
    pub hmac: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackTransaction {
    pub id: i64,
    pub success: bool,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: String,
    pub order: CallbackOrder,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackOrder {
    pub id: i64,
    pub shipping_data: CallbackShippingData,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackShippingData {
    pub email: String,
}

impl From<CallbackBody> for TransactionNotification {
    fn from(body: CallbackBody) -> Self {
        TransactionNotification {
            transaction_id: body.obj.id,
            success: body.obj.success,
            amount_cents: body.obj.amount_cents,
            currency: body.obj.currency,
            created_at: body.obj.created_at,
            order_ref: body.obj.order.id.to_string(),
            buyer_email: body.obj.order.shipping_data.email,
            hmac: body.hmac,
        }
    }
}

/// GET query shape of the same notification (the gateway falls back to a
/// redirect-style delivery on some integrations).
#[derive(Debug, Deserialize, ToSchema)]
pub struct CallbackQuery {
    pub id: i64,
    pub success: bool,
    pub amount_cents: i64,
    pub currency: String,
    pub created_at: String,
    pub order: i64,
    pub email: String,
    pub hmac: Option<String>,
}

impl From<CallbackQuery> for TransactionNotification {
    fn from(query: CallbackQuery) -> Self {
        TransactionNotification {
            transaction_id: query.id,
            success: query.success,
            amount_cents: query.amount_cents,
            currency: query.currency,
            created_at: query.created_at,
            order_ref: query.order.to_string(),
            buyer_email: query.email,
            hmac: query.hmac,
        }
    }
}

/// Start a level purchase
#[utoipa::path(
    post,
    path = "/api/v1/payments/checkout",
    request_body = CheckoutRequest,
    responses(
        (status = 201, description = "Payment intention created", body = crate::ApiResponse<CheckoutResponse>),
        (status = 400, description = "Unknown level", body = crate::errors::ErrorResponse),
        (status = 409, description = "Level already owned", body = crate::errors::ErrorResponse),
        (status = 502, description = "Gateway rejected or unreachable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    request.validate()?;
    let level = Level::parse(&request.level)?;

    info!(user_id = %user.id, %level, "Processing checkout");

    let billing = BillingData {
        first_name: user.first_name.clone(),
        last_name: user.last_name.clone(),
        email: user.email.clone(),
        phone_number: None,
    };

    let checkout_url = state
        .services
        .orders
        .process_order(user.id, billing, level)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(CheckoutResponse { checkout_url })),
    ))
}

async fn acknowledge(
    state: &AppState,
    notification: TransactionNotification,
) -> Result<Json<CallbackAck>, ServiceError> {
    match state.services.orders.handle_callback(notification).await {
        Ok(_) => Ok(Json(CallbackAck { accepted: true })),
        // Verification and matching failures are logged inside the service;
        // the sender gets a flat acknowledgment so an unprocessable
        // callback is not redelivered forever and the HMAC cannot be
        // probed through response detail.
        Err(ServiceError::InvalidSignature)
        | Err(ServiceError::UnknownUser(_))
        | Err(ServiceError::NoMatchingOrder(_)) => Ok(Json(CallbackAck { accepted: false })),
        // Transient failures (storage outage) surface as 5xx so the
        // gateway retries later.
        Err(other) => Err(other),
    }
}

/// Gateway transaction callback (POST body variant)
#[utoipa::path(
    post,
    path = "/api/v1/payments/callback",
    request_body = CallbackBody,
    responses(
        (status = 200, description = "Callback acknowledged", body = CallbackAck)
    ),
    tag = "Payments"
)]
pub async fn callback_post(
    State(state): State<AppState>,
    Json(body): Json<CallbackBody>,
) -> Result<Json<CallbackAck>, ServiceError> {
    acknowledge(&state, body.into()).await
}

/// Gateway transaction callback (GET query variant)
#[utoipa::path(
    get,
    path = "/api/v1/payments/callback",
    params(
        ("id" = i64, Query, description = "Gateway transaction id"),
        ("success" = bool, Query, description = "Transaction outcome"),
        ("amount_cents" = i64, Query, description = "Amount in minor units"),
        ("order" = i64, Query, description = "Gateway order reference")
    ),
    responses(
        (status = 200, description = "Callback acknowledged", body = CallbackAck)
    ),
    tag = "Payments"
)]
pub async fn callback_get(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<CallbackAck>, ServiceError> {
    acknowledge(&state, query.into()).await
}

/// Refund a completed payment
#[utoipa::path(
    post,
    path = "/api/v1/payments/refund",
    request_body = RefundRequest,
    responses(
        (status = 200, description = "Refund outcome", body = crate::ApiResponse<RefundResponse>),
        (status = 400, description = "Refund window expired", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Order not refundable", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Payments"
)]
pub async fn refund(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(request): Json<RefundRequest>,
) -> Result<Json<ApiResponse<RefundResponse>>, ServiceError> {
    request.validate()?;

    info!(user_id = %user.id, transaction_id = %request.transaction_id, "Refund requested");

    let outcome = state
        .services
        .orders
        .refund_order(&request.transaction_id)
        .await?;

    if !outcome.success {
        warn!(transaction_id = %request.transaction_id, "Refund declined by gateway");
    }

    Ok(Json(ApiResponse::success(RefundResponse {
        success: outcome.success,
    })))
}

/// Levels owned by the authenticated user
#[utoipa::path(
    get,
    path = "/api/v1/payments/levels",
    responses(
        (status = 200, description = "Owned levels", body = crate::ApiResponse<OwnedLevelsResponse>)
    ),
    security(("bearer_auth" = [])),
    tag = "Entitlements"
)]
pub async fn owned_levels(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<ApiResponse<OwnedLevelsResponse>>, ServiceError> {
    let levels = state.services.entitlements.owned_levels(user.id).await?;
    Ok(Json(ApiResponse::success(OwnedLevelsResponse { levels })))
}

/// Payment routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", post(checkout))
        .route("/callback", post(callback_post).get(callback_get))
        .route("/refund", post(refund))
        .route("/levels", get(owned_levels))
}
