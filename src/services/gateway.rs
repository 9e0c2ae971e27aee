//! Client for the external payment provider.
//!
//! All network traffic to the provider goes through [`PaymentGateway`].
//! The client never retries: payment-intention creation is not idempotent
//! on the provider side, and a timeout is ambiguous rather than negative,
//! so retry policy stays with the caller.

use async_trait::async_trait;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, instrument, warn};
use validator::Validate;

use crate::config::PaymentConfig;
use crate::errors::ServiceError;

/// One line item of a payment intention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    /// Minor currency units
    pub amount: i64,
    pub description: String,
    pub quantity: u32,
}

/// Billing block forwarded to the provider's hosted checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingData {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// Request to open a payment intention with the provider.
#[derive(Debug, Clone, Serialize, Validate)]
pub struct IntentionRequest {
    /// Minor currency units; must be positive
    #[validate(range(min = 1))]
    pub amount: i64,
    pub currency: String,
    pub payment_methods: Vec<i64>,
    #[validate(length(min = 1, message = "at least one line item is required"))]
    pub items: Vec<LineItem>,
    pub billing_data: BillingData,
}

/// Provider-side session opened for a purchase attempt.
#[derive(Debug, Clone)]
pub struct IntentionResponse {
    /// Provider order reference; stored on the ledger row and matched
    /// against the asynchronous callback.
    pub order_ref: String,
    /// Secret embedded in the hosted checkout URL.
    pub client_secret: String,
}

/// Result of a refund request as reported by the provider.
#[derive(Debug, Clone)]
pub struct RefundOutcome {
    pub success: bool,
    pub raw: Value,
}

/// Seam to the external payment provider.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Opens a payment intention for the given amount and line items.
    async fn create_intention(
        &self,
        request: &IntentionRequest,
    ) -> Result<IntentionResponse, ServiceError>;

    /// Requests a refund of a settled transaction. Purely a remote call;
    /// the caller interprets the outcome.
    async fn request_refund(
        &self,
        amount_cents: i64,
        transaction_id: &str,
    ) -> Result<RefundOutcome, ServiceError>;
}

/// HTTP implementation of [`PaymentGateway`].
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    config: PaymentConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: PaymentConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ServiceError::GatewayUnavailable(e.to_string()))?;

        Ok(Self { http, config })
    }

    fn map_transport_error(e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            counter!("lingopay_gateway_timeouts_total", 1);
            ServiceError::GatewayTimeout
        } else {
            ServiceError::GatewayUnavailable(e.to_string())
        }
    }

    async fn reject_from_response(response: reqwest::Response) -> ServiceError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        error!(%status, body = %body, "Gateway rejected request");
        ServiceError::GatewayRejected(format!("{}: {}", status, body))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(amount = request.amount, currency = %request.currency))]
    async fn create_intention(
        &self,
        request: &IntentionRequest,
    ) -> Result<IntentionResponse, ServiceError> {
        request.validate()?;

        counter!("lingopay_gateway_intentions_total", 1);

        let url = format!("{}/v1/intention/", self.config.base_url);
        let response = self
            .http
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.secret_key),
            )
            .json(request)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::reject_from_response(response).await);
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayRejected(format!("unparseable response: {}", e)))?;

        let client_secret = body
            .get("client_secret")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::GatewayRejected("intention response missing client_secret".into())
            })?;

        // The provider has returned the id both as a string and as a number
        // across API revisions.
        let order_ref = match body.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(ServiceError::GatewayRejected(
                    "intention response missing id".into(),
                ))
            }
        };

        Ok(IntentionResponse {
            order_ref,
            client_secret,
        })
    }

    #[instrument(skip(self), fields(transaction_id = %transaction_id, amount = amount_cents))]
    async fn request_refund(
        &self,
        amount_cents: i64,
        transaction_id: &str,
    ) -> Result<RefundOutcome, ServiceError> {
        if amount_cents <= 0 {
            return Err(ServiceError::ValidationError(
                "refund amount must be positive".into(),
            ));
        }

        counter!("lingopay_gateway_refunds_total", 1);

        let url = format!(
            "{}/api/acceptance/void_refund/refund",
            self.config.base_url
        );
        let response = self
            .http
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", self.config.secret_key),
            )
            .json(&serde_json::json!({
                "amount_cents": amount_cents,
                "transaction_id": transaction_id,
            }))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::reject_from_response(response).await);
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::GatewayRejected(format!("unparseable response: {}", e)))?;

        let success = raw.get("success").and_then(Value::as_bool).unwrap_or_else(|| {
            warn!("Refund response missing success flag; treating as failure");
            false
        });

        Ok(RefundOutcome { success, raw })
    }
}
