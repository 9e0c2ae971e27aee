use utoipa::OpenApi;

/// OpenAPI document for the payment and entitlement surface. Exported by
/// tooling; the interactive UI is not mounted by this service.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Lingopay API",
        description = "Level purchase, payment reconciliation and entitlement endpoints",
        version = env!("CARGO_PKG_VERSION")
    ),
    paths(
        crate::handlers::payments::checkout,
        crate::handlers::payments::callback_post,
        crate::handlers::payments::callback_get,
        crate::handlers::payments::refund,
        crate::handlers::payments::owned_levels,
        crate::handlers::health::health,
    ),
    components(schemas(
        crate::handlers::payments::CheckoutRequest,
        crate::handlers::payments::CheckoutResponse,
        crate::handlers::payments::RefundRequest,
        crate::handlers::payments::RefundResponse,
        crate::handlers::payments::CallbackAck,
        crate::handlers::payments::CallbackBody,
        crate::handlers::payments::CallbackTransaction,
        crate::handlers::payments::CallbackOrder,
        crate::handlers::payments::CallbackShippingData,
        crate::handlers::payments::OwnedLevelsResponse,
        crate::handlers::health::HealthResponse,
        crate::errors::ErrorResponse,
        crate::catalog::Level,
    )),
    tags(
        (name = "Payments", description = "Purchase, callback and refund flow"),
        (name = "Entitlements", description = "Owned-level queries"),
        (name = "Health", description = "Service health")
    )
)]
pub struct ApiDoc;
