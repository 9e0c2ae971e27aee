pub mod health;
pub mod payments;

use std::sync::Arc;

use crate::services::{entitlements::EntitlementService, orders::OrderService};

/// Service container shared by the handlers through [`crate::AppState`].
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub entitlements: Arc<EntitlementService>,
}
