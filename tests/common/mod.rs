//! Shared harness for integration tests: in-memory SQLite state, a
//! scripted gateway double, and signed callback builders.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectOptions, Database, EntityTrait, PaginatorTrait,
    QueryFilter, Set,
};
use sea_orm_migration::MigratorTrait;
use sha2::Sha256;
use uuid::Uuid;

use lingopay_api::{
    catalog::Level,
    config::PaymentConfig,
    db::DbPool,
    entities::{entitlement, order, user},
    errors::ServiceError,
    migrator::Migrator,
    services::callback::{CallbackVerifier, TransactionNotification},
    services::entitlements::EntitlementService,
    services::gateway::{
        BillingData, IntentionRequest, IntentionResponse, PaymentGateway, RefundOutcome,
    },
    services::orders::OrderService,
};

pub const HMAC_SECRET: &str = "integration_test_hmac_secret";

/// Gateway double. Order references count up from 700001 so tests can
/// address the intention a given call produced.
pub struct MockGateway {
    pub intention_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
    pub fail_intention: AtomicBool,
    pub refund_success: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            intention_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            fail_intention: AtomicBool::new(false),
            refund_success: AtomicBool::new(true),
        }
    }

    pub fn intention_count(&self) -> usize {
        self.intention_calls.load(Ordering::SeqCst)
    }

    pub fn refund_count(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    /// The order reference produced by the n-th intention call (1-based).
    pub fn order_ref(n: usize) -> String {
        (700_000 + n).to_string()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intention(
        &self,
        request: &IntentionRequest,
    ) -> Result<IntentionResponse, ServiceError> {
        assert!(request.amount > 0, "gateway must never see a non-positive amount");
        assert!(!request.items.is_empty(), "gateway must never see an empty item list");

        if self.fail_intention.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayRejected("card declined".into()));
        }

        let n = self.intention_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IntentionResponse {
            order_ref: Self::order_ref(n),
            client_secret: format!("cs_test_{}", n),
        })
    }

    async fn request_refund(
        &self,
        _amount_cents: i64,
        _transaction_id: &str,
    ) -> Result<RefundOutcome, ServiceError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let success = self.refund_success.load(Ordering::SeqCst);
        Ok(RefundOutcome {
            success,
            raw: serde_json::json!({ "success": success }),
        })
    }
}

pub fn payment_config() -> PaymentConfig {
    PaymentConfig {
        base_url: "https://gateway.test".into(),
        secret_key: "sk_test".into(),
        public_key: "pk_test".into(),
        hmac_secret: HMAC_SECRET.into(),
        payment_method_ids: vec![42],
        currency: "EGP".into(),
        request_timeout_secs: 20,
        refund_window_days: 14,
    }
}

/// Integration context over a fresh in-memory database.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub gateway: Arc<MockGateway>,
    pub orders: OrderService,
    pub entitlements: EntitlementService,
}

impl TestContext {
    pub async fn new() -> Self {
        let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
        options.max_connections(1).min_connections(1);
        let db = Database::connect(options).await.expect("database connect");
        Migrator::up(&db, None).await.expect("migrations");
        let db = Arc::new(db);

        let gateway = Arc::new(MockGateway::new());
        let orders = OrderService::new(
            db.clone(),
            gateway.clone(),
            CallbackVerifier::new(HMAC_SECRET),
            payment_config(),
            None,
            None,
        );
        let entitlements = EntitlementService::new(db.clone());

        Self {
            db,
            gateway,
            orders,
            entitlements,
        }
    }

    pub async fn seed_user(&self, email: &str) -> user::Model {
        let model = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            email: Set(email.to_string()),
            first_name: Set("Nour".into()),
            last_name: Set("Hassan".into()),
            phone_number: Set(None),
            created_at: Set(Utc::now()),
        };
        model.insert(&*self.db).await.expect("seed user")
    }

    pub fn billing_for(user: &user::Model) -> BillingData {
        BillingData {
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            phone_number: None,
        }
    }

    /// Builds a notification signed with the shared test secret.
    pub fn signed_callback(
        &self,
        transaction_id: i64,
        success: bool,
        amount_cents: i64,
        order_ref: &str,
        email: &str,
    ) -> TransactionNotification {
        let mut notification = TransactionNotification {
            transaction_id,
            success,
            amount_cents,
            currency: "EGP".into(),
            created_at: "2025-11-03T10:00:00Z".into(),
            order_ref: order_ref.to_string(),
            buyer_email: email.to_string(),
            hmac: None,
        };
        notification.hmac = Some(sign(&notification));
        notification
    }

    pub async fn order_for(&self, user_id: Uuid, level: Level) -> order::Model {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Level.eq(level))
            .one(&*self.db)
            .await
            .expect("order query")
            .expect("order exists")
    }

    pub async fn order_count(&self, user_id: Uuid) -> u64 {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await
            .expect("order count")
    }

    pub async fn entitlement_count(&self, user_id: Uuid) -> u64 {
        entitlement::Entity::find()
            .filter(entitlement::Column::UserId.eq(user_id))
            .count(&*self.db)
            .await
            .expect("entitlement count")
    }

    /// Rewrites an order's creation time, for refund-window scenarios.
    pub async fn backdate_order(&self, order_id: Uuid, days: i64) {
        let existing = order::Entity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .expect("order query")
            .expect("order exists");
        let mut active: order::ActiveModel = existing.into();
        active.created_at = Set(Utc::now() - Duration::days(days));
        active.update(&*self.db).await.expect("backdate order");
    }
}

/// Signs the canonical concatenation the way the gateway does.
pub fn sign(notification: &TransactionNotification) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(HMAC_SECRET.as_bytes()).expect("hmac key");
    mac.update(notification.signable().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}
