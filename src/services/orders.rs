//! Order lifecycle orchestration.
//!
//! Owns every transition of the order ledger and keeps the entitlement
//! store consistent with it: any mutation touching both happens inside a
//! single database transaction.

use chrono::{Duration, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::OnConflict, ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    Set, TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    catalog::{self, Level},
    config::PaymentConfig,
    db::DbPool,
    entities::order::{self, Entity as OrderEntity, PaymentStatus},
    entities::user::{self, Entity as UserEntity},
    errors::ServiceError,
    events::{Event, EventSender},
    services::callback::{CallbackVerifier, TransactionNotification},
    services::entitlements,
    services::gateway::{BillingData, IntentionRequest, LineItem, PaymentGateway, RefundOutcome},
};

/// Result of handling a gateway callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// A pending order was resolved by this delivery.
    Processed { success: bool },
    /// The transaction had already been applied; nothing changed.
    AlreadyHandled,
}

/// Service orchestrating purchases, callback reconciliation and refunds.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DbPool>,
    gateway: Arc<dyn PaymentGateway>,
    verifier: CallbackVerifier,
    payment: PaymentConfig,
    event_sender: Option<Arc<EventSender>>,
    redis: Option<Arc<redis::Client>>,
}

impl OrderService {
    pub fn new(
        db: Arc<DbPool>,
        gateway: Arc<dyn PaymentGateway>,
        verifier: CallbackVerifier,
        payment: PaymentConfig,
        event_sender: Option<Arc<EventSender>>,
        redis: Option<Arc<redis::Client>>,
    ) -> Self {
        Self {
            db,
            gateway,
            verifier,
            payment,
            event_sender,
            redis,
        }
    }

    /// Opens a payment intention for the level and records the attempt as a
    /// pending ledger row, returning the hosted checkout URL.
    ///
    /// A level already owned is rejected before any gateway traffic. A
    /// pending or failed attempt for the same pair is overwritten in place
    /// (re-attempt semantics); there is never a moment without a row.
    #[instrument(skip(self, billing), fields(user_id = %user_id, level = %level))]
    pub async fn process_order(
        &self,
        user_id: Uuid,
        billing: BillingData,
        level: Level,
    ) -> Result<String, ServiceError> {
        let entry = catalog::lookup(level);

        let txn = self.db.begin().await?;

        let already_owned = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Level.eq(level))
            .filter(order::Column::Status.eq(PaymentStatus::Completed))
            .one(&txn)
            .await?;

        if already_owned.is_some() {
            return Err(ServiceError::AlreadyOwned(level.to_string()));
        }

        let request = IntentionRequest {
            amount: entry.price_cents,
            currency: self.payment.currency.clone(),
            payment_methods: self.payment.payment_method_ids.clone(),
            items: vec![LineItem {
                name: level.to_string(),
                amount: entry.price_cents,
                description: entry.description.to_string(),
                quantity: 1,
            }],
            billing_data: billing,
        };

        // Gateway errors propagate untouched; no ledger row is written for
        // an intention that never existed.
        let intention = self.gateway.create_intention(&request).await?;

        let now = Utc::now();
        let attempt = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            level: Set(level),
            amount_cents: Set(entry.price_cents),
            currency: Set(self.payment.currency.clone()),
            status: Set(PaymentStatus::Pending),
            gateway_order_ref: Set(Some(intention.order_ref.clone())),
            external_payment_id: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        // The unique (user_id, level) index is the real duplicate guard;
        // the ownership check above is an optimization. The conflict action
        // refuses to touch a row that completed concurrently.
        let rows = OrderEntity::insert(attempt)
            .on_conflict(
                OnConflict::columns([order::Column::UserId, order::Column::Level])
                    .update_columns([
                        order::Column::AmountCents,
                        order::Column::Currency,
                        order::Column::Status,
                        order::Column::GatewayOrderRef,
                        order::Column::ExternalPaymentId,
                        order::Column::CreatedAt,
                        order::Column::UpdatedAt,
                    ])
                    .action_and_where(order::Column::Status.ne(PaymentStatus::Completed))
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        if rows == 0 {
            warn!(%user_id, %level, "Purchase attempt raced a completing order");
            return Err(ServiceError::AlreadyOwned(level.to_string()));
        }

        txn.commit().await?;

        counter!("lingopay_orders_created_total", 1);

        if let Some(created) = OrderEntity::find()
            .filter(order::Column::UserId.eq(user_id))
            .filter(order::Column::Level.eq(level))
            .one(&*self.db)
            .await?
        {
            self.emit(Event::OrderCreated {
                order_id: created.id,
                user_id,
                level,
            })
            .await;
        }

        info!(%user_id, %level, order_ref = %intention.order_ref, "Payment intention created");

        Ok(checkout_url(&self.payment, &intention.client_secret))
    }

    /// Reconciles an asynchronous gateway callback against the ledger.
    ///
    /// Unverified payloads are rejected before any field is used, even to
    /// look up an order. Redelivered callbacks for an already-resolved
    /// transaction are a no-op.
    #[instrument(skip(self, notification), fields(transaction_id = notification.transaction_id))]
    pub async fn handle_callback(
        &self,
        notification: TransactionNotification,
    ) -> Result<CallbackOutcome, ServiceError> {
        if !self.verifier.verify(&notification) {
            counter!("lingopay_callbacks_total", 1, "outcome" => "invalid_signature");
            return Err(ServiceError::InvalidSignature);
        }

        if self.callback_already_seen(notification.transaction_id).await {
            counter!("lingopay_callbacks_total", 1, "outcome" => "duplicate");
            info!(
                transaction_id = notification.transaction_id,
                "Callback already processed (fast path)"
            );
            return Ok(CallbackOutcome::AlreadyHandled);
        }

        let user = UserEntity::find()
            .filter(user::Column::Email.eq(notification.buyer_email.clone()))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                // A verified callback for an unknown account means the
                // ledger and the identity store disagree.
                error!(
                    buyer_email = %notification.buyer_email,
                    transaction_id = notification.transaction_id,
                    "Verified callback references an unknown account"
                );
                ServiceError::UnknownUser(notification.buyer_email.clone())
            })?;

        let txn = self.db.begin().await?;

        let pending = OrderEntity::find()
            .filter(order::Column::UserId.eq(user.id))
            .filter(order::Column::GatewayOrderRef.eq(notification.order_ref.clone()))
            .filter(order::Column::Status.eq(PaymentStatus::Pending))
            .order_by_desc(order::Column::CreatedAt)
            .one(&txn)
            .await?;

        let Some(pending) = pending else {
            // No pending order: either a redelivery of a resolved
            // transaction or a callback we cannot place.
            let prior = OrderEntity::find()
                .filter(order::Column::UserId.eq(user.id))
                .filter(order::Column::GatewayOrderRef.eq(notification.order_ref.clone()))
                .one(&txn)
                .await?;

            return match prior {
                Some(resolved)
                    if resolved.external_payment_id.as_deref()
                        == Some(notification.transaction_id.to_string().as_str())
                        && resolved.amount_cents == notification.amount_cents =>
                {
                    counter!("lingopay_callbacks_total", 1, "outcome" => "duplicate");
                    info!(
                        order_id = %resolved.id,
                        transaction_id = notification.transaction_id,
                        "Callback redelivered for a resolved order"
                    );
                    Ok(CallbackOutcome::AlreadyHandled)
                }
                _ => {
                    counter!("lingopay_callbacks_total", 1, "outcome" => "unmatched");
                    warn!(
                        order_ref = %notification.order_ref,
                        transaction_id = notification.transaction_id,
                        "Callback does not match any order"
                    );
                    Err(ServiceError::NoMatchingOrder(notification.order_ref.clone()))
                }
            };
        };

        if pending.amount_cents != notification.amount_cents {
            warn!(
                order_id = %pending.id,
                expected = pending.amount_cents,
                got = notification.amount_cents,
                "Callback amount does not match the pending order"
            );
            return Err(ServiceError::NoMatchingOrder(format!(
                "amount mismatch for order reference {}",
                notification.order_ref
            )));
        }

        let order_id = pending.id;
        let level = pending.level;
        let now = Utc::now();
        let new_status = if notification.success {
            PaymentStatus::Completed
        } else {
            PaymentStatus::Failed
        };

        let mut resolved: order::ActiveModel = pending.into();
        resolved.status = Set(new_status);
        resolved.external_payment_id = Set(Some(notification.transaction_id.to_string()));
        resolved.updated_at = Set(Some(now));
        resolved.update(&txn).await?;

        // The grant rides the same transaction as the status flip; a crash
        // can never leave a paid-but-unentitled state.
        if notification.success {
            entitlements::grant(&txn, user.id, level, now).await?;
        }

        txn.commit().await?;

        self.remember_callback(notification.transaction_id).await;

        if notification.success {
            counter!("lingopay_callbacks_total", 1, "outcome" => "completed");
            info!(%order_id, user_id = %user.id, %level, "Order completed");
            self.emit(Event::PaymentCompleted {
                order_id,
                user_id: user.id,
                level,
            })
            .await;
            self.emit(Event::EntitlementGranted {
                user_id: user.id,
                level,
            })
            .await;
        } else {
            counter!("lingopay_callbacks_total", 1, "outcome" => "failed");
            warn!(%order_id, user_id = %user.id, %level, "Order failed");
            self.emit(Event::PaymentFailed {
                order_id,
                user_id: user.id,
                level,
            })
            .await;
        }

        Ok(CallbackOutcome::Processed {
            success: notification.success,
        })
    }

    /// Refunds a completed transaction within the policy window and
    /// retracts the entitlement it granted.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn refund_order(&self, transaction_id: &str) -> Result<RefundOutcome, ServiceError> {
        let order = OrderEntity::find()
            .filter(order::Column::ExternalPaymentId.eq(transaction_id))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(transaction_id.to_string()))?;

        if order.status != PaymentStatus::Completed {
            return Err(ServiceError::NotRefundable(format!(
                "order {} is {:?}",
                order.id, order.status
            )));
        }

        let cutoff = Utc::now() - Duration::days(self.payment.refund_window_days);
        if order.created_at < cutoff {
            // The window check runs before any money moves.
            return Err(ServiceError::RefundWindowExpired);
        }

        let outcome = self
            .gateway
            .request_refund(order.amount_cents, transaction_id)
            .await?;

        if !outcome.success {
            warn!(order_id = %order.id, "Gateway declined the refund; order left completed");
            return Ok(outcome);
        }

        let txn = self.db.begin().await?;

        // Re-read under the transaction so two concurrent refunds cannot
        // both retract the entitlement.
        let current = OrderEntity::find_by_id(order.id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::OrderNotFound(transaction_id.to_string()))?;

        if current.status != PaymentStatus::Completed {
            return Err(ServiceError::NotRefundable(format!(
                "order {} is {:?}",
                current.id, current.status
            )));
        }

        let user_id = current.user_id;
        let level = current.level;
        let order_id = current.id;

        let mut refunded: order::ActiveModel = current.into();
        refunded.status = Set(PaymentStatus::Refunded);
        refunded.updated_at = Set(Some(Utc::now()));
        refunded.update(&txn).await?;

        let removed = entitlements::revoke(&txn, user_id, level).await?;
        if removed == 0 {
            // A completed order without its entitlement violates the
            // derivation invariant; refuse rather than silently repair.
            error!(
                %order_id,
                %user_id,
                %level,
                "Completed order has no entitlement to revoke"
            );
            return Err(ServiceError::InternalInconsistency(format!(
                "no entitlement found for order {}",
                order_id
            )));
        }

        txn.commit().await?;

        counter!("lingopay_refunds_total", 1);
        info!(%order_id, %user_id, %level, "Order refunded and entitlement revoked");

        self.emit(Event::OrderRefunded {
            order_id,
            user_id,
            level,
        })
        .await;
        self.emit(Event::EntitlementRevoked { user_id, level }).await;

        Ok(outcome)
    }

    async fn emit(&self, event: Event) {
        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(event).await {
                warn!(error = %e, "Failed to send event");
            }
        }
    }

    /// Best-effort duplicate short-circuit. The ledger state machine is
    /// the actual guarantee; when Redis is absent or down this always
    /// reports unseen.
    async fn callback_already_seen(&self, transaction_id: i64) -> bool {
        let Some(client) = self.redis.as_ref() else {
            return false;
        };
        let key = format!("lingopay:cb:{}", transaction_id);
        match client.get_async_connection().await {
            Ok(mut conn) => match redis::cmd("EXISTS")
                .arg(&key)
                .query_async::<_, bool>(&mut conn)
                .await
            {
                Ok(seen) => seen,
                Err(e) => {
                    debug!(error = %e, "Redis EXISTS failed; falling back to ledger");
                    false
                }
            },
            Err(e) => {
                debug!(error = %e, "Redis unavailable; falling back to ledger");
                false
            }
        }
    }

    /// Records a resolved transaction id after commit, so redeliveries can
    /// skip the ledger walk.
    async fn remember_callback(&self, transaction_id: i64) {
        let Some(client) = self.redis.as_ref() else {
            return;
        };
        let key = format!("lingopay:cb:{}", transaction_id);
        if let Ok(mut conn) = client.get_async_connection().await {
            let outcome: Result<(), _> = redis::cmd("SET")
                .arg(&key)
                .arg("1")
                .arg("EX")
                .arg(24 * 3600)
                .query_async(&mut conn)
                .await;
            if let Err(e) = outcome {
                debug!(error = %e, "Failed to record callback in Redis");
            }
        }
    }
}

/// Hosted checkout URL handed back to the client after intention creation.
fn checkout_url(payment: &PaymentConfig, client_secret: &str) -> String {
    format!(
        "{}/unifiedcheckout/?publicKey={}&clientSecret={}",
        payment.base_url, payment.public_key, client_secret
    )
}
