use chrono::{DateTime, Utc};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    catalog::Level,
    db::DbPool,
    entities::entitlement::{self, Entity as EntitlementEntity},
    errors::ServiceError,
};

/// Read side of the entitlement store. Writes happen only through
/// [`grant`] and [`revoke`], inside the same transaction that moves the
/// corresponding order's status.
#[derive(Clone)]
pub struct EntitlementService {
    db: Arc<DbPool>,
}

impl EntitlementService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Whether the user owns the level.
    #[instrument(skip(self), fields(user_id = %user_id, level = %level))]
    pub async fn has_entitlement(&self, user_id: Uuid, level: Level) -> Result<bool, ServiceError> {
        let found = EntitlementEntity::find()
            .filter(entitlement::Column::UserId.eq(user_id))
            .filter(entitlement::Column::Level.eq(level))
            .one(&*self.db)
            .await?;
        Ok(found.is_some())
    }

    /// Precondition guard for progress-mutating operations: resolves to
    /// `AccessDenied` when the level is not owned, so callers can map it
    /// straight to a 403.
    pub async fn ensure_entitlement(&self, user_id: Uuid, level: Level) -> Result<(), ServiceError> {
        if self.has_entitlement(user_id, level).await? {
            Ok(())
        } else {
            Err(ServiceError::AccessDenied(format!(
                "user has not purchased level {}",
                level
            )))
        }
    }

    /// Levels the user currently owns, newest grant first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn owned_levels(&self, user_id: Uuid) -> Result<Vec<Level>, ServiceError> {
        let rows = EntitlementEntity::find()
            .filter(entitlement::Column::UserId.eq(user_id))
            .order_by_desc(entitlement::Column::GrantedAt)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.level).collect())
    }
}

/// Inserts the entitlement row for `(user_id, level)`. Must be called on
/// the transaction that completes the order; the unique index on the pair
/// backstops concurrent callback deliveries.
pub(crate) async fn grant<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    level: Level,
    granted_at: DateTime<Utc>,
) -> Result<(), ServiceError> {
    let model = entitlement::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        level: Set(level),
        granted_at: Set(granted_at),
    };
    EntitlementEntity::insert(model).exec(conn).await?;
    Ok(())
}

/// Deletes the entitlement row for `(user_id, level)` and returns how many
/// rows went away. Must be called on the transaction that refunds the
/// order; the caller treats zero rows as a ledger inconsistency.
pub(crate) async fn revoke<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    level: Level,
) -> Result<u64, ServiceError> {
    let result = EntitlementEntity::delete_many()
        .filter(entitlement::Column::UserId.eq(user_id))
        .filter(entitlement::Column::Level.eq(level))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}
