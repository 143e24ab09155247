//! Password reset tokens.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use mockall::automock;
use sqlx::{query, query_scalar};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    database::TenantConnections,
    domain::{tenants::models::TenantContext, users::models::UserUuid},
};

const STORE_RESET_TOKEN_SQL: &str = include_str!("sql/store_reset_token.sql");
const CONSUME_RESET_TOKEN_SQL: &str = include_str!("sql/consume_reset_token.sql");

#[derive(Debug, Error)]
pub enum ResetTokenError {
    #[error("storage error")]
    Sql(#[from] sqlx::Error),
}

/// Pending reset for one user. Only the digest of the token is kept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReset {
    pub user: UserUuid,
    pub email: String,
    pub token_hash: String,
    pub expires_at: Timestamp,
}

#[automock]
#[async_trait]
pub trait ResetTokenStore: Send + Sync {
    /// Store a reset, replacing any earlier one for the same user.
    async fn store(&self, ctx: &TenantContext, reset: PendingReset) -> Result<(), ResetTokenError>;

    /// Delete and return the matching unexpired reset. At most one caller gets `Some`.
    async fn consume(
        &self,
        ctx: &TenantContext,
        email: &str,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<UserUuid>, ResetTokenError>;
}

#[derive(Debug, Clone)]
pub struct PgResetTokenStore {
    connections: Arc<TenantConnections>,
}

impl PgResetTokenStore {
    #[must_use]
    pub fn new(connections: Arc<TenantConnections>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl ResetTokenStore for PgResetTokenStore {
    async fn store(&self, ctx: &TenantContext, reset: PendingReset) -> Result<(), ResetTokenError> {
        let pool = self.connections.pool_for(ctx).await;

        query(STORE_RESET_TOKEN_SQL)
            .bind(ctx.tenant().into_uuid())
            .bind(reset.user.into_uuid())
            .bind(reset.email)
            .bind(reset.token_hash)
            .bind(SqlxTimestamp::from(reset.expires_at))
            .execute(&pool)
            .await?;

        Ok(())
    }

    async fn consume(
        &self,
        ctx: &TenantContext,
        email: &str,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<UserUuid>, ResetTokenError> {
        let pool = self.connections.pool_for(ctx).await;

        let user: Option<Uuid> = query_scalar(CONSUME_RESET_TOKEN_SQL)
            .bind(ctx.tenant().into_uuid())
            .bind(email)
            .bind(token_hash)
            .bind(SqlxTimestamp::from(now))
            .fetch_optional(&pool)
            .await?;

        Ok(user.map(UserUuid::from_uuid))
    }
}

#[cfg(test)]
mod tests {
    use jiff::SignedDuration;
    use tenantry::access::USER_ROLE;
    use testresult::TestResult;

    use super::*;
    use crate::{
        domain::{
            tenants::models::TenantUuid,
            users::{PgUserStore, UserStore},
        },
        test::{TestDb, fixtures},
    };

    #[tokio::test]
    #[ignore = "requires a container runtime"]
    async fn tokens_are_consumed_once_and_only_before_expiry() -> TestResult {
        let db = TestDb::tenant().await;
        let connections = db.connections()?;
        let ctx = TenantContext::new(TenantUuid::new(), Some(db.name.clone()));

        let user = PgUserStore::new(connections.clone())
            .create_user(&ctx, fixtures::new_user("ada@acme.test", &[USER_ROLE]))
            .await?;

        let store = PgResetTokenStore::new(connections);
        let now = Timestamp::now();

        store
            .store(
                &ctx,
                PendingReset {
                    user: user.uuid,
                    email: user.email.clone(),
                    token_hash: "digest".to_string(),
                    expires_at: now + SignedDuration::from_hours(1),
                },
            )
            .await?;

        let late = now + SignedDuration::from_hours(2);

        assert_eq!(store.consume(&ctx, "ADA@acme.test", "digest", late).await?, None);
        assert_eq!(
            store.consume(&ctx, "ADA@acme.test", "digest", now).await?,
            Some(user.uuid)
        );
        assert_eq!(store.consume(&ctx, "ada@acme.test", "digest", now).await?, None);

        Ok(())
    }
}
