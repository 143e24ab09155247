//! Email verification tokens.

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

const STORE_EMAIL_VERIFICATION_SQL: &str = include_str!("sql/store_email_verification.sql");
const CONSUME_EMAIL_VERIFICATION_SQL: &str = include_str!("sql/consume_email_verification.sql");

#[derive(Debug, Error)]
pub enum VerificationTokenError {
    #[error("storage error")]
    Sql(#[from] sqlx::Error),
}

/// Outstanding verification for one user's address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingVerification {
    pub user: UserUuid,
    pub token_hash: String,
    pub expires_at: Timestamp,
}

#[automock]
#[async_trait]
pub trait EmailVerificationStore: Send + Sync {
    /// Store a verification, replacing any earlier one for the same user.
    async fn store(
        &self,
        ctx: &TenantContext,
        verification: PendingVerification,
    ) -> Result<(), VerificationTokenError>;

    /// Delete and return the owner of a matching unexpired token. At most one caller gets
    /// `Some`.
    async fn consume(
        &self,
        ctx: &TenantContext,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<UserUuid>, VerificationTokenError>;
}

#[derive(Debug, Clone)]
pub struct PgEmailVerificationStore {
    connections: Arc<TenantConnections>,
}

impl PgEmailVerificationStore {
    #[must_use]
    pub fn new(connections: Arc<TenantConnections>) -> Self {
        Self { connections }
    }
}

#[async_trait]
impl EmailVerificationStore for PgEmailVerificationStore {
    async fn store(
        &self,
        ctx: &TenantContext,
        verification: PendingVerification,
    ) -> Result<(), VerificationTokenError> {
        let pool = self.connections.pool_for(ctx).await;

        query(STORE_EMAIL_VERIFICATION_SQL)
            .bind(ctx.tenant().into_uuid())
            .bind(verification.user.into_uuid())
            .bind(verification.token_hash)
            .bind(SqlxTimestamp::from(verification.expires_at))
            .execute(&pool)
            .await?;

        Ok(())
    }

    async fn consume(
        &self,
        ctx: &TenantContext,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<UserUuid>, VerificationTokenError> {
        let pool = self.connections.pool_for(ctx).await;

        let user: Option<Uuid> = query_scalar(CONSUME_EMAIL_VERIFICATION_SQL)
            .bind(ctx.tenant().into_uuid())
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
    async fn a_newer_token_replaces_the_outstanding_one() -> TestResult {
        let db = TestDb::tenant().await;
        let connections = db.connections()?;
        let ctx = TenantContext::new(TenantUuid::new(), Some(db.name.clone()));

        let user = PgUserStore::new(connections.clone())
            .create_user(&ctx, fixtures::new_user("ada@acme.test", &[USER_ROLE]))
            .await?;

        let store = PgEmailVerificationStore::new(connections);
        let now = Timestamp::now();
        let pending = |token_hash: &str| PendingVerification {
            user: user.uuid,
            token_hash: token_hash.to_string(),
            expires_at: now + SignedDuration::from_hours(24),
        };

        store.store(&ctx, pending("first")).await?;
        store.store(&ctx, pending("second")).await?;

        assert_eq!(store.consume(&ctx, "first", now).await?, None);
        assert_eq!(
            store
                .consume(&ctx, "second", now + SignedDuration::from_hours(25))
                .await?,
            None
        );
        assert_eq!(store.consume(&ctx, "second", now).await?, Some(user.uuid));
        assert_eq!(store.consume(&ctx, "second", now).await?, None);

        Ok(())
    }
}
