//! Impersonation Token Store

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use serde_json::Value;

use crate::{
    database::Db,
    domain::{
        impersonation::{
            errors::ImpersonationStoreError,
            models::{ImpersonationToken, ImpersonationTokenUuid, NewImpersonationToken},
            repository::PgImpersonationRepository,
        },
        users::models::UserUuid,
    },
};

#[automock]
#[async_trait]
pub trait ImpersonationStore: Send + Sync {
    async fn create(
        &self,
        token: NewImpersonationToken,
    ) -> Result<ImpersonationToken, ImpersonationStoreError>;

    /// Count one use of an active, unexpired token that has uses left. `None` when the
    /// token does not qualify; concurrent callers cannot both consume the last use.
    async fn redeem(
        &self,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError>;

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError>;

    async fn get(
        &self,
        token: ImpersonationTokenUuid,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError>;

    /// Persist the expiry of a still-active token.
    async fn mark_expired(&self, token: ImpersonationTokenUuid)
    -> Result<(), ImpersonationStoreError>;

    /// Revoke an active token. `None` when it was not active.
    async fn revoke(
        &self,
        token: ImpersonationTokenUuid,
        revoked_by: UserUuid,
        reason: String,
        at: Timestamp,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError>;

    /// Append an entry to the token's audit trail.
    async fn append_audit(
        &self,
        token: ImpersonationTokenUuid,
        entry: Value,
    ) -> Result<(), ImpersonationStoreError>;

    /// Mark every past-due active token expired; returns how many changed.
    async fn sweep_expired(&self, now: Timestamp) -> Result<u64, ImpersonationStoreError>;
}

#[derive(Debug, Clone)]
pub struct PgImpersonationStore {
    db: Db,
    repository: PgImpersonationRepository,
}

impl PgImpersonationStore {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self {
            db,
            repository: PgImpersonationRepository::new(),
        }
    }
}

#[async_trait]
impl ImpersonationStore for PgImpersonationStore {
    async fn create(
        &self,
        token: NewImpersonationToken,
    ) -> Result<ImpersonationToken, ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        let token = self.repository.create_token(&mut tx, token).await?;

        tx.commit().await?;

        Ok(token)
    }

    async fn redeem(
        &self,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        let token = self.repository.redeem(&mut tx, token_hash, now).await?;

        tx.commit().await?;

        Ok(token)
    }

    async fn find_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        let token = self.repository.find_by_hash(&mut tx, token_hash).await?;

        tx.commit().await?;

        Ok(token)
    }

    async fn get(
        &self,
        token: ImpersonationTokenUuid,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        let token = self.repository.get_token(&mut tx, token).await?;

        tx.commit().await?;

        Ok(token)
    }

    async fn mark_expired(
        &self,
        token: ImpersonationTokenUuid,
    ) -> Result<(), ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        self.repository.mark_expired(&mut tx, token).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn revoke(
        &self,
        token: ImpersonationTokenUuid,
        revoked_by: UserUuid,
        reason: String,
        at: Timestamp,
    ) -> Result<Option<ImpersonationToken>, ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        let token = self
            .repository
            .revoke(&mut tx, token, revoked_by, &reason, at)
            .await?;

        tx.commit().await?;

        Ok(token)
    }

    async fn append_audit(
        &self,
        token: ImpersonationTokenUuid,
        entry: Value,
    ) -> Result<(), ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        self.repository.append_audit(&mut tx, token, entry).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn sweep_expired(&self, now: Timestamp) -> Result<u64, ImpersonationStoreError> {
        let mut tx = self.db.begin().await?;

        let swept = self.repository.sweep_expired(&mut tx, now).await?;

        tx.commit().await?;

        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jiff::SignedDuration;
    use tenantry::status::TokenStatus;
    use testresult::TestResult;

    use super::*;
    use crate::{
        database::TenantConnections,
        domain::{
            tenants::{PgTenantStore, TenantStore, models::TenantContext},
            users::{PgUserStore, UserStore},
        },
        test::{TestDb, fixtures},
    };

    struct Seeded {
        db: TestDb,
        store: PgImpersonationStore,
        token: NewImpersonationToken,
    }

    async fn seeded(now: Timestamp) -> TestResult<Seeded> {
        let db = TestDb::new().await;
        let tenant = PgTenantStore::new(Db::new(db.pool().clone()))
            .create_tenant(fixtures::new_tenant("acme"))
            .await?;

        let connections: Arc<TenantConnections> = db.connections()?;
        let operator = PgUserStore::new(connections)
            .create_user(
                &TenantContext::central(tenant.uuid),
                fixtures::new_user("operator@platform.test", &[]),
            )
            .await?;

        let token = fixtures::new_impersonation_token(tenant.uuid, operator.uuid, now);

        Ok(Seeded {
            store: PgImpersonationStore::new(Db::new(db.pool().clone())),
            db,
            token,
        })
    }

    #[tokio::test]
    #[ignore = "requires a container runtime"]
    async fn concurrent_redemptions_consume_a_single_use_token_once() -> TestResult {
        let now = Timestamp::now();
        let Seeded { db: _db, store, token } = seeded(now).await?;
        let hash = token.token_hash.clone();

        store.create(token).await?;

        let (first, second) = tokio::join!(store.redeem(&hash, now), store.redeem(&hash, now));
        let redeemed: Vec<_> = [first?, second?].into_iter().flatten().collect();

        assert_eq!(redeemed.len(), 1);
        assert_eq!(redeemed[0].used_count, 1);
        assert_eq!(redeemed[0].status, TokenStatus::Used);

        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a container runtime"]
    async fn expired_tokens_are_not_redeemed_and_are_swept() -> TestResult {
        let now = Timestamp::now();
        let Seeded { db: _db, store, token } = seeded(now).await?;
        let hash = token.token_hash.clone();

        store.create(token).await?;

        let later = now + SignedDuration::from_mins(10);

        assert!(store.redeem(&hash, later).await?.is_none());
        assert_eq!(store.sweep_expired(later).await?, 1);
        assert_eq!(store.sweep_expired(later).await?, 0);

        let swept = store.find_by_hash(&hash).await?;

        assert_eq!(swept.map(|token| token.status), Some(TokenStatus::Expired));

        Ok(())
    }

    #[tokio::test]
    #[ignore = "requires a container runtime"]
    async fn revocation_only_applies_to_active_tokens() -> TestResult {
        let now = Timestamp::now();
        let Seeded { db: _db, store, token } = seeded(now).await?;
        let impersonator = token.impersonator;

        let created = store.create(token).await?;

        let revoked = store
            .revoke(created.uuid, impersonator, "done".to_string(), now)
            .await?;

        assert_eq!(revoked.map(|token| token.status), Some(TokenStatus::Revoked));
        assert!(
            store
                .revoke(created.uuid, impersonator, "again".to_string(), now)
                .await?
                .is_none()
        );

        Ok(())
    }
}
