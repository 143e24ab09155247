//! Bootstrap Store

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use mockall::automock;
use sqlx::{query, query_scalar};

use crate::{
    database::Db,
    domain::{
        bootstrap::{
            errors::BootstrapStoreError,
            models::{BootstrapOutcome, BootstrapSeed},
        },
        tenants::repository::PgTenantsRepository,
        users::repository::PgUsersRepository,
    },
};

const ENSURE_STATE_SQL: &str = include_str!("sql/ensure_state.sql");
const LOCK_STATE_SQL: &str = include_str!("sql/lock_state.sql");
const IS_COMPLETE_SQL: &str = include_str!("sql/is_complete.sql");
const SUPER_ADMIN_EXISTS_SQL: &str = include_str!("sql/super_admin_exists.sql");
const MARK_COMPLETE_SQL: &str = include_str!("sql/mark_complete.sql");

#[automock]
#[async_trait]
pub trait BootstrapStore: Send + Sync {
    /// Whether the flag is set or a super-admin already exists.
    async fn is_complete(&self) -> Result<bool, BootstrapStoreError>;

    /// Create the system tenant (if missing) and the super-admin, then set the flag, all in
    /// one transaction serialized on the setup-state row.
    async fn bootstrap(
        &self,
        seed: BootstrapSeed,
        at: Timestamp,
    ) -> Result<BootstrapOutcome, BootstrapStoreError>;
}

#[derive(Debug, Clone)]
pub struct PgBootstrapStore {
    db: Db,
    tenants: PgTenantsRepository,
    users: PgUsersRepository,
}

impl PgBootstrapStore {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self {
            db,
            tenants: PgTenantsRepository::new(),
            users: PgUsersRepository::new(),
        }
    }
}

#[async_trait]
impl BootstrapStore for PgBootstrapStore {
    async fn is_complete(&self) -> Result<bool, BootstrapStoreError> {
        let complete = query_scalar(IS_COMPLETE_SQL)
            .fetch_one(self.db.pool())
            .await?;

        Ok(complete)
    }

    async fn bootstrap(
        &self,
        seed: BootstrapSeed,
        at: Timestamp,
    ) -> Result<BootstrapOutcome, BootstrapStoreError> {
        let mut tx = self.db.begin().await?;

        query(ENSURE_STATE_SQL).execute(&mut *tx).await?;

        let flagged: bool = query_scalar(LOCK_STATE_SQL).fetch_one(&mut *tx).await?;
        let super_admin_exists: bool = query_scalar(SUPER_ADMIN_EXISTS_SQL)
            .fetch_one(&mut *tx)
            .await?;

        if flagged || super_admin_exists {
            tx.rollback().await?;

            return Ok(BootstrapOutcome::AlreadyComplete);
        }

        let system_tenant = match self.tenants.system_tenant(&mut tx).await? {
            Some(tenant) => tenant,
            None => {
                let domain = seed.system_tenant.domain.clone();
                let tenant = self
                    .tenants
                    .create_tenant(&mut tx, seed.system_tenant)
                    .await?;

                self.tenants
                    .create_primary_domain(&mut tx, tenant.uuid, &domain)
                    .await?;

                tenant
            }
        };

        let granted = self
            .users
            .create_user(&mut tx, system_tenant.uuid, &seed.super_admin)
            .await?;

        if usize::try_from(granted).ok() != Some(seed.super_admin.roles.len()) {
            return Err(BootstrapStoreError::MissingPlatformRole);
        }

        query(MARK_COMPLETE_SQL)
            .bind(SqlxTimestamp::from(at))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(BootstrapOutcome::Created {
            system_tenant: system_tenant.uuid,
            super_admin: seed.super_admin.uuid,
        })
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;
    use crate::test::{TestDb, fixtures};

    #[tokio::test]
    #[ignore = "requires a container runtime"]
    async fn bootstrap_completes_exactly_once_under_concurrency() -> TestResult {
        let db = TestDb::new().await;
        let store = PgBootstrapStore::new(Db::new(db.pool().clone()));
        let now = Timestamp::now();

        assert!(!store.is_complete().await?);

        let (first, second) = tokio::join!(
            store.bootstrap(fixtures::bootstrap_seed("root@platform.test"), now),
            store.bootstrap(fixtures::bootstrap_seed("other@platform.test"), now),
        );

        let outcomes = [first?, second?];
        let created = outcomes
            .iter()
            .filter(|outcome| matches!(outcome, BootstrapOutcome::Created { .. }))
            .count();

        assert_eq!(created, 1);
        assert!(outcomes.contains(&BootstrapOutcome::AlreadyComplete));
        assert!(store.is_complete().await?);

        let super_admins: i64 =
            sqlx::query_scalar("SELECT count(*) FROM users WHERE is_super_admin")
                .fetch_one(db.pool())
                .await?;

        assert_eq!(super_admins, 1);

        Ok(())
    }
}
