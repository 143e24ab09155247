//! Tenant store.

use async_trait::async_trait;
use jiff::Timestamp;
use mockall::automock;
use tenantry::{
    limits::{Limit, LimitExceeded},
    plans::Plan,
    status::InvalidTransition,
};

use crate::{
    database::Db,
    domain::tenants::{
        errors::TenantsServiceError,
        models::{Counter, NewTenant, StatusChange, Tenant, TenantUuid},
        repository::PgTenantsRepository,
    },
};

#[automock]
#[async_trait]
/// Central persistence for tenant rows and their domains.
pub trait TenantStore: Send + Sync {
    /// Insert the tenant and its primary domain in one transaction.
    async fn create_tenant(&self, tenant: NewTenant) -> Result<Tenant, TenantsServiceError>;

    /// Fetch a live (not soft-deleted) tenant.
    async fn get_tenant(&self, tenant: TenantUuid) -> Result<Tenant, TenantsServiceError>;

    /// Fetch the live tenant serving a domain.
    async fn find_by_domain(&self, domain: &str) -> Result<Tenant, TenantsServiceError>;

    async fn system_tenant(&self) -> Result<Option<Tenant>, TenantsServiceError>;

    /// Whether any tenant, deleted or not, holds the slug.
    async fn slug_taken(&self, slug: &str) -> Result<bool, TenantsServiceError>;

    async fn domain_taken(&self, domain: &str) -> Result<bool, TenantsServiceError>;

    /// Whether a live tenant was registered with this admin email.
    async fn admin_email_taken(&self, email: &str) -> Result<bool, TenantsServiceError>;

    async fn mark_migrated(
        &self,
        tenant: TenantUuid,
        at: Timestamp,
    ) -> Result<(), TenantsServiceError>;

    /// Apply a status change conditionally on the current status.
    async fn transition_status(
        &self,
        tenant: TenantUuid,
        change: StatusChange,
    ) -> Result<Tenant, TenantsServiceError>;

    async fn soft_delete(&self, tenant: TenantUuid, at: Timestamp)
    -> Result<(), TenantsServiceError>;

    /// Remove the tenant row outright; domains cascade.
    async fn purge_tenant(&self, tenant: TenantUuid) -> Result<(), TenantsServiceError>;

    /// Keep the digest of a tenant's activation token, replacing any earlier one.
    async fn store_verification_token(
        &self,
        tenant: TenantUuid,
        token_hash: &str,
    ) -> Result<(), TenantsServiceError>;

    /// Delete a live pending tenant's activation token and return the tenant. At most one
    /// caller gets `Some`.
    async fn consume_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantUuid>, TenantsServiceError>;

    /// Atomically move a counter by `delta`, returning the new value.
    ///
    /// Increments that would pass the tenant's limit are rejected with `LimitExceeded`,
    /// decrements below zero with `CounterUnderflow`. A rejected update changes nothing.
    async fn adjust_counter(
        &self,
        tenant: TenantUuid,
        counter: Counter,
        delta: i64,
    ) -> Result<i64, TenantsServiceError>;

    /// Replace features and limits with the plan's defaults.
    async fn update_plan(
        &self,
        tenant: TenantUuid,
        plan: Plan,
    ) -> Result<Tenant, TenantsServiceError>;
}

/// PostgreSQL-backed tenants repository.
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    db: Db,
    repository: PgTenantsRepository,
}

impl PgTenantStore {
    #[must_use]
    pub fn new(db: Db) -> Self {
        Self {
            db,
            repository: PgTenantsRepository::new(),
        }
    }
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn create_tenant(&self, tenant: NewTenant) -> Result<Tenant, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let created = self.repository.create_tenant(&mut tx, tenant).await?;

        self.repository
            .create_primary_domain(&mut tx, created.uuid, &created.domain)
            .await?;

        tx.commit().await?;

        Ok(created)
    }

    async fn get_tenant(&self, tenant: TenantUuid) -> Result<Tenant, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let found = self.repository.get_tenant(&mut tx, tenant).await?;

        tx.commit().await?;

        found.ok_or(TenantsServiceError::NotFound)
    }

    async fn find_by_domain(&self, domain: &str) -> Result<Tenant, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let found = self.repository.find_by_domain(&mut tx, domain).await?;

        tx.commit().await?;

        found.ok_or(TenantsServiceError::NotFound)
    }

    async fn system_tenant(&self) -> Result<Option<Tenant>, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let found = self.repository.system_tenant(&mut tx).await?;

        tx.commit().await?;

        Ok(found)
    }

    async fn slug_taken(&self, slug: &str) -> Result<bool, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let taken = self.repository.slug_taken(&mut tx, slug).await?;

        tx.commit().await?;

        Ok(taken)
    }

    async fn domain_taken(&self, domain: &str) -> Result<bool, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let taken = self.repository.domain_taken(&mut tx, domain).await?;

        tx.commit().await?;

        Ok(taken)
    }

    async fn admin_email_taken(&self, email: &str) -> Result<bool, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let taken = self.repository.admin_email_taken(&mut tx, email).await?;

        tx.commit().await?;

        Ok(taken)
    }

    async fn mark_migrated(
        &self,
        tenant: TenantUuid,
        at: Timestamp,
    ) -> Result<(), TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let rows_affected = self.repository.mark_migrated(&mut tx, tenant, at).await?;

        tx.commit().await?;

        if rows_affected == 0 {
            return Err(TenantsServiceError::NotFound);
        }

        Ok(())
    }

    async fn transition_status(
        &self,
        tenant: TenantUuid,
        change: StatusChange,
    ) -> Result<Tenant, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let updated = match &change {
            StatusChange::Activate { at } => self.repository.activate(&mut tx, tenant, *at).await?,
            StatusChange::Suspend { at, reason } => {
                self.repository
                    .suspend(&mut tx, tenant, *at, reason)
                    .await?
            }
        };

        if let Some(updated) = updated {
            tx.commit().await?;

            return Ok(updated);
        }

        let current = self.repository.get_tenant(&mut tx, tenant).await?;

        tx.commit().await?;

        match current {
            None => Err(TenantsServiceError::NotFound),
            Some(current) => Err(InvalidTransition {
                from: current.status,
                to: change.target(),
            }
            .into()),
        }
    }

    async fn soft_delete(
        &self,
        tenant: TenantUuid,
        at: Timestamp,
    ) -> Result<(), TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let rows_affected = self.repository.soft_delete(&mut tx, tenant, at).await?;

        tx.commit().await?;

        if rows_affected == 0 {
            return Err(TenantsServiceError::NotFound);
        }

        Ok(())
    }

    async fn purge_tenant(&self, tenant: TenantUuid) -> Result<(), TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        self.repository.purge(&mut tx, tenant).await?;

        tx.commit().await?;

        Ok(())
    }

    async fn store_verification_token(
        &self,
        tenant: TenantUuid,
        token_hash: &str,
    ) -> Result<(), TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        self.repository
            .store_verification_token(&mut tx, tenant, token_hash)
            .await?;

        tx.commit().await?;

        Ok(())
    }

    async fn consume_verification_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<TenantUuid>, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let tenant = self
            .repository
            .consume_verification_token(&mut tx, token_hash)
            .await?;

        tx.commit().await?;

        Ok(tenant)
    }

    async fn adjust_counter(
        &self,
        tenant: TenantUuid,
        counter: Counter,
        delta: i64,
    ) -> Result<i64, TenantsServiceError> {
        let mut tx = self.db.begin().await?;

        let adjusted = self
            .repository
            .adjust_counter(&mut tx, tenant, counter, delta)
            .await?;

        if let Some(value) = adjusted {
            tx.commit().await?;

            return Ok(value);
        }

        let current = self.repository.get_tenant(&mut tx, tenant).await?;

        tx.commit().await?;

        let current = current.ok_or(TenantsServiceError::NotFound)?;

        Err(rejected_adjustment(&current, counter, delta))
    }

    async fn update_plan(
        &self,
        tenant: TenantUuid,
        plan: Plan,
    ) -> Result<Tenant, TenantsServiceError> {
        let defaults = plan.defaults();
        let mut tx = self.db.begin().await?;

        let updated = self
            .repository
            .update_plan(&mut tx, tenant, plan, defaults.features, defaults.limits)
            .await?;

        tx.commit().await?;

        updated.ok_or(TenantsServiceError::NotFound)
    }
}

/// Why a counter update against the tenant's current state matched nothing.
pub(crate) fn rejected_adjustment(
    tenant: &Tenant,
    counter: Counter,
    delta: i64,
) -> TenantsServiceError {
    let current = tenant.counter(counter);

    if current.saturating_add(delta) < 0 {
        return TenantsServiceError::CounterUnderflow {
            resource: counter.resource(),
            current,
            delta,
        };
    }

    limit_exceeded(tenant, counter, delta).into()
}

/// Describe an increment past the tenant's limit.
pub(crate) fn limit_exceeded(tenant: &Tenant, counter: Counter, delta: i64) -> LimitExceeded {
    let resource = counter.resource();
    let current = tenant.counter(counter);

    tenant
        .limits
        .check(resource, current, delta)
        .err()
        .unwrap_or(LimitExceeded {
            resource,
            current,
            requested: delta,
            limit: match tenant.limits.get(resource) {
                Limit::Bounded(limit) => limit,
                Limit::Unlimited => current,
            },
        })
}
