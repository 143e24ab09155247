//! Tenants Repository

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use serde_json::Value;
use sqlx::{
    FromRow, Postgres, Row, Transaction, postgres::PgRow, query, query_as, query_scalar,
    types::Json,
};
use tenantry::{
    limits::Limits,
    plans::{Features, Plan},
};

use crate::{
    database::{optional_timestamp, parse_column},
    domain::tenants::models::{
        Counter, DomainUuid, NewTenant, Tenant, TenantSettings, TenantUuid,
    },
};

const CREATE_TENANT_SQL: &str = include_str!("sql/create_tenant.sql");
const CREATE_DOMAIN_SQL: &str = include_str!("sql/create_domain.sql");
const GET_TENANT_SQL: &str = include_str!("sql/get_tenant.sql");
const FIND_TENANT_BY_DOMAIN_SQL: &str = include_str!("sql/find_tenant_by_domain.sql");
const GET_SYSTEM_TENANT_SQL: &str = include_str!("sql/get_system_tenant.sql");
const SLUG_TAKEN_SQL: &str = include_str!("sql/slug_taken.sql");
const DOMAIN_TAKEN_SQL: &str = include_str!("sql/domain_taken.sql");
const ADMIN_EMAIL_TAKEN_SQL: &str = include_str!("sql/admin_email_taken.sql");
const MARK_MIGRATED_SQL: &str = include_str!("sql/mark_migrated.sql");
const ACTIVATE_TENANT_SQL: &str = include_str!("sql/activate_tenant.sql");
const SUSPEND_TENANT_SQL: &str = include_str!("sql/suspend_tenant.sql");
const SOFT_DELETE_TENANT_SQL: &str = include_str!("sql/soft_delete_tenant.sql");
const PURGE_TENANT_SQL: &str = include_str!("sql/purge_tenant.sql");
const STORE_VERIFICATION_TOKEN_SQL: &str = include_str!("sql/store_verification_token.sql");
const CONSUME_VERIFICATION_TOKEN_SQL: &str = include_str!("sql/consume_verification_token.sql");
const UPDATE_PLAN_SQL: &str = include_str!("sql/update_plan.sql");
const ADJUST_USER_COUNT_SQL: &str = include_str!("sql/adjust_user_count.sql");
const ADJUST_STORAGE_USED_SQL: &str = include_str!("sql/adjust_storage_used.sql");
const ADJUST_API_CALLS_SQL: &str = include_str!("sql/adjust_api_calls.sql");

#[derive(Debug, Clone, Default)]
pub(crate) struct PgTenantsRepository;

impl PgTenantsRepository {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) async fn create_tenant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: NewTenant,
    ) -> Result<Tenant, sqlx::Error> {
        query_as::<Postgres, Tenant>(CREATE_TENANT_SQL)
            .bind(tenant.uuid.into_uuid())
            .bind(tenant.name)
            .bind(tenant.slug)
            .bind(tenant.domain)
            .bind(tenant.database_name)
            .bind(tenant.plan.as_str())
            .bind(tenant.status.as_str())
            .bind(tenant.admin_email)
            .bind(tenant.admin_name)
            .bind(Json(tenant.settings))
            .bind(Json(tenant.features))
            .bind(Json(tenant.limits))
            .bind(tenant.is_system)
            .fetch_one(&mut **tx)
            .await
    }

    pub(crate) async fn create_primary_domain(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        domain: &str,
    ) -> Result<DomainUuid, sqlx::Error> {
        let uuid = DomainUuid::new();

        query(CREATE_DOMAIN_SQL)
            .bind(uuid.into_uuid())
            .bind(tenant.into_uuid())
            .bind(domain)
            .bind("primary")
            .bind(true)
            .execute(&mut **tx)
            .await?;

        Ok(uuid)
    }

    pub(crate) async fn get_tenant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        query_as::<Postgres, Tenant>(GET_TENANT_SQL)
            .bind(tenant.into_uuid())
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn find_by_domain(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        domain: &str,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        query_as::<Postgres, Tenant>(FIND_TENANT_BY_DOMAIN_SQL)
            .bind(domain)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn system_tenant(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        query_as::<Postgres, Tenant>(GET_SYSTEM_TENANT_SQL)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn slug_taken(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        slug: &str,
    ) -> Result<bool, sqlx::Error> {
        query_scalar(SLUG_TAKEN_SQL)
            .bind(slug)
            .fetch_one(&mut **tx)
            .await
    }

    pub(crate) async fn domain_taken(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        domain: &str,
    ) -> Result<bool, sqlx::Error> {
        query_scalar(DOMAIN_TAKEN_SQL)
            .bind(domain)
            .fetch_one(&mut **tx)
            .await
    }

    pub(crate) async fn admin_email_taken(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        email: &str,
    ) -> Result<bool, sqlx::Error> {
        query_scalar(ADMIN_EMAIL_TAKEN_SQL)
            .bind(email)
            .fetch_one(&mut **tx)
            .await
    }

    pub(crate) async fn mark_migrated(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(MARK_MIGRATED_SQL)
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn activate(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        at: Timestamp,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        query_as::<Postgres, Tenant>(ACTIVATE_TENANT_SQL)
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn suspend(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        at: Timestamp,
        reason: &str,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        query_as::<Postgres, Tenant>(SUSPEND_TENANT_SQL)
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .bind(reason)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn soft_delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(SOFT_DELETE_TENANT_SQL)
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn purge(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(PURGE_TENANT_SQL)
            .bind(tenant.into_uuid())
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn store_verification_token(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        token_hash: &str,
    ) -> Result<(), sqlx::Error> {
        query(STORE_VERIFICATION_TOKEN_SQL)
            .bind(tenant.into_uuid())
            .bind(token_hash)
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    /// Delete the token if it belongs to a live pending tenant, returning that tenant.
    pub(crate) async fn consume_verification_token(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
    ) -> Result<Option<TenantUuid>, sqlx::Error> {
        let tenant: Option<uuid::Uuid> = query_scalar(CONSUME_VERIFICATION_TOKEN_SQL)
            .bind(token_hash)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(tenant.map(TenantUuid::from_uuid))
    }

    /// Apply `delta` if the result stays within the tenant's limit. `None` when the tenant is
    /// missing or the limit would be exceeded.
    pub(crate) async fn adjust_counter(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        counter: Counter,
        delta: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let sql = match counter {
            Counter::Users => ADJUST_USER_COUNT_SQL,
            Counter::Storage => ADJUST_STORAGE_USED_SQL,
            Counter::ApiCalls => ADJUST_API_CALLS_SQL,
        };

        query_scalar(sql)
            .bind(tenant.into_uuid())
            .bind(delta)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn update_plan(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        plan: Plan,
        features: Features,
        limits: Limits,
    ) -> Result<Option<Tenant>, sqlx::Error> {
        query_as::<Postgres, Tenant>(UPDATE_PLAN_SQL)
            .bind(tenant.into_uuid())
            .bind(plan.as_str())
            .bind(Json(features))
            .bind(Json(limits))
            .fetch_optional(&mut **tx)
            .await
    }
}

impl<'r> FromRow<'r, PgRow> for Tenant {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            uuid: TenantUuid::from_uuid(row.try_get("uuid")?),
            name: row.try_get("name")?,
            slug: row.try_get("slug")?,
            domain: row.try_get("domain")?,
            database_name: row.try_get("database_name")?,
            migrated_at: optional_timestamp(row, "migrated_at")?,
            plan: parse_column(row, "plan")?,
            plan_expires_at: optional_timestamp(row, "plan_expires_at")?,
            monthly_revenue_cents: row.try_get("monthly_revenue_cents")?,
            status: parse_column(row, "status")?,
            activated_at: optional_timestamp(row, "activated_at")?,
            suspended_at: optional_timestamp(row, "suspended_at")?,
            suspension_reason: row.try_get("suspension_reason")?,
            admin_email: row.try_get("admin_email")?,
            admin_name: row.try_get("admin_name")?,
            settings: row.try_get::<Json<TenantSettings>, _>("settings")?.0,
            features: row.try_get::<Json<Features>, _>("features")?.0,
            limits: row.try_get::<Json<Limits>, _>("limits")?.0,
            metadata: row.try_get::<Json<Value>, _>("metadata")?.0,
            user_count: row.try_get("user_count")?,
            storage_used: row.try_get("storage_used")?,
            api_calls_count: row.try_get("api_calls_count")?,
            is_system: row.try_get("is_system")?,
            created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
            updated_at: row.try_get::<SqlxTimestamp, _>("updated_at")?.to_jiff(),
            deleted_at: optional_timestamp(row, "deleted_at")?,
        })
    }
}
