//! Users Repository

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use smallvec::SmallVec;
use sqlx::{FromRow, Postgres, Row, Transaction, postgres::PgRow, query, query_as};
use tenantry::access::RoleGraph;
use uuid::Uuid;

use crate::{
    database::{optional_timestamp, parse_column},
    domain::{
        tenants::models::TenantUuid,
        users::models::{Lockout, NewUser, TwoFactorConfirmation, User, UserUuid},
    },
};

const CREATE_USER_SQL: &str = include_str!("sql/create_user.sql");
const ASSIGN_ROLES_SQL: &str = include_str!("sql/assign_roles.sql");
const GET_USER_SQL: &str = include_str!("sql/get_user.sql");
const FIND_USER_BY_EMAIL_SQL: &str = include_str!("sql/find_user_by_email.sql");
const ROLE_PERMISSIONS_SQL: &str = include_str!("sql/role_permissions.sql");
const RECORD_LOGIN_FAILURE_SQL: &str = include_str!("sql/record_login_failure.sql");
const RECORD_LOGIN_SUCCESS_SQL: &str = include_str!("sql/record_login_success.sql");
const RECORD_TWO_FACTOR_FAILURE_SQL: &str = include_str!("sql/record_two_factor_failure.sql");
const SET_TWO_FACTOR_SECRET_SQL: &str = include_str!("sql/set_two_factor_secret.sql");
const CONFIRM_TWO_FACTOR_SQL: &str = include_str!("sql/confirm_two_factor.sql");
const CONSUME_RECOVERY_CODE_SQL: &str = include_str!("sql/consume_recovery_code.sql");
const UPDATE_PASSWORD_SQL: &str = include_str!("sql/update_password.sql");
const ACCEPT_TWO_FACTOR_STEP_SQL: &str = include_str!("sql/accept_two_factor_step.sql");
const MARK_EMAIL_VERIFIED_SQL: &str = include_str!("sql/mark_email_verified.sql");
const LOCK_ACTIVE_ADMINS_SQL: &str = include_str!("sql/lock_active_admins.sql");
const SET_USER_STATUS_SQL: &str = include_str!("sql/set_user_status.sql");
const SOFT_DELETE_USER_SQL: &str = include_str!("sql/soft_delete_user.sql");

#[derive(Debug, Clone, Default)]
pub(crate) struct PgUsersRepository;

impl PgUsersRepository {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self
    }

    /// Insert the user and grant the requested roles. Returns how many roles were granted.
    pub(crate) async fn create_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: &NewUser,
    ) -> Result<u64, sqlx::Error> {
        query(CREATE_USER_SQL)
            .bind(user.uuid.into_uuid())
            .bind(tenant.into_uuid())
            .bind(&user.name)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(user.status.as_str())
            .bind(user.is_super_admin)
            .bind(user.must_change_password)
            .bind(user.email_verified_at.map(SqlxTimestamp::from))
            .execute(&mut **tx)
            .await?;

        let granted = query(ASSIGN_ROLES_SQL)
            .bind(user.uuid.into_uuid())
            .bind(&user.roles)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(granted)
    }

    pub(crate) async fn get_user(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
    ) -> Result<Option<User>, sqlx::Error> {
        query_as::<Postgres, User>(GET_USER_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn find_by_email(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        email: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        query_as::<Postgres, User>(FIND_USER_BY_EMAIL_SQL)
            .bind(email)
            .bind(tenant.into_uuid())
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn role_graph(
        &self,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<RoleGraph, sqlx::Error> {
        let grants: Vec<(String, String)> = query_as(ROLE_PERMISSIONS_SQL)
            .fetch_all(&mut **tx)
            .await?;

        let mut graph = RoleGraph::new();

        for (role, permission) in grants {
            graph.grant(&role, &permission);
        }

        Ok(graph)
    }

    pub(crate) async fn record_login_failure(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        lockout: Lockout,
        now: Timestamp,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar(RECORD_LOGIN_FAILURE_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(threshold(lockout))
            .bind(SqlxTimestamp::from(lockout.until(now)))
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn record_login_success(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        at: Timestamp,
        ip: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(RECORD_LOGIN_SUCCESS_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .bind(ip)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn record_two_factor_failure(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        lockout: Lockout,
        now: Timestamp,
    ) -> Result<Option<i32>, sqlx::Error> {
        sqlx::query_scalar(RECORD_TWO_FACTOR_FAILURE_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(threshold(lockout))
            .bind(SqlxTimestamp::from(lockout.until(now)))
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn set_two_factor_secret(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        secret: Option<&str>,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(SET_TWO_FACTOR_SECRET_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(secret)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn confirm_two_factor(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        confirmation: &TwoFactorConfirmation,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(CONFIRM_TWO_FACTOR_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(confirmation.confirmed_at))
            .bind(&confirmation.recovery_code_hashes)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn consume_recovery_code(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        code_hash: &str,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(CONSUME_RECOVERY_CODE_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(code_hash)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn update_password(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        password_hash: &str,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(UPDATE_PASSWORD_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(password_hash)
            .bind(SqlxTimestamp::from(at))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    /// Returns 1 when `step` is newer than the last accepted one.
    pub(crate) async fn accept_two_factor_step(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        step: i64,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(ACCEPT_TWO_FACTOR_STEP_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(step)
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn mark_email_verified(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(MARK_EMAIL_VERIFIED_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    /// Lock the tenant's active admins for the rest of the transaction.
    pub(crate) async fn lock_active_admins(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
    ) -> Result<Vec<UserUuid>, sqlx::Error> {
        let admins: Vec<Uuid> = sqlx::query_scalar(LOCK_ACTIVE_ADMINS_SQL)
            .bind(tenant.into_uuid())
            .fetch_all(&mut **tx)
            .await?;

        Ok(admins.into_iter().map(UserUuid::from_uuid).collect())
    }

    pub(crate) async fn set_status(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        status: &str,
    ) -> Result<Option<User>, sqlx::Error> {
        query_as::<Postgres, User>(SET_USER_STATUS_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(status)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn soft_delete(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tenant: TenantUuid,
        user: UserUuid,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(SOFT_DELETE_USER_SQL)
            .bind(user.into_uuid())
            .bind(tenant.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}

fn threshold(lockout: Lockout) -> i32 {
    i32::try_from(lockout.threshold).unwrap_or(i32::MAX)
}

fn counter(row: &PgRow, column: &str) -> sqlx::Result<u32> {
    u32::try_from(row.try_get::<i32, _>(column)?).map_err(|e| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(e),
    })
}

impl<'r> FromRow<'r, PgRow> for User {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            uuid: UserUuid::from_uuid(row.try_get("uuid")?),
            tenant: TenantUuid::from_uuid(row.try_get("tenant_uuid")?),
            name: row.try_get("name")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            status: parse_column(row, "status")?,
            is_super_admin: row.try_get("is_super_admin")?,
            failed_login_attempts: counter(row, "failed_login_attempts")?,
            locked_until: optional_timestamp(row, "locked_until")?,
            two_factor_secret: row.try_get("two_factor_secret")?,
            two_factor_confirmed_at: optional_timestamp(row, "two_factor_confirmed_at")?,
            two_factor_recovery_codes: row.try_get("two_factor_recovery_codes")?,
            two_factor_failed_attempts: counter(row, "two_factor_failed_attempts")?,
            two_factor_locked_until: optional_timestamp(row, "two_factor_locked_until")?,
            two_factor_last_step: row.try_get("two_factor_last_step")?,
            password_changed_at: optional_timestamp(row, "password_changed_at")?,
            must_change_password: row.try_get("must_change_password")?,
            email_verified_at: optional_timestamp(row, "email_verified_at")?,
            last_login_at: optional_timestamp(row, "last_login_at")?,
            last_login_ip: row.try_get("last_login_ip")?,
            roles: row
                .try_get::<Vec<String>, _>("roles")?
                .into_iter()
                .collect::<SmallVec<_>>(),
            created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
            updated_at: row.try_get::<SqlxTimestamp, _>("updated_at")?.to_jiff(),
            deleted_at: optional_timestamp(row, "deleted_at")?,
        })
    }
}
