//! Impersonation Tokens Repository

use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use serde_json::Value;
use sqlx::{FromRow, Postgres, Row, Transaction, postgres::PgRow, query, query_as, types::Json};
use uuid::Uuid;

use crate::{
    database::{optional_timestamp, parse_column},
    domain::{
        impersonation::models::{
            ImpersonationToken, ImpersonationTokenUuid, NewImpersonationToken,
        },
        tenants::models::TenantUuid,
        users::models::UserUuid,
    },
};

const CREATE_TOKEN_SQL: &str = include_str!("sql/create_token.sql");
const REDEEM_TOKEN_SQL: &str = include_str!("sql/redeem_token.sql");
const FIND_TOKEN_BY_HASH_SQL: &str = include_str!("sql/find_token_by_hash.sql");
const GET_TOKEN_SQL: &str = include_str!("sql/get_token.sql");
const MARK_EXPIRED_SQL: &str = include_str!("sql/mark_expired.sql");
const REVOKE_TOKEN_SQL: &str = include_str!("sql/revoke_token.sql");
const APPEND_AUDIT_SQL: &str = include_str!("sql/append_audit.sql");
const SWEEP_EXPIRED_SQL: &str = include_str!("sql/sweep_expired.sql");

#[derive(Debug, Clone, Default)]
pub(crate) struct PgImpersonationRepository;

impl PgImpersonationRepository {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self
    }

    pub(crate) async fn create_token(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: NewImpersonationToken,
    ) -> Result<ImpersonationToken, sqlx::Error> {
        query_as::<Postgres, ImpersonationToken>(CREATE_TOKEN_SQL)
            .bind(token.uuid.into_uuid())
            .bind(token.token_hash)
            .bind(token.tenant.into_uuid())
            .bind(token.target_user.into_uuid())
            .bind(token.impersonator.into_uuid())
            .bind(i32::try_from(token.max_uses).unwrap_or(i32::MAX))
            .bind(token.single_use)
            .bind(SqlxTimestamp::from(token.expires_at))
            .bind(
                token
                    .max_duration_minutes
                    .map(|minutes| i32::try_from(minutes).unwrap_or(i32::MAX)),
            )
            .bind(token.reason)
            .bind(token.ip_address)
            .bind(token.user_agent)
            .bind(token.session_id)
            .bind(SqlxTimestamp::from(token.created_at))
            .fetch_one(&mut **tx)
            .await
    }

    pub(crate) async fn redeem(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
        now: Timestamp,
    ) -> Result<Option<ImpersonationToken>, sqlx::Error> {
        query_as::<Postgres, ImpersonationToken>(REDEEM_TOKEN_SQL)
            .bind(token_hash)
            .bind(SqlxTimestamp::from(now))
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn find_by_hash(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_hash: &str,
    ) -> Result<Option<ImpersonationToken>, sqlx::Error> {
        query_as::<Postgres, ImpersonationToken>(FIND_TOKEN_BY_HASH_SQL)
            .bind(token_hash)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn get_token(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: ImpersonationTokenUuid,
    ) -> Result<Option<ImpersonationToken>, sqlx::Error> {
        query_as::<Postgres, ImpersonationToken>(GET_TOKEN_SQL)
            .bind(token.into_uuid())
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn mark_expired(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: ImpersonationTokenUuid,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(MARK_EXPIRED_SQL)
            .bind(token.into_uuid())
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn revoke(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: ImpersonationTokenUuid,
        revoked_by: UserUuid,
        reason: &str,
        at: Timestamp,
    ) -> Result<Option<ImpersonationToken>, sqlx::Error> {
        query_as::<Postgres, ImpersonationToken>(REVOKE_TOKEN_SQL)
            .bind(token.into_uuid())
            .bind(SqlxTimestamp::from(at))
            .bind(revoked_by.into_uuid())
            .bind(reason)
            .fetch_optional(&mut **tx)
            .await
    }

    pub(crate) async fn append_audit(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token: ImpersonationTokenUuid,
        entry: Value,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(APPEND_AUDIT_SQL)
            .bind(token.into_uuid())
            .bind(Json(entry))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    pub(crate) async fn sweep_expired(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        now: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let rows_affected = query(SWEEP_EXPIRED_SQL)
            .bind(SqlxTimestamp::from(now))
            .execute(&mut **tx)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}

fn count_column(row: &PgRow, column: &str) -> sqlx::Result<u32> {
    u32::try_from(row.try_get::<i32, _>(column)?).map_err(|error| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(error),
    })
}

impl<'r> FromRow<'r, PgRow> for ImpersonationToken {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        Ok(Self {
            uuid: ImpersonationTokenUuid::from_uuid(row.try_get("uuid")?),
            token_hash: row.try_get("token_hash")?,
            tenant: TenantUuid::from_uuid(row.try_get("tenant_uuid")?),
            target_user: UserUuid::from_uuid(row.try_get("target_user_uuid")?),
            impersonator: UserUuid::from_uuid(row.try_get("impersonator_uuid")?),
            status: parse_column(row, "status")?,
            max_uses: count_column(row, "max_uses")?,
            used_count: count_column(row, "used_count")?,
            single_use: row.try_get("single_use")?,
            expires_at: row.try_get::<SqlxTimestamp, _>("expires_at")?.to_jiff(),
            max_duration_minutes: row
                .try_get::<Option<i32>, _>("max_duration_minutes")?
                .map(i64::from),
            reason: row.try_get("reason")?,
            ip_address: row.try_get("ip_address")?,
            user_agent: row.try_get("user_agent")?,
            session_id: row.try_get("session_id")?,
            used_at: optional_timestamp(row, "used_at")?,
            revoked_at: optional_timestamp(row, "revoked_at")?,
            revoked_by: row
                .try_get::<Option<Uuid>, _>("revoked_by")?
                .map(UserUuid::from_uuid),
            revoke_reason: row.try_get("revoke_reason")?,
            audit_log: row.try_get::<Json<Value>, _>("audit_log")?.0,
            created_at: row.try_get::<SqlxTimestamp, _>("created_at")?.to_jiff(),
        })
    }
}
