//! Attempt rate limiting backed by the central store.

use std::sync::Arc;

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use mockall::automock;
use sqlx::{FromRow, PgPool, Postgres, Row, postgres::PgRow, query, query_as};
use tenantry::rate_limit::{AttemptWindow, RateLimitCheck, RateLimitKey, RateLimitPolicy};
use thiserror::Error;

use crate::clock::Clock;

const GET_WINDOW_SQL: &str = include_str!("sql/get_window.sql");
const HIT_SQL: &str = include_str!("sql/hit.sql");
const CLEAR_SQL: &str = include_str!("sql/clear.sql");

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("storage error")]
    Sql(#[from] sqlx::Error),
}

#[automock]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Current window for a key, if any.
    async fn window(&self, key: &RateLimitKey) -> Result<Option<AttemptWindow>, RateLimitError>;

    /// Atomically record one failure and return the updated window.
    async fn hit(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
        now: Timestamp,
    ) -> Result<AttemptWindow, RateLimitError>;

    /// Forget a key.
    async fn clear(&self, key: &RateLimitKey) -> Result<(), RateLimitError>;
}

/// Policy evaluation over a [`RateLimitStore`].
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(store: Arc<dyn RateLimitStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Evaluate a key without recording anything.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be read.
    pub async fn check(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
    ) -> Result<RateLimitCheck, RateLimitError> {
        let window = self.store.window(key).await?;

        Ok(policy.check(window.as_ref(), self.clock.now()))
    }

    /// Record one failure.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be written.
    pub async fn hit(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
    ) -> Result<AttemptWindow, RateLimitError> {
        self.store.hit(key, policy, self.clock.now()).await
    }

    /// Clear a key after a successful attempt.
    ///
    /// # Errors
    ///
    /// Returns an error when the store cannot be written.
    pub async fn clear(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        self.store.clear(key).await
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct PgRateLimitStore {
    pool: PgPool,
}

impl PgRateLimitStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct WindowRow(AttemptWindow);

impl<'r> FromRow<'r, PgRow> for WindowRow {
    fn from_row(row: &'r PgRow) -> sqlx::Result<Self> {
        let attempts = u32::try_from(row.try_get::<i32, _>("attempts")?).map_err(|e| {
            sqlx::Error::ColumnDecode {
                index: "attempts".to_string(),
                source: Box::new(e),
            }
        })?;

        Ok(Self(AttemptWindow {
            attempts,
            resets_at: row.try_get::<SqlxTimestamp, _>("resets_at")?.to_jiff(),
        }))
    }
}

#[async_trait]
impl RateLimitStore for PgRateLimitStore {
    async fn window(&self, key: &RateLimitKey) -> Result<Option<AttemptWindow>, RateLimitError> {
        let row = query_as::<Postgres, WindowRow>(GET_WINDOW_SQL)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.0))
    }

    async fn hit(
        &self,
        key: &RateLimitKey,
        policy: RateLimitPolicy,
        now: Timestamp,
    ) -> Result<AttemptWindow, RateLimitError> {
        let resets_at = policy.hit(None, now).resets_at;

        let row = query_as::<Postgres, WindowRow>(HIT_SQL)
            .bind(key.as_str())
            .bind(SqlxTimestamp::from(now))
            .bind(SqlxTimestamp::from(resets_at))
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0)
    }

    async fn clear(&self, key: &RateLimitKey) -> Result<(), RateLimitError> {
        query(CLEAR_SQL).bind(key.as_str()).execute(&self.pool).await?;

        Ok(())
    }
}
