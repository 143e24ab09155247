//! Activity log
//!
//! One sink for every auditable operation. Writers call [`AuditSink::record`] uniformly; a
//! failed write is logged and never aborts the operation it describes.

use async_trait::async_trait;
use jiff::Timestamp;
use jiff_sqlx::Timestamp as SqlxTimestamp;
use mockall::automock;
use serde_json::Value;
use sqlx::{PgPool, query, types::Json};
use tenantry::access::Principal;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::{domain::tenants::models::TenantUuid, uuids::TypedUuid};

const RECORD_EVENT_SQL: &str = include_str!("sql/record_event.sql");

/// Audit Event marker
pub struct AuditEntry;

/// Audit event UUID
pub type AuditEventUuid = TypedUuid<AuditEntry>;

/// Who performed an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    /// Scheduled or internal work.
    System,

    /// Command-line operator.
    Operator(String),

    /// Authenticated user, possibly impersonated.
    User {
        user: Uuid,
        impersonator: Option<Uuid>,
    },
}

impl Actor {
    #[must_use]
    pub fn from_principal(principal: &Principal) -> Self {
        Self::User {
            user: principal.user,
            impersonator: principal.impersonator,
        }
    }

    const fn kind(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Operator(_) => "operator",
            Self::User { .. } => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub actor: Actor,
    pub tenant: Option<TenantUuid>,
    pub action: &'static str,
    pub subject: Option<String>,
    pub properties: Value,
}

impl AuditEvent {
    #[must_use]
    pub fn new(actor: Actor, action: &'static str) -> Self {
        Self {
            actor,
            tenant: None,
            action,
            subject: None,
            properties: Value::Object(serde_json::Map::new()),
        }
    }

    #[must_use]
    pub fn tenant(mut self, tenant: TenantUuid) -> Self {
        self.tenant = Some(tenant);
        self
    }

    #[must_use]
    pub fn subject(mut self, subject: impl ToString) -> Self {
        self.subject = Some(subject.to_string());
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: Value) -> Self {
        self.properties = properties;
        self
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("storage error")]
    Sql(#[from] sqlx::Error),
}

#[automock]
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent, at: Timestamp) -> Result<(), AuditError>;
}

/// Record an event, logging instead of failing when the sink rejects it.
pub async fn record(sink: &dyn AuditSink, event: AuditEvent, at: Timestamp) {
    let action = event.action;

    if let Err(source) = sink.record(event, at).await {
        error!(action, error = %source, "failed to record audit event");
    }
}

#[derive(Debug, Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, event: AuditEvent, at: Timestamp) -> Result<(), AuditError> {
        let (actor_uuid, actor_label, impersonator) = match &event.actor {
            Actor::System => (None, None, None),
            Actor::Operator(label) => (None, Some(label.clone()), None),
            Actor::User { user, impersonator } => (Some(*user), None, *impersonator),
        };

        query(RECORD_EVENT_SQL)
            .bind(AuditEventUuid::new().into_uuid())
            .bind(event.actor.kind())
            .bind(actor_uuid)
            .bind(actor_label)
            .bind(impersonator)
            .bind(event.tenant.map(TenantUuid::into_uuid))
            .bind(event.action)
            .bind(event.subject)
            .bind(Json(event.properties))
            .bind(SqlxTimestamp::from(at))
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn builder_sets_tenant_subject_and_properties() {
        let tenant = TenantUuid::new();

        let event = AuditEvent::new(Actor::System, "tenant.suspended")
            .tenant(tenant)
            .subject("billing")
            .properties(json!({ "reason": "payment failed" }));

        assert_eq!(event.tenant, Some(tenant));
        assert_eq!(event.subject.as_deref(), Some("billing"));
        assert_eq!(event.properties["reason"], "payment failed");
    }

    #[tokio::test]
    async fn record_swallows_sink_failures() {
        let mut sink = MockAuditSink::new();

        sink.expect_record()
            .times(1)
            .returning(|_, _| Err(AuditError::Sql(sqlx::Error::PoolTimedOut)));

        record(
            &sink,
            AuditEvent::new(Actor::Operator("cli".to_string()), "tenant.deleted"),
            Timestamp::UNIX_EPOCH,
        )
        .await;
    }
}
