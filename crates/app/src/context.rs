//! App Context

use std::sync::Arc;

use thiserror::Error;

use crate::{
    audit::PgAuditSink,
    clock::SystemClock,
    config::AppConfig,
    database::{self, Db, TenantConnections},
    domain::{
        Collaborators,
        access::AccessControl,
        auth::{AuthSession, AuthSettings, PgEmailVerificationStore, PgResetTokenStore},
        bootstrap::{PgBootstrapStore, SuperAdminBootstrap},
        impersonation::{ImpersonationBroker, ImpersonationSettings, PgImpersonationStore},
        provisioning::PgDatabaseProvisioner,
        tenants::{PgTenantStore, TenantLifecycle},
        users::PgUserStore,
    },
    mailer::LogMailer,
    passwords::Argon2Hasher,
    rate_limits::{PgRateLimitStore, RateLimiter},
};

#[derive(Debug, Error)]
pub enum AppInitError {
    #[error("failed to connect to database")]
    Database(#[source] sqlx::Error),

    #[error("failed to apply central migrations")]
    Migrate(#[source] sqlx::migrate::MigrateError),
}

/// The services, wired against `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct AppContext {
    pub db: Db,
    pub connections: Arc<TenantConnections>,
    pub lifecycle: TenantLifecycle,
    pub access: AccessControl,
    pub auth: AuthSession,
    pub impersonation: ImpersonationBroker,
    pub bootstrap: SuperAdminBootstrap,
}

impl AppContext {
    /// Connect to the central database, apply its migrations and build every service.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be reached or migrated.
    pub async fn from_config(config: &AppConfig) -> Result<Self, AppInitError> {
        let pool = database::connect(&config.database.database_url)
            .await
            .map_err(AppInitError::Database)?;

        database::migrate_central(&pool)
            .await
            .map_err(AppInitError::Migrate)?;

        let connections = Arc::new(
            TenantConnections::from_url(
                pool.clone(),
                &config.database.database_url,
                config.database.tenant_pool_max_connections,
            )
            .map_err(AppInitError::Database)?,
        );

        let db = Db::new(pool.clone());
        let clock = Arc::new(SystemClock);

        let collaborators = Collaborators {
            clock: clock.clone(),
            hasher: Arc::new(Argon2Hasher::default()),
            mailer: Arc::new(LogMailer),
            audit: Arc::new(PgAuditSink::new(pool.clone())),
        };

        let tenants = Arc::new(PgTenantStore::new(db.clone()));
        let users = Arc::new(PgUserStore::new(connections.clone()));

        Ok(Self {
            lifecycle: TenantLifecycle::new(
                tenants.clone(),
                users.clone(),
                Arc::new(PgDatabaseProvisioner::new(
                    connections.clone(),
                    config.database.provisioning_timeout(),
                )),
                collaborators.clone(),
                config.tenancy.clone(),
            ),
            access: AccessControl::new(tenants.clone(), users.clone(), collaborators.clone()),
            auth: AuthSession::new(
                tenants.clone(),
                users.clone(),
                Arc::new(PgResetTokenStore::new(connections.clone())),
                Arc::new(PgEmailVerificationStore::new(connections.clone())),
                RateLimiter::new(Arc::new(PgRateLimitStore::new(pool)), clock),
                collaborators.clone(),
                AuthSettings::from(&config.security),
            ),
            impersonation: ImpersonationBroker::new(
                Arc::new(PgImpersonationStore::new(db.clone())),
                tenants,
                users,
                collaborators.clone(),
                ImpersonationSettings::from(&config.security),
            ),
            bootstrap: SuperAdminBootstrap::new(
                Arc::new(PgBootstrapStore::new(db.clone())),
                collaborators,
                config.tenancy.clone(),
                config.security.setup_key.clone(),
            ),
            db,
            connections,
        })
    }
}
