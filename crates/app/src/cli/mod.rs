use clap::{Parser, Subcommand};
use tenantry_app::config::LoggingConfig;

mod db;
mod impersonation;
mod setup;
mod tenant;

#[derive(Debug, Parser)]
#[command(name = "tenantry-app", about = "Tenantry CLI", long_about = None)]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) logging: LoggingConfig,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Db(db::DbCommand),
    Setup(setup::SetupCommand),
    Tenant(tenant::TenantCommand),
    Impersonation(impersonation::ImpersonationCommand),
}

impl Cli {
    pub(crate) async fn run(self) -> Result<(), String> {
        match self.command {
            Commands::Db(command) => db::run(command).await,
            Commands::Setup(command) => setup::run(command).await,
            Commands::Tenant(command) => tenant::run(command).await,
            Commands::Impersonation(command) => impersonation::run(command).await,
        }
    }
}
