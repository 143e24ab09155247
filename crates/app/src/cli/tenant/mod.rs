use clap::{Args, Subcommand};

mod availability;
mod register;
mod status;
mod verify;

#[derive(Debug, Args)]
pub(crate) struct TenantCommand {
    #[command(subcommand)]
    command: TenantSubcommand,
}

#[derive(Debug, Subcommand)]
enum TenantSubcommand {
    /// Register a tenant, provision its database and create its admin
    Register(register::RegisterTenantArgs),

    /// Check whether a name is free
    Availability(availability::AvailabilityArgs),

    /// Activate a pending tenant with its welcome verification token
    Verify(verify::VerifyTenantArgs),

    /// Activate a pending or suspended tenant
    Activate(status::TenantArgs),

    /// Suspend an active tenant
    Suspend(status::SuspendTenantArgs),

    /// Drop a tenant's database and soft-delete it
    Delete(status::TenantArgs),
}

pub(crate) async fn run(command: TenantCommand) -> Result<(), String> {
    match command.command {
        TenantSubcommand::Register(args) => register::run(args).await,
        TenantSubcommand::Availability(args) => availability::run(args).await,
        TenantSubcommand::Verify(args) => verify::run(args).await,
        TenantSubcommand::Activate(args) => status::activate(args).await,
        TenantSubcommand::Suspend(args) => status::suspend(args).await,
        TenantSubcommand::Delete(args) => status::delete(args).await,
    }
}
