use clap::{Args, Subcommand};

mod bootstrap;
mod status;

#[derive(Debug, Args)]
pub(crate) struct SetupCommand {
    #[command(subcommand)]
    command: SetupSubcommand,
}

#[derive(Debug, Subcommand)]
enum SetupSubcommand {
    /// Report whether the platform has a super-admin
    Status(status::StatusArgs),

    /// Create the system tenant and the first super-admin
    Bootstrap(bootstrap::BootstrapArgs),
}

pub(crate) async fn run(command: SetupCommand) -> Result<(), String> {
    match command.command {
        SetupSubcommand::Status(args) => status::run(args).await,
        SetupSubcommand::Bootstrap(args) => bootstrap::run(args).await,
    }
}
