use clap::{Args, Subcommand};
use tenantry_app::{config::AppConfig, context::AppContext};

#[derive(Debug, Args)]
pub(crate) struct ImpersonationCommand {
    #[command(subcommand)]
    command: ImpersonationSubcommand,
}

#[derive(Debug, Subcommand)]
enum ImpersonationSubcommand {
    /// Mark past-due impersonation tokens expired
    Sweep(SweepArgs),
}

#[derive(Debug, Args)]
pub(crate) struct SweepArgs {
    #[command(flatten)]
    config: AppConfig,
}

pub(crate) async fn run(command: ImpersonationCommand) -> Result<(), String> {
    match command.command {
        ImpersonationSubcommand::Sweep(args) => sweep(args).await,
    }
}

async fn sweep(args: SweepArgs) -> Result<(), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    let swept = app
        .impersonation
        .sweep_expired()
        .await
        .map_err(|error| format!("failed to sweep tokens: {error}"))?;

    println!("expired {swept} impersonation token(s)");

    Ok(())
}
