use clap::Args;
use tenantry_app::{config::AppConfig, context::AppContext};

#[derive(Debug, Args)]
pub(crate) struct VerifyTenantArgs {
    #[command(flatten)]
    config: AppConfig,

    /// Verification token from the welcome message
    #[arg(long, env = "TENANT_VERIFICATION_TOKEN", hide_env_values = true)]
    token: String,
}

pub(crate) async fn run(args: VerifyTenantArgs) -> Result<(), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    let tenant = app
        .lifecycle
        .verify(&args.token)
        .await
        .map_err(|error| format!("failed to verify tenant: {error}"))?;

    println!("tenant {} is {}", tenant.uuid, tenant.status);

    Ok(())
}
