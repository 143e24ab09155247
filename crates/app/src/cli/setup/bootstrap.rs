use clap::Args;
use tenantry_app::{
    config::AppConfig, context::AppContext, domain::bootstrap::models::BootstrapRequest,
};

#[derive(Debug, Args)]
pub(crate) struct BootstrapArgs {
    #[command(flatten)]
    config: AppConfig,

    /// Super-admin display name
    #[arg(long)]
    name: String,

    /// Super-admin email address
    #[arg(long)]
    email: String,

    /// Super-admin password
    #[arg(long, env = "SUPER_ADMIN_PASSWORD", hide_env_values = true)]
    password: String,
}

pub(crate) async fn run(args: BootstrapArgs) -> Result<(), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    let setup_key = args.config.security.setup_key.clone().unwrap_or_default();

    let user = app
        .bootstrap
        .bootstrap(BootstrapRequest {
            name: args.name,
            email: args.email,
            password: args.password,
            setup_key,
        })
        .await
        .map_err(|error| format!("failed to bootstrap: {error}"))?;

    println!("super_admin_uuid: {user}");

    Ok(())
}
