use clap::Args;
use tenantry_app::{config::AppConfig, context::AppContext};

#[derive(Debug, Args)]
pub(crate) struct AvailabilityArgs {
    #[command(flatten)]
    config: AppConfig,

    /// Requested tenant name or slug
    #[arg(long)]
    name: String,
}

pub(crate) async fn run(args: AvailabilityArgs) -> Result<(), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    let availability = app
        .lifecycle
        .check_availability(&args.name)
        .await
        .map_err(|error| format!("failed to check availability: {error}"))?;

    println!("slug: {}", availability.normalized_slug);
    println!("domain: {}", availability.derived_domain);
    println!("available: {}", availability.available);

    Ok(())
}
