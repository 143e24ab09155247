use clap::Args;
use tenantry_app::{config::AppConfig, context::AppContext};

#[derive(Debug, Args)]
pub(crate) struct StatusArgs {
    #[command(flatten)]
    config: AppConfig,
}

pub(crate) async fn run(args: StatusArgs) -> Result<(), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    let bootstrapped = app
        .bootstrap
        .is_bootstrapped()
        .await
        .map_err(|error| format!("failed to read setup state: {error}"))?;

    if bootstrapped {
        println!("platform is bootstrapped");
    } else {
        println!("platform is not bootstrapped; run `setup bootstrap`");
    }

    Ok(())
}
