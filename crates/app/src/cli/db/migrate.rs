use clap::Args;
use tenantry_app::database;

#[derive(Debug, Args)]
pub(crate) struct MigrateArgs {
    /// `PostgreSQL` connection string for the central store
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: String,
}

pub(crate) async fn run(args: MigrateArgs) -> Result<(), String> {
    let pool = database::connect(&args.database_url)
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

    database::migrate_central(&pool)
        .await
        .map_err(|error| format!("failed to apply migrations: {error}"))?;

    println!("central database is up to date");

    Ok(())
}
