use clap::Args;
use tenantry_app::{
    audit::Actor, config::AppConfig, context::AppContext, domain::tenants::models::TenantUuid,
};
use uuid::Uuid;

#[derive(Debug, Args)]
pub(crate) struct TenantArgs {
    #[command(flatten)]
    config: AppConfig,

    /// Tenant UUID
    #[arg(long)]
    tenant_uuid: Uuid,
}

#[derive(Debug, Args)]
pub(crate) struct SuspendTenantArgs {
    #[command(flatten)]
    tenant: TenantArgs,

    /// Reason recorded with the suspension
    #[arg(long)]
    reason: String,
}

async fn connect(args: &TenantArgs) -> Result<(AppContext, TenantUuid), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    Ok((app, TenantUuid::from_uuid(args.tenant_uuid)))
}

fn operator() -> Actor {
    Actor::Operator("cli".to_string())
}

pub(crate) async fn activate(args: TenantArgs) -> Result<(), String> {
    let (app, tenant) = connect(&args).await?;

    let tenant = app
        .lifecycle
        .activate(tenant, operator())
        .await
        .map_err(|error| format!("failed to activate tenant: {error}"))?;

    println!("tenant {} is {}", tenant.uuid, tenant.status);

    Ok(())
}

pub(crate) async fn suspend(args: SuspendTenantArgs) -> Result<(), String> {
    let (app, tenant) = connect(&args.tenant).await?;

    let tenant = app
        .lifecycle
        .suspend(tenant, &args.reason, operator())
        .await
        .map_err(|error| format!("failed to suspend tenant: {error}"))?;

    println!("tenant {} is {}", tenant.uuid, tenant.status);

    Ok(())
}

pub(crate) async fn delete(args: TenantArgs) -> Result<(), String> {
    let (app, tenant) = connect(&args).await?;

    app.lifecycle
        .delete(tenant, operator())
        .await
        .map_err(|error| format!("failed to delete tenant: {error}"))?;

    println!("deleted tenant {tenant}");

    Ok(())
}
