use clap::Args;
use tenantry::plans::Plan;
use tenantry_app::{
    audit::Actor, config::AppConfig, context::AppContext, domain::tenants::models::Registration,
};

#[derive(Debug, Args)]
pub(crate) struct RegisterTenantArgs {
    #[command(flatten)]
    config: AppConfig,

    /// Tenant display name; the slug is derived from it
    #[arg(long)]
    name: String,

    /// Email address of the tenant's first admin
    #[arg(long)]
    admin_email: String,

    /// Display name of the tenant's first admin
    #[arg(long)]
    admin_name: String,

    /// Subscription plan (basic, pro, enterprise, unlimited)
    #[arg(long, default_value = "basic")]
    plan: Plan,

    /// Custom primary domain; derived from the slug when omitted
    #[arg(long)]
    domain: Option<String>,

    /// Tenant timezone; the configured default when omitted
    #[arg(long)]
    timezone: Option<String>,
}

pub(crate) async fn run(args: RegisterTenantArgs) -> Result<(), String> {
    let app = AppContext::from_config(&args.config)
        .await
        .map_err(|error| format!("failed to initialize: {error}"))?;

    let registered = app
        .lifecycle
        .register(
            Registration {
                name: args.name,
                admin_email: args.admin_email,
                admin_name: args.admin_name,
                plan: args.plan,
                domain: args.domain,
                timezone: args.timezone,
            },
            Actor::Operator("cli".to_string()),
        )
        .await
        .map_err(|error| format!("failed to register tenant: {error}"))?;

    println!("tenant_uuid: {}", registered.tenant.uuid);
    println!("tenant_slug: {}", registered.tenant.slug);
    println!("tenant_domain: {}", registered.tenant.domain);
    println!("tenant_status: {}", registered.tenant.status);
    println!("admin_uuid: {}", registered.admin);
    println!("the admin's temporary password was sent by email");

    Ok(())
}
