//! The `keel` binary: server and admin CLI.

mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use config::CliConfig;
use std::sync::Arc;
use std::time::Duration;

use keel_api::{ApiServer, ApiServerConfig, AppState};
use keel_connectors::{
    AzureAdConfig, AzureAdProvider, IntuneConfig, IntuneConnector,
};
use keel_core::db::{
    create_asset_repository, create_organization_repository, create_person_repository,
    create_pool, create_user_repository, ensure_admin_user, run_migrations,
};
use keel_core::sync::{run_device_sync, SyncOptions};
use keel_core::{hash_password, validate_password_strength, AuthorizationContext, Role, User};
use keel_observability::{init_logging_with_config, LoggingConfig};

#[derive(Parser)]
#[command(name = "keel", version, about = "Keel company operating system")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the API server.
    Serve,
    /// Run database migrations and exit.
    Migrate,
    /// Create an admin user in an organization.
    CreateAdmin {
        /// Organization slug.
        #[arg(long, default_value = "default")]
        org: String,
        /// Username.
        #[arg(long, default_value = "admin")]
        username: String,
        /// Email address.
        #[arg(long)]
        email: String,
        /// Password (falls back to KEEL_ADMIN_PASSWORD).
        #[arg(long, env = "KEEL_ADMIN_PASSWORD")]
        password: String,
    },
    /// Reconcile assets against the configured MDM.
    SyncDevices {
        /// Organization slug.
        #[arg(long, default_value = "default")]
        org: String,
        /// Retire assets whose device vanished from the MDM.
        #[arg(long)]
        retire_orphans: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let logging = if keel_core::is_production_environment() {
        LoggingConfig::production()
    } else {
        LoggingConfig::default()
    };
    init_logging_with_config(logging);

    let config = CliConfig::from_env()?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Migrate => migrate(config).await,
        Command::CreateAdmin {
            org,
            username,
            email,
            password,
        } => create_admin(config, org, username, email, password).await,
        Command::SyncDevices {
            org,
            retire_orphans,
        } => sync_devices(config, org, retire_orphans).await,
    }
}

async fn serve(config: CliConfig) -> anyhow::Result<()> {
    let pool = create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool).await.context("Migrations failed")?;

    if let Some(seeded) = ensure_admin_user(&pool).await? {
        println!(
            "{} Created default admin user 'admin' with password: {}",
            "==>".green().bold(),
            seeded.password.yellow()
        );
        println!("    Change it after the first login.");
    }

    let prometheus_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let mut state = AppState::new(pool).with_prometheus_handle(prometheus_handle);

    if let Some(intune) = &config.intune {
        let connector = IntuneConnector::new(IntuneConfig {
            tenant_id: intune.tenant_id.clone(),
            client_id: intune.client_id.clone(),
            client_secret: intune.client_secret.clone(),
            base_url: keel_connectors::mdm::intune::GRAPH_BASE_URL.to_string(),
            page_size: 100,
        })
        .context("Failed to initialize Intune connector")?;
        state = state.with_mdm(Arc::new(connector));
        tracing::info!("Intune device sync enabled");
    }

    if let Some(aad) = &config.azure_ad {
        let provider = AzureAdProvider::new(AzureAdConfig {
            tenant_id: aad.tenant_id.clone(),
            client_id: aad.client_id.clone(),
            client_secret: aad.client_secret.clone(),
            authority: "https://login.microsoftonline.com".to_string(),
            graph_url: "https://graph.microsoft.com/v1.0".to_string(),
        })
        .context("Failed to initialize Azure AD provider")?;
        state = state.with_identity(Arc::new(provider));
        tracing::info!("Azure AD SSO enabled");
    }

    let server = ApiServer::new(
        state,
        ApiServerConfig {
            bind_address: config.bind_address,
            request_timeout: Duration::from_secs(30),
            enable_swagger: config.enable_swagger,
        },
    );

    server.run().await.context("Server error")?;
    Ok(())
}

async fn migrate(config: CliConfig) -> anyhow::Result<()> {
    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;
    println!("{} Migrations applied", "==>".green().bold());
    Ok(())
}

async fn create_admin(
    config: CliConfig,
    org_slug: String,
    username: String,
    email: String,
    password: String,
) -> anyhow::Result<()> {
    let strength_errors = validate_password_strength(&password);
    if !strength_errors.is_empty() {
        anyhow::bail!("Weak password: {}", strength_errors.join("; "));
    }

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let org = create_organization_repository(&pool)
        .get_by_slug(&org_slug)
        .await?
        .with_context(|| format!("Organization '{}' not found", org_slug))?;

    let password_hash = hash_password(&password)?;
    let user = User::new(org.id, email.to_lowercase(), username, password_hash, Role::Admin);
    create_user_repository(&pool).create(&user).await?;

    println!(
        "{} Created admin '{}' in organization '{}'",
        "==>".green().bold(),
        user.username,
        org.slug
    );
    Ok(())
}

async fn sync_devices(
    config: CliConfig,
    org_slug: String,
    retire_orphans: bool,
) -> anyhow::Result<()> {
    let intune = config
        .intune
        .as_ref()
        .context("Intune is not configured (set KEEL_INTUNE_* environment variables)")?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let org = create_organization_repository(&pool)
        .get_by_slug(&org_slug)
        .await?
        .with_context(|| format!("Organization '{}' not found", org_slug))?;

    let connector = IntuneConnector::new(IntuneConfig {
        tenant_id: intune.tenant_id.clone(),
        client_id: intune.client_id.clone(),
        client_secret: intune.client_secret.clone(),
        base_url: keel_connectors::mdm::intune::GRAPH_BASE_URL.to_string(),
        page_size: 100,
    })?;

    let options = SyncOptions {
        tag_prefix: org.settings.asset_tag_prefix.clone(),
        retire_orphans: retire_orphans || org.settings.sync_retires_orphans,
    };

    let asset_repo = create_asset_repository(&pool);
    let person_repo = create_person_repository(&pool);
    let auth = AuthorizationContext::system(org.id);

    let report = run_device_sync(
        &connector,
        asset_repo.as_ref(),
        person_repo.as_ref(),
        org.id,
        &options,
        &auth.audit_identity(),
    )
    .await?;

    println!("{} Device sync finished", "==>".green().bold());
    println!("    created:    {}", report.created);
    println!("    updated:    {}", report.updated);
    println!("    reassigned: {}", report.reassigned);
    println!("    orphaned:   {}", report.orphaned);
    println!("    retired:    {}", report.retired);
    if report.errors > 0 {
        println!("    {}     {}", "errors:".red(), report.errors);
    }
    Ok(())
}
