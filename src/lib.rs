pub mod api;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod domain;
pub mod entities;
pub mod services;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
pub use config::Config;
pub use context::RequestContext;
pub use state::SharedState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Init)) {
        return cmd_init();
    }

    let config = Config::load()?;
    config.validate()?;

    let prometheus_handle = if config.observability.metrics_enabled {
        use metrics_exporter_prometheus::PrometheusBuilder;
        let builder = PrometheusBuilder::new();
        let handle = builder
            .install_recorder()
            .context("Failed to install Prometheus recorder")?;
        Some(handle)
    } else {
        None
    };

    init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config, prometheus_handle).await,

        Commands::Init => cmd_init(),

        Commands::CreateAccount {
            login_name,
            employee_code,
            name,
            role,
            password,
            superuser,
            multi_unit,
            no_forced_change,
        } => {
            cli::cmd_create_account(
                &config,
                &login_name,
                &employee_code,
                &name,
                &role,
                &password,
                superuser,
                multi_unit,
                no_forced_change,
            )
            .await
        }

        Commands::CreateCenter {
            code,
            name,
            capacity,
        } => cli::cmd_create_center(&config, &code, &name, capacity).await,

        Commands::Assign {
            identifier,
            center,
            primary,
        } => cli::cmd_assign(&config, &identifier, &center, primary).await,

        Commands::Unlock { identifier } => cli::cmd_unlock(&config, &identifier).await,

        Commands::Accounts { locked, expired } => {
            cli::cmd_accounts(&config, locked, expired).await
        }

        Commands::IssueResetToken { identifier } => {
            cli::cmd_issue_reset_token(&config, &identifier).await
        }

        Commands::Audit {
            days,
            actor,
            limit,
        } => cli::cmd_audit(&config, days, actor.as_deref(), limit).await,
    }
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    if config.observability.loki_enabled {
        let url = url::Url::parse(&config.observability.loki_url).context("Invalid Loki URL")?;

        let mut builder = tracing_loki::builder().label("app", "centergate")?;
        for (key, value) in &config.observability.loki_labels {
            builder = builder.label(key.as_str(), value.as_str())?;
        }
        let (layer, task) = builder.build_url(url)?;

        tokio::spawn(task);

        registry.with(layer).init();
        info!(
            "Loki logging initialized at {}",
            config.observability.loki_url
        );
    } else {
        registry.init();
    }

    Ok(())
}

fn cmd_init() -> anyhow::Result<()> {
    if Config::create_default_if_missing()? {
        println!("✓ Created config.toml with default settings");
        println!("  Set security.secret_key before enrolling second factors.");
    } else {
        println!("config.toml already exists, leaving it untouched");
    }
    Ok(())
}

async fn run_server(
    config: Config,
    prometheus_handle: Option<metrics_exporter_prometheus::PrometheusHandle>,
) -> anyhow::Result<()> {
    info!("Centergate v{} starting...", env!("CARGO_PKG_VERSION"));

    if !config.server.enabled {
        info!("Server disabled in config; nothing to do");
        return Ok(());
    }

    let port = config.server.port;
    let shared = Arc::new(SharedState::new(config).await?);
    let api_state = api::create_app_state(shared, prometheus_handle)?;
    let app = api::router(api_state).await?;

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Web server running at http://{addr}");

    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    if let Err(e) = server.await {
        error!("Web server error: {}", e);
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!("Error listening for shutdown: {}", e),
    }
}
