use clap::Parser;
use csactl::config::DatabaseConfig;
use csactl::{Application, Config, auth::api_key::issue_api_key, setup_store, telemetry};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

/// Issue a key, print it once and exit.
async fn create_api_key(config: &Config, slug: &str, project_name: Option<&str>, label: &str) -> anyhow::Result<()> {
    if matches!(config.database, DatabaseConfig::Memory) {
        tracing::warn!("database.type is memory; the key will not survive this process");
    }
    let store = setup_store(config).await?;
    let issued = issue_api_key(store.as_ref(), slug, project_name, label).await?;

    println!("Project: {} ({})", issued.project.name, issued.project.slug);
    println!("Key id:  {}", issued.key.id);
    println!("API key: {}", issued.plaintext);
    println!();
    println!("Store this key now. It cannot be shown again.");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let args = csactl::config::Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;

    tracing::debug!("{:?}", args);

    if let Some(slug) = args.create_api_key.as_deref() {
        return create_api_key(&config, slug, args.project_name.as_deref(), &args.label).await;
    }

    let shutdown = shutdown_signal();
    Application::new(config).await?.serve(shutdown).await
}
