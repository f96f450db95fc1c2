use contact_form::config::ServerConfig;
use contact_form::handler::{self, AppState};
use contact_form::notifier::{EmailNotifier, Notifier, WebhookNotifier};
use contact_form::store::{SqlStore, SubmissionStore};
use dotenv::dotenv;
use std::error::Error;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let server_config = ServerConfig::from_env()?;
    info!("Configuration loaded: {server_config:?}");
    if server_config.smtp.security().is_none() {
        warn!(
            "SMTP port {} is not supported, use 465/587. Emails will not be sent",
            server_config.smtp.port
        );
    }

    let store = SqlStore::connect(&server_config.database_url).await?;
    store.initialize().await?;

    let notifiers: Vec<Arc<dyn Notifier>> = vec![
        Arc::new(EmailNotifier::new(&server_config)),
        Arc::new(WebhookNotifier::new(&server_config)?),
    ];
    let state = AppState::new(Arc::new(store.clone()), notifiers);
    let app = handler::router(state, &server_config.allowed_origins);

    let listener = TcpListener::bind(("0.0.0.0", server_config.port)).await?;
    info!("Server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    store.close().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}
