//! Simple API server.
//!
//! ```bash
//! cargo run -p simple-api
//!
//! curl -X POST localhost:3000/api/hello \
//!   -H 'Content-Type: application/json' \
//!   -H "Idempotency-Key: $(uuidgen)" \
//!   -d '{"name":"Edison"}'
//! ```
//!
//! Set `STORAGE_BACKEND=postgres` or `STORAGE_BACKEND=redis` to persist records.

use simple_api::config::Config;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "simple_api=info,idempotent_request_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting simple API");

    let config = Config::from_env()?;
    info!(
        backend = ?config.storage.backend,
        activation = %config.idempotency.activation_strategy,
        "Configuration loaded"
    );

    let driver = simple_api::connect_storage(&config.storage).await?;
    let engine = simple_api::build_engine(&config, driver)?;
    let app = simple_api::app(engine, config.idempotency.max_body_bytes);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
