use std::sync::Arc;

use axum::Router;
use clap::Parser;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use qrtill::config::Config;
use qrtill::db::{create_pool, init_db, AppState};
use qrtill::gateway::MercadoPagoGateway;
use qrtill::handlers;
use qrtill::reconcile::{ReconcilePolicy, Reconciler};

#[derive(Parser, Debug)]
#[command(name = "qrtill")]
#[command(about = "QR payments for the point of sale")]
struct Cli {
    /// Delete the database on exit (dev mode only, useful for fresh starts)
    #[arg(long)]
    ephemeral: bool,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qrtill=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    if config.dev_mode {
        tracing::info!("Running in DEVELOPMENT mode");
    }
    if config.access_token.is_empty() {
        tracing::warn!(
            "MP_ACCESS_TOKEN is not set; payment creation will fail until it is configured"
        );
    }

    let db_pool = create_pool(&config.database_path).expect("Failed to create database pool");
    {
        let conn = db_pool.get().expect("Failed to get connection");
        init_db(&conn).expect("Failed to initialize database");
    }

    let gateway = Arc::new(MercadoPagoGateway::new(
        &config.access_token,
        Some(config.notification_url()),
    ));
    let reconciler = Reconciler::new(
        db_pool.clone(),
        gateway.clone(),
        ReconcilePolicy::default(),
    );

    let state = AppState {
        db: db_pool,
        gateway,
        reconciler,
        webhook_secret: config.webhook_secret.clone(),
    };

    let app = Router::new()
        .merge(handlers::pos_router())
        .merge(handlers::webhook_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    let cleanup_on_exit = cli.ephemeral && config.dev_mode;
    if cleanup_on_exit {
        tracing::info!("EPHEMERAL MODE: database will be deleted on exit");
    }

    tracing::info!("QRTill server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Failed to start server");

    if cleanup_on_exit {
        tracing::info!("Cleaning up ephemeral database...");
        if let Err(e) = std::fs::remove_file(&config.database_path) {
            tracing::warn!("Failed to remove {}: {}", config.database_path, e);
        }
    }
}
