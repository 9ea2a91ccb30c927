use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use realtime_broker::broker::Broker;
use realtime_broker::chat::{ChatRelay, RoomGrants};
use realtime_broker::config::Settings;
use realtime_broker::redis::RedisPool;
use realtime_broker::server::{create_app, AppState};
use realtime_broker::session::create_session_store;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    init_tracing();

    // Load configuration
    let settings = Settings::new()?;
    tracing::info!("Configuration loaded");

    if settings.session.secret.is_empty() {
        bail!("session.secret must be set (BROKER__SESSION__SECRET)");
    }

    // Redis is only needed when sessions live there
    let redis = if settings.session.backend == "redis" {
        let pool = Arc::new(RedisPool::new(settings.redis.clone())?);
        match pool.ping().await {
            Ok(()) => tracing::info!(url = %pool.url(), "Connected to Redis"),
            Err(e) => tracing::warn!(error = %e, "Redis not reachable yet, will retry on first lookup"),
        }
        Some(pool)
    } else {
        None
    };

    let store = create_session_store(&settings.session, redis.clone());
    let session_backend = store.backend_type();

    // Create broker and install the chat relay
    let broker = Broker::from_settings(&settings, store);
    let grants = Arc::new(RoomGrants::from_config(&settings.chat));
    broker.setup(Arc::new(ChatRelay::new(grants)))?;
    tracing::info!(
        origins = ?broker.gate().origins(),
        public_rooms = ?settings.chat.public_rooms,
        session_backend = session_backend.as_str(),
        "Broker initialized"
    );

    let addr = settings.server_addr();
    let state = AppState::new(settings, broker, redis, session_backend);

    // Create Axum app
    let app = create_app(state);

    // Start server
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal_handler() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}
