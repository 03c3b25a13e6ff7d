//! # Babel Relay - Main Application Entry Point
//!
//! Real-time speech translation relay. Two participants join a room over a
//! WebSocket; each one's speech is recognized, translated into the other's
//! language, synthesized and delivered to the other participant.
//!
//! ## Application Architecture:
//! - **config**: Layered configuration (defaults, config.toml, environment)
//! - **state**: Shared application state, collaborators and metrics
//! - **audio**: Per-session audio ingest and WAV framing
//! - **recognition**: Streaming speech recognition and its adapter state machine
//! - **pipeline**: Translation and synthesis stages plus the per-session orchestrator
//! - **session**: Session registry (at most one pipeline session per connection)
//! - **rooms**: Two-person room pairing and result relay
//! - **protocol**: JSON events exchanged over the WebSocket
//! - **websocket**: The per-connection actor
//! - **health**, **handlers**, **middleware**: HTTP monitoring surface

mod audio;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod pipeline;
mod protocol;
mod recognition;
mod rooms;
mod session;
mod state;
mod websocket;

#[cfg(test)]
mod testing;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::{AppState, Collaborators};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting babel-relay v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (default languages {} -> {})",
        config.server.host, config.server.port, config.languages.default_source, config.languages.default_target
    );
    config.report_missing_credentials();

    let collaborators = Collaborators::from_config(&config);
    let app_state = AppState::new(config.clone(), collaborators);
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server_state = app_state.clone();
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(server_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .route("/ws", web::get().to(websocket::relay_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/rooms", web::get().to(handlers::list_rooms))
                    .route("/sessions", web::get().to(handlers::list_sessions)),
            )
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    let closed = app_state.sessions.shutdown_all();
    info!(sessions_closed = closed, "Server stopped gracefully");
    Ok(())
}

/// `RUST_LOG` controls filtering; defaults to `babel_relay=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "babel_relay=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves on SIGINT or SIGTERM. If a handler cannot be installed the other
/// signal (or Ctrl+C) still works.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT"),
        Err(e) => {
            error!("Failed to listen for shutdown signals: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
