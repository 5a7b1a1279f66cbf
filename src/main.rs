//! # Interview Agent Backend - Main Application Entry Point
//!
//! Actix-web server hosting the real-time mock-interview orchestrator:
//!
//! - **/ws/interview**: one WebSocket per live call, driven by the session
//!   engine (`session::engine`) through the connection actor (`websocket`)
//! - **/api/v1/calls/register**: write path into the call context cache
//! - **/api/v1/config**, **/health**, **/api/v1/metrics**: runtime tuning
//!   and observability
//!
//! Startup wires the collaborators once — completion client, congruency
//! analyzer, interview recorder, call context cache — and shares them with
//! every connection through `AppState`. A background task sweeps expired
//! call context entries for as long as the server runs.

mod config;
mod congruency;
mod error;
mod handlers;
mod health;
mod llm;
mod middleware;
mod protocol;
mod recorder;
mod session;
mod state;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use congruency::{CongruencyAnalyzer, LlmCongruencyAnalyzer};
use llm::client::{CompletionClient, OpenAiCompletionClient};
use recorder::{HttpRecorder, InterviewRecorder, NullRecorder};
use session::context::CallContextCache;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown flag set by the signal handlers and polled by the main
/// task so in-flight calls can finish before the server stops.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting interview-agent-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} (model {})",
        config.server.host, config.server.port, config.llm.model
    );

    // Collaborators are constructed once and shared by every connection.
    let call_context = Arc::new(CallContextCache::new(Duration::from_secs(
        config.context.ttl_seconds,
    )));
    let completion_client: Arc<dyn CompletionClient> = Arc::new(OpenAiCompletionClient::new(
        config.llm.base_url.clone(),
        config.llm.api_key.clone(),
        config.llm.model.clone(),
    ));
    let analyzer: Arc<dyn CongruencyAnalyzer> =
        Arc::new(LlmCongruencyAnalyzer::new(completion_client.clone()));
    let recorder: Arc<dyn InterviewRecorder> = if config.recorder.is_enabled() {
        Arc::new(HttpRecorder::new(
            config.recorder.base_url.clone(),
            config.recorder.api_key.clone(),
        ))
    } else {
        info!("No recorder service configured; interview records are not persisted");
        Arc::new(NullRecorder)
    };

    let app_state = AppState::new(
        config.clone(),
        call_context.clone(),
        completion_client,
        analyzer,
        recorder,
    );
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    spawn_context_sweep(
        call_context,
        Duration::from_secs(config.context.sweep_interval_seconds),
    );
    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            // one connection per live call
            .route("/ws/interview", web::get().to(websocket::interview_websocket))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/calls/register", web::post().to(handlers::register_call))
                    .route(
                        "/calls/{call_id}/context",
                        web::get().to(handlers::get_call_context),
                    ),
            )
            // load balancers probe the root-level path
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "interview_agent_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically evict expired call context entries. Runs for the lifetime
/// of the process, independent of any session.
fn spawn_context_sweep(call_context: Arc<CallContextCache>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            call_context.sweep();
        }
    });
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
