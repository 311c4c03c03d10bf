use crate::config::Config;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use relaybot_core::{Bot, BotBuilder, BotError, ObjectRequest, Readiness, ReadinessFlags, Result};
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

const READINESS_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct ServerState {
    pub bot: Arc<Bot>,
    pub readiness: Arc<Readiness>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    ready: bool,
    gates: ReadinessFlags,
}

pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/info", get(info_handler))
        .route("/transfer", post(transfer_handler))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn health_handler(State(state): State<Arc<ServerState>>) -> Response {
    let ready = state.readiness.is_ready();
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        ready,
        gates: state.readiness.flags(),
    };
    (status, Json(body)).into_response()
}

async fn info_handler(State(state): State<Arc<ServerState>>) -> Response {
    Json(state.bot.info()).into_response()
}

fn parse_transfer(body: &[u8]) -> Result<ObjectRequest> {
    let request: ObjectRequest = serde_json::from_slice(body)?;
    if request.bucket.trim().is_empty() || request.path.trim().is_empty() {
        return Err(BotError::InvalidRequest(
            "bucket and path cannot be empty".to_string(),
        ));
    }
    Ok(request)
}

/// Accepts a transfer; 200 means enqueued, not transferred.
async fn transfer_handler(State(state): State<Arc<ServerState>>, body: Bytes) -> Response {
    match parse_transfer(&body) {
        Ok(request) => {
            state.bot.submit(request.clone());
            let resp = ApiResponse {
                success: true,
                data: Some(request),
                error: None,
            };
            (StatusCode::OK, Json(resp)).into_response()
        }
        Err(e) => {
            tracing::warn!("Rejected transfer request: {}", e);
            let resp = ApiResponse::<()> {
                success: false,
                data: None,
                error: Some(e.to_string()),
            };
            (StatusCode::BAD_REQUEST, Json(resp)).into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::warn!("SIGINT received, shutting down"),
        _ = terminate => tracing::warn!("SIGTERM received, shutting down"),
    }
}

async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Starts background components, then polls until every readiness gate is up.
async fn start_components(
    bot: Arc<Bot>,
    mut shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    let tasks = bot.start(shutdown.clone()).await;
    let readiness = bot.readiness();

    while !readiness.is_ready() {
        if *shutdown.borrow() {
            return tasks;
        }
        tokio::select! {
            _ = tokio::time::sleep(READINESS_POLL_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::info!("Bot {} is ready", bot.name());
    tasks
}

pub async fn run_server(config: Config) -> Result<()> {
    let bot = Arc::new(
        BotBuilder::new(config.name.clone(), config.api.effective_address())
            .api_port(config.api.port)
            .object_worker(config.object_worker.clone())
            .database_worker(config.database_worker.clone())
            .membership(config.membership.clone())
            .build()?,
    );
    let readiness = bot.readiness();

    let state = Arc::new(ServerState {
        bot: bot.clone(),
        readiness: readiness.clone(),
    });
    let app = router(state);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bind_addr = config.api.bind_addr();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(
        "Bot {} listening on {} (advertised as {})",
        bot.name(),
        bind_addr,
        config.api.effective_address()
    );

    let mut server = tokio::spawn(
        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()))
            .into_future(),
    );
    readiness.set_api_ready();

    let startup = tokio::spawn(start_components(bot.clone(), shutdown_rx.clone()));

    let mut outcome = Ok(());
    tokio::select! {
        result = &mut server => {
            outcome = match result {
                Ok(Ok(())) => Err(BotError::Internal("http server stopped unexpectedly".to_string())),
                Ok(Err(e)) => Err(BotError::Io(e)),
                Err(e) => Err(BotError::Internal(format!("http server task failed: {}", e))),
            };
        }
        _ = shutdown_signal() => {}
    }

    shutdown_tx.send_replace(true);

    let grace = config.api.shutdown_grace();
    let drain = async {
        if !server.is_finished() {
            match server.await {
                Ok(Err(e)) => tracing::error!("HTTP server error during shutdown: {}", e),
                Err(e) => tracing::error!("HTTP server task failed: {}", e),
                Ok(Ok(())) => {}
            }
        }

        match startup.await {
            Ok(tasks) => {
                for task in tasks {
                    if let Err(e) = task.await {
                        tracing::error!("Background task failed: {}", e);
                    }
                }
            }
            Err(e) => tracing::error!("Startup task failed: {}", e),
        }
    };

    if tokio::time::timeout(grace, drain).await.is_err() {
        tracing::warn!(
            "Shutdown grace period of {:?} elapsed with work still in flight",
            grace
        );
    } else {
        tracing::info!("Bot {} stopped", bot.name());
    }

    outcome
}
