use anyhow::Result;

mod rate_limiter;
mod streaming;
#[cfg(test)]
mod tests;
use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chatrelay_common::{
    Error as CommonError, ErrorResponse, HealthResponse, HealthStatus, Message,
    MetricsSnapshot, ObservableMetrics, RequestId, SendMessageRequest,
};
use chatrelay_config::{AppConfig, ConfigLoader};
use chatrelay_relay::{OpenAiProvider, Relay, RelaySettings};
use chatrelay_store::{list_messages, MessageStore};
use serde_json::json;
use std::{net::{IpAddr, SocketAddr}, path::PathBuf, sync::Arc};
use std::time::SystemTime;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use rate_limiter::RateLimiter;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct AppState {
    store: MessageStore,
    relay: Relay,
    start_time: SystemTime,
    metrics: Arc<ObservableMetrics>,
    rate_limiter: RateLimiter,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(err: &CommonError, request_id: Option<&RequestId>) -> ApiError {
    let status = StatusCode::from_u16(err.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = ErrorResponse::from(err);
    response.request_id = request_id.map(|id| id.to_string());
    (status, Json(response))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed()
        .unwrap_or_default()
        .as_secs();
    let configured = state.relay.is_configured();

    Json(HealthResponse {
        // Reads still work without a key; only relays fail
        status: if configured {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        },
        provider_configured: configured,
        version: VERSION.to_string(),
        uptime_seconds: uptime,
    })
}

async fn get_messages(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    list_messages(&state.store)
        .await
        .map(Json)
        .map_err(|e| api_error(&e, None))
}

/// `sendAndComplete`: returns once the placeholder is filled
async fn send_message(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(request): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ip: IpAddr = addr.ip();

    let _slot = match state.rate_limiter.acquire(ip).await {
        Ok(slot) => slot,
        Err(e) => {
            state.metrics.record_error(None, &e).await;
            warn!(%ip, "Relay rejected: {}", e);
            return Err(api_error(&e, None));
        }
    };

    let pending = state.relay
        .dispatch(&request.body)
        .await
        .map_err(|e| api_error(&e, None))?;
    let request_id = pending.request_id.clone();

    pending
        .wait()
        .await
        .map_err(|e| api_error(&e, Some(&request_id)))?;

    Ok(StatusCode::NO_CONTENT)
}

async fn subscribe_messages(State(state): State<AppState>) -> impl IntoResponse {
    streaming::subscription_response(&state.store)
}

async fn version() -> Json<serde_json::Value> {
    Json(json!({
        "version": VERSION,
        "api": "ChatRelay Local API",
        "provider_api": "OpenAI Compatible"
    }))
}

async fn get_metrics(State(state): State<AppState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot().await)
}

fn build_state(config: &AppConfig, relay: Relay) -> AppState {
    AppState {
        store: relay.store().clone(),
        metrics: relay.metrics().clone(),
        rate_limiter: RateLimiter::new(config.limits.clone()),
        start_time: SystemTime::now(),
        relay,
    }
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/messages", get(get_messages).post(send_message))
        .route("/messages/subscribe", get(subscribe_messages))
        .route("/healthz", get(health_check))
        .route("/health", get(health_check))
        .route("/version", get(version))
        .route("/metrics", get(get_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::INFO.into()))
        .init();

    info!("Starting ChatRelay local API server");

    // Optional config path as the first argument
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = ConfigLoader::load(config_path.as_ref())?;
    config.validate()?;

    let settings = RelaySettings::from_config(&config.provider);
    if settings.api_key.is_none() {
        warn!(
            "{} is not set; messages will be stored but never answered",
            config.provider.api_key_env
        );
    }

    let provider = OpenAiProvider::from_config(&config.provider)?;
    let relay = Relay::new(MessageStore::new(), Arc::new(provider), settings)
        .with_metrics(Arc::new(ObservableMetrics::new()));

    let app = build_router(build_state(&config, relay));

    let ip: IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::new(ip, config.server.port);
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Client addresses feed the rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>()
    )
    .await?;

    Ok(())
}
