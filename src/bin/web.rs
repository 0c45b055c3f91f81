//! dateplan HTTP 入口
//!
//! 启动: cargo run --bin dateplan-web --features web
//! 端口取 DATEPLAN_WEB_PORT，缺省 8080

#![cfg(feature = "web")]

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use dateplan::config::{load_config, AppConfig};
use dateplan::{observability, DateRequest, Orchestrator, PlanResponse};

const DEFAULT_PORT: u16 = 8080;

struct AppState {
    config: AppConfig,
    orchestrator: Orchestrator,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    llm_provider: String,
    places_demo: bool,
    weather_demo: bool,
    images_demo: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config = load_config(None)
        .unwrap_or_else(|e| {
            tracing::warn!("Config load failed ({}), using defaults", e);
            AppConfig::default()
        })
        .with_env_credentials();
    let orchestrator = Orchestrator::from_config(&config);
    let state = Arc::new(AppState {
        config,
        orchestrator,
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/plan", post(plan))
        .with_state(state);

    let port = std::env::var("DATEPLAN_WEB_PORT")
        .ok()
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("dateplan web: http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(
        "<h1>dateplan</h1>\
         <p>POST /plan with a JSON body such as \
         <code>{\"city\":\"Pune\",\"budget_per_person\":800,\"date_time\":\"Saturday 7pm\",\"dietary_restrictions\":[\"vegetarian\"]}</code></p>\
         <p>GET /health for data source status.</p>",
    )
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let services = &state.config.services;
    Json(HealthResponse {
        status: "ok",
        llm_provider: state.config.llm.provider.clone(),
        places_demo: services.places.demo_mode(),
        weather_demo: services.weather.demo_mode(),
        images_demo: services.images.demo_mode(),
    })
}

async fn plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DateRequest>,
) -> Result<Json<PlanResponse>, (StatusCode, Json<ErrorResponse>)> {
    state.orchestrator.run(request).await.map(Json).map_err(|e| {
        tracing::warn!(error = %e, "request rejected");
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    })
}
