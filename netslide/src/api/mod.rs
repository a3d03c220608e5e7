use axum::{extract::State, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::{
    config::AppState,
    error::ApiResult,
    schema::{HealthResp, TokenResp},
    service::{hub::query_stats, token::mint_token},
    websocket::websocket_handler,
};

pub const BANNER: &str = "Multiplex relay is running";

pub fn router(st: AppState) -> Router {
    // Presentations are served from anywhere, so any origin may connect
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { BANNER }))
        .route("/health", get(health))
        .route("/token", get(token))
        .route("/ws", get(websocket_handler))
        .layer(cors)
        .with_state(st)
}

async fn health(State(st): State<AppState>) -> ApiResult<Json<HealthResp>> {
    let stats = query_stats(&st.hub_tx).await?;
    Ok(Json(HealthResp {
        status: "ok".to_string(),
        connections: stats.connections,
        active_secrets: stats.active_secrets,
    }))
}

async fn token(State(st): State<AppState>) -> Json<TokenResp> {
    Json(mint_token(st.token_length))
}
