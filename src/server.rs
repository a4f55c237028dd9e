use crate::config::BridgeConfig;
use crate::providers::ProviderKind;
use crate::proxy::{self, ProxyResult};
use crate::translate::registry::ProviderRegistry;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

#[derive(Clone)]
pub struct AppState {
    pub config: BridgeConfig,
    pub client: reqwest::Client,
    pub registry: &'static ProviderRegistry,
}

impl AppState {
    pub fn new(config: BridgeConfig, client: reqwest::Client) -> Self {
        Self {
            config,
            client,
            registry: ProviderRegistry::global(),
        }
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new();
    for kind in state.registry.providers() {
        let handler = move |State(state): State<Arc<AppState>>, body: Bytes| async move {
            handle_completion(state, kind, body).await
        };
        router = router.route(kind.client_route(), post(handler));
    }

    router
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .route("/v1/conversions", get(handle_conversions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_completion(state: Arc<AppState>, frontend: ProviderKind, body: Bytes) -> Response {
    let result = proxy::forward(
        frontend,
        &body,
        &state.config,
        &state.client,
        state.registry,
    )
    .await;

    match result {
        Ok(ProxyResult::Json { status, body }) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(body)).into_response()
        }
        Ok(ProxyResult::Stream(frames)) => {
            let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "text/event-stream")
                .header(header::CACHE_CONTROL, "no-cache")
                .body(body)
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        Err(e) => {
            error!(%frontend, error = %e, "Request failed");
            let (status, body) = proxy::failure_response(state.registry, frontend, &e);
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(body)).into_response()
        }
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models: Vec<serde_json::Value> = state
        .config
        .models
        .keys()
        .map(|name| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": state.config.provider.name,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

async fn handle_conversions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let pairs: Vec<serde_json::Value> = state
        .registry
        .all_conversion_pairs()
        .into_iter()
        .map(|(source, target)| serde_json::json!({ "source": source, "target": target }))
        .collect();

    Json(serde_json::json!({
        "providers": state.registry.providers().collect::<Vec<_>>(),
        "pairs": pairs,
    }))
}
