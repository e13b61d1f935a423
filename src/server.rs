use crate::auth::AuthManager;
use crate::bedrock::{BedrockBackend, BedrockClient};
use crate::config::ProxyConfig;
use crate::logging::SharedLogger;
use crate::models::ModelTable;
use crate::proxy::{ProxyOutcome, RequestOrchestrator};
use crate::translate::openai_types::{ChatCompletionRequest, ErrorResponse};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub config: ProxyConfig,
    pub backend: BedrockClient,
    pub auth: AuthManager,
    pub models: ModelTable,
    pub logger: SharedLogger,
}

impl AppState {
    pub fn new(config: ProxyConfig, logger: SharedLogger) -> crate::error::Result<Self> {
        let backend = BedrockClient::new(config.clone())?;
        let auth = AuthManager::new(config.auth.require_auth);
        let models = config.model_table();
        Ok(Self {
            config,
            backend,
            auth,
            models,
            logger,
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route("/v1/models", get(handle_models))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let req: ChatCompletionRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request [{request_id}]: {e}"));
            let err = ErrorResponse::new(
                400,
                "invalid_request_error",
                format!("Invalid request body: {e}"),
            )
            .with_request_id(&request_id);
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    state.logger.log(
        crate::logging::LogEntry::new(
            crate::logging::LogLevel::Info,
            "server",
            format!(
                "Request: model={} streaming={} messages={}",
                req.model,
                req.stream.unwrap_or(false),
                req.messages.len()
            ),
        )
        .with_request_id(&request_id),
    );

    let orchestrator = RequestOrchestrator::new(
        &state.backend,
        &state.auth,
        &state.models,
        &state.logger,
        state.config.buffered_streaming,
    );

    match orchestrator.handle(&headers, req, &request_id).await {
        ProxyOutcome::Completed(response) => Json(response).into_response(),
        ProxyOutcome::Streaming(chunks) => {
            let events = chunks
                .map(|chunk| {
                    let data = serde_json::to_string(&chunk).unwrap_or_else(|_| "{}".to_string());
                    Ok::<Event, Infallible>(Event::default().data(data))
                })
                .chain(stream::once(async {
                    Ok(Event::default().data("[DONE]"))
                }));

            Sse::new(events)
                .keep_alive(axum::response::sse::KeepAlive::default())
                .into_response()
        }
        ProxyOutcome::Failed { stage: _, error } => error_response(&error, &request_id),
    }
}

async fn handle_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let request_id = uuid::Uuid::new_v4().to_string();

    let auth_result = state.auth.authenticate(&headers);
    if !auth_result.authenticated || !state.auth.authorize(&auth_result, "models:list") {
        return error_response(&state.auth.auth_error(&auth_result), &request_id);
    }

    match state.backend.list_models().await {
        Ok(backend_models) => Json(state.models.model_listing(&backend_models)).into_response(),
        Err(e) => {
            state
                .logger
                .error("server", format!("Model listing failed [{request_id}]: {e}"));
            error_response(&e, &request_id)
        }
    }
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let status = if state.backend.credentials_available() {
        "ok"
    } else {
        "degraded"
    };
    Json(serde_json::json!({
        "status": status,
        "service": "bedrock-proxy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

fn error_response(error: &crate::error::ProxyError, request_id: &str) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = error.to_response().with_request_id(request_id);
    (status, Json(body)).into_response()
}
