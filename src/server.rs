use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::logging::SharedLogger;
use crate::proxy;
use crate::translate::anthropic_types::{
    ErrorResponse, MessagesRequest, TokenCountRequest, TokenCountResponse,
};
use crate::translate::openai_types::{ChatError, ChatErrorResponse};
use crate::translate::responses_types::ChatClientRequest;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Token count reported by `/v1/messages/count_tokens`; the backend has no counting endpoint.
const ESTIMATED_INPUT_TOKENS: u64 = 1000;

#[derive(Clone)]
pub struct AppState {
    pub config: ProxyConfig,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
    /// Bearer token clients must present; `None` disables auth.
    pub auth_token: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/v1/messages", post(handle_messages))
        .route("/v1/messages/count_tokens", post(handle_count_tokens))
        .route("/v1/chat/completions", post(handle_chat_completions))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/v1/models", get(handle_models))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn require_auth(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(ref expected) = state.auth_token else {
        return next.run(req).await;
    };

    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");

    if header_value.is_empty() {
        return auth_failure(StatusCode::UNAUTHORIZED, "Missing Authorization header.");
    }

    let token = match header_value.get(..7) {
        Some(scheme) if scheme.eq_ignore_ascii_case("bearer ") => header_value[7..].trim(),
        _ => return auth_failure(StatusCode::UNAUTHORIZED, "Invalid Authorization scheme."),
    };

    if token != expected {
        state.logger.warn("auth", "Rejected request with invalid token");
        return auth_failure(StatusCode::FORBIDDEN, "Invalid auth token.");
    }

    next.run(req).await
}

fn auth_failure(status: StatusCode, message: &str) -> Response {
    let error = if status == StatusCode::FORBIDDEN {
        "Forbidden"
    } else {
        "Unauthorized"
    };
    (
        status,
        Json(serde_json::json!({ "error": error, "message": message })),
    )
        .into_response()
}

async fn handle_messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: MessagesRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse request: {}", e));
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    let is_streaming = req.stream.unwrap_or(false);

    tracing::info!(
        model = %req.model,
        streaming = is_streaming,
        messages = req.messages.len(),
        "Messages request"
    );

    if is_streaming {
        handle_streaming(state, &req).await
    } else {
        handle_non_streaming(state, &req).await
    }
}

async fn handle_non_streaming(state: Arc<AppState>, req: &MessagesRequest) -> Response {
    match proxy::proxy_non_streaming(req, &state.config, &state.client, &state.logger).await {
        Ok(proxy::ProxyResult::Success(resp)) => Json(resp).into_response(),
        Ok(proxy::ProxyResult::Error(err, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(err)).into_response()
        }
        Err(e) => anthropic_error(&state, &e),
    }
}

async fn handle_streaming(state: Arc<AppState>, req: &MessagesRequest) -> Response {
    match proxy::proxy_streaming(req, &state.config, &state.client, &state.logger).await {
        Ok(proxy::StreamResult::Stream(body)) => event_stream_response(body),
        Ok(proxy::StreamResult::Error(err, status_code)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, Json(err)).into_response()
        }
        Err(e) => anthropic_error(&state, &e),
    }
}

async fn handle_count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: TokenCountRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            let err = ErrorResponse::invalid_request(format!("Invalid request body: {}", e));
            return (StatusCode::BAD_REQUEST, Json(err)).into_response();
        }
    };

    // Resolve anyway so a misconfigured model fails here rather than on the next message
    if let Err(e) = state.config.deployments.resolve(&req.model) {
        return anthropic_error(&state, &e);
    }

    tracing::warn!(model = %req.model, "Token counting is not supported by the backend, returning an estimate");

    Json(TokenCountResponse {
        input_tokens: ESTIMATED_INPUT_TOKENS,
    })
    .into_response()
}

async fn handle_chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatClientRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return chat_error_body(
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                format!("Invalid request body: {}", e),
            );
        }
    };

    tracing::info!(
        model = %req.model,
        messages = req.messages.len(),
        "Chat completions request"
    );

    match proxy::proxy_responses(&req, &state.config, &state.client, &state.logger).await {
        Ok(proxy::RelayResult::Stream(body)) => event_stream_response(body),
        Ok(proxy::RelayResult::Error(status_code, body)) => {
            let status = StatusCode::from_u16(status_code).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
        }
        Err(e) => {
            state.logger.error("server", format!("Proxy error: {}", e));
            let error_type = if e.is_client_error() {
                "invalid_request_error"
            } else {
                "api_error"
            };
            chat_error_body(error_status(&e), error_type, e.to_string())
        }
    }
}

async fn handle_root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": "Anthropic Proxy for Azure OpenAI" }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_models(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut aliases: Vec<(&String, &String)> = state.config.deployments.aliases.iter().collect();
    aliases.sort();

    let models: Vec<serde_json::Value> = aliases
        .into_iter()
        .map(|(name, deployment)| {
            serde_json::json!({
                "id": name,
                "object": "model",
                "owned_by": "azure-openai",
                "deployment": deployment,
            })
        })
        .collect();

    Json(serde_json::json!({ "data": models, "object": "list" }))
}

fn event_stream_response(body: proxy::SseStream) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn error_status(e: &ProxyError) -> StatusCode {
    if e.is_client_error() {
        StatusCode::BAD_REQUEST
    } else if matches!(e, ProxyError::Config { .. }) {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_GATEWAY
    }
}

fn anthropic_error(state: &AppState, e: &ProxyError) -> Response {
    state.logger.error("server", format!("Proxy error: {}", e));
    tracing::error!(error = %e, "Request failed");

    let err = if e.is_client_error() {
        ErrorResponse::invalid_request(e.to_string())
    } else {
        ErrorResponse::api_error(e.to_string())
    };
    (error_status(e), Json(err)).into_response()
}

fn chat_error_body(status: StatusCode, error_type: &str, message: String) -> Response {
    let body = ChatErrorResponse {
        error: ChatError {
            message,
            error_type: error_type.to_string(),
            code: None,
        },
    };
    (status, Json(body)).into_response()
}
