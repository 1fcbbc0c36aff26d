use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use claude_azure_proxy::config::{BackendConfig, DeploymentConfig, ProxyConfig};
use claude_azure_proxy::logging::{ExchangeEvent, SharedLogger};
use claude_azure_proxy::proxy;
use claude_azure_proxy::translate::anthropic_types::*;
use claude_azure_proxy::translate::streaming::{translate_stream, SseFrame};
use claude_azure_proxy::AppState;
use futures::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

const TEST_KEY_ENV: &str = "CLAUDE_AZURE_PROXY_TEST_KEY";
const TEST_KEY: &str = "test-key";

const STREAM_BODY: &str = concat!(
    "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Let me \"}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"content\":\"check.\"}}]}\n\n",
    "data: not-json\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"function\":{\"name\":\"get_weather\",\"arguments\":\"{\\\"city\\\":\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"London\\\"}\"}}]}}]}\n\n",
    "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}],\"usage\":{\"prompt_tokens\":20,\"completion_tokens\":11}}\n\n",
    "data: [DONE]\n\n",
);

// ────────────────────────────────────────────────────────────────
// Mock Azure backend
// ────────────────────────────────────────────────────────────────

fn backend_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": {"message": message, "type": "invalid_request_error", "code": "DeploymentNotFound"}
        })),
    )
        .into_response()
}

fn has_test_key(headers: &HeaderMap) -> bool {
    headers.get("api-key").and_then(|v| v.to_str().ok()) == Some(TEST_KEY)
}

async fn mock_chat_completions(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    if !has_test_key(&headers) {
        return backend_error(StatusCode::UNAUTHORIZED, "Access denied due to invalid subscription key.");
    }
    if body["model"] == "missing-deployment" {
        return backend_error(StatusCode::NOT_FOUND, "The API deployment for this resource does not exist.");
    }

    if body["stream"] == true {
        assert_eq!(body["stream_options"]["include_usage"], true);
        return ([(header::CONTENT_TYPE, "text/event-stream")], STREAM_BODY).into_response();
    }

    Json(serde_json::json!({
        "id": "chatcmpl-mock",
        "object": "chat.completion",
        "model": body["model"],
        "choices": [{
            "index": 0,
            "finish_reason": "tool_calls",
            "message": {
                "role": "assistant",
                "content": "",
                "tool_calls": [{
                    "id": "t1",
                    "type": "function",
                    "function": {"name": "calc", "arguments": "{\"value\":\"2+2\"}"}
                }]
            }
        }],
        "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
    }))
    .into_response()
}

async fn mock_responses(headers: HeaderMap, Json(body): Json<serde_json::Value>) -> Response {
    if !has_test_key(&headers) {
        return backend_error(StatusCode::UNAUTHORIZED, "Access denied due to invalid subscription key.");
    }

    let created = serde_json::json!({
        "type": "response.created",
        "model": body["model"],
        "effort": body["reasoning"]["effort"],
        "instructions": body["instructions"],
    });
    let sse = format!(
        "event: response.created\ndata: {}\n\nevent: response.completed\ndata: {{\"type\":\"response.completed\"}}\n\n",
        created
    );
    ([(header::CONTENT_TYPE, "text/event-stream")], sse).into_response()
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn spawn_backend() -> SocketAddr {
    let app = Router::new()
        .route("/chat/completions", post(mock_chat_completions))
        .route("/responses", post(mock_responses));
    spawn(app).await
}

fn test_config(backend: SocketAddr) -> ProxyConfig {
    std::env::set_var(TEST_KEY_ENV, TEST_KEY);

    let mut aliases = HashMap::new();
    aliases.insert("claude-sonnet-4-20250514".to_string(), "gpt-4o".to_string());
    aliases.insert("claude-broken".to_string(), "missing-deployment".to_string());

    ProxyConfig {
        port: 0,
        auth_token_env: None,
        backend: BackendConfig {
            base_url: format!("http://{backend}"),
            api_key_env: TEST_KEY_ENV.to_string(),
            api_version: None,
            timeout_secs: 30,
        },
        deployments: DeploymentConfig {
            aliases,
            default: None,
            responses: Some("gpt-5".to_string()),
        },
    }
}

async fn spawn_proxy(config: ProxyConfig, auth_token: Option<&str>) -> (SocketAddr, SharedLogger) {
    let logger = SharedLogger::in_memory();
    let state = Arc::new(AppState {
        config,
        client: reqwest::Client::new(),
        logger: logger.clone(),
        auth_token: auth_token.map(String::from),
    });
    (spawn(claude_azure_proxy::build_router(state)).await, logger)
}

fn simple_request(model: &str, prompt: &str) -> MessagesRequest {
    MessagesRequest {
        model: model.to_string(),
        max_tokens: 50,
        messages: vec![Message {
            role: Role::User,
            content: MessageContent::Text(prompt.to_string()),
        }],
        system: Some(SystemContent::Text(
            "You are a helpful assistant. Respond very briefly.".to_string(),
        )),
        temperature: Some(0.0),
        ..Default::default()
    }
}

fn event_names(body: &str) -> Vec<String> {
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| match frame.strip_prefix("event: ") {
            Some(rest) => rest.lines().next().unwrap_or("").to_string(),
            None => frame.to_string(),
        })
        .collect()
}

// ────────────────────────────────────────────────────────────────
// Cross-module tests (no backend needed)
// ────────────────────────────────────────────────────────────────

#[test]
fn test_request_translation_keeps_client_model_separate() {
    let req = simple_request("claude-sonnet-4-20250514", "Hello");
    let config = test_config("127.0.0.1:1".parse().unwrap());

    let openai_req =
        claude_azure_proxy::translate::request::anthropic_to_openai(&req, &config.deployments)
            .unwrap();

    assert_eq!(openai_req.model, "gpt-4o");
    assert_eq!(req.model, "claude-sonnet-4-20250514");
    assert_eq!(openai_req.messages.len(), 2);
    assert_eq!(openai_req.messages[0].role, "system");
    assert_eq!(openai_req.messages[1].role, "user");
    assert_eq!(openai_req.max_tokens, Some(50));
}

#[test]
fn test_translate_stream_over_raw_chunks() {
    let chunks = futures::stream::iter(vec![
        Ok(r#"{"choices":[{"delta":{"tool_calls":[{"index":2,"id":"a","function":{"name":"f","arguments":"{"}}]}}]}"#.to_string()),
        Ok(r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"b","function":{"name":"g","arguments":"{"}}]}}]}"#.to_string()),
        Ok(r#"{"choices":[{"delta":{"tool_calls":[{"index":2,"function":{"arguments":"}"}}]}}]}"#.to_string()),
    ]);

    let frames: Vec<SseFrame> = tokio_test::block_on(
        translate_stream(chunks, "claude-sonnet-4-20250514".to_string(), SharedLogger::in_memory())
            .collect(),
    );

    let tool_delta_indices: Vec<usize> = frames
        .iter()
        .filter_map(SseFrame::as_event)
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { .. },
            } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(tool_delta_indices, vec![1, 2, 1]);

    let body: String = frames.iter().map(SseFrame::render).collect();
    assert!(body.starts_with("event: message_start\ndata: "));
    assert!(body.contains("\"stop_reason\":\"end_turn\""));
    assert!(body.ends_with("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\ndata: [DONE]\n\n"));
}

// ────────────────────────────────────────────────────────────────
// Server round trips against the mock backend
// ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_public_routes() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), Some("secret")).await;
    let client = reqwest::Client::new();

    let root: serde_json::Value = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["message"], "Anthropic Proxy for Azure OpenAI");

    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), 200);

    let models: serde_json::Value = client
        .get(format!("http://{addr}/v1/models"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(models["object"], "list");
    assert_eq!(models["data"][0]["id"], "claude-broken");
    assert_eq!(models["data"][1]["deployment"], "gpt-4o");
}

#[tokio::test]
async fn test_bearer_auth() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), Some("secret")).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/v1/messages/count_tokens");
    let body = serde_json::json!({"model": "claude-sonnet-4-20250514", "messages": []});

    let missing = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(missing.status(), 401);
    let missing: serde_json::Value = missing.json().await.unwrap();
    assert_eq!(missing["message"], "Missing Authorization header.");

    let basic = client
        .post(&url)
        .header("Authorization", "Basic c2VjcmV0")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(basic.status(), 401);

    let wrong = client.post(&url).bearer_auth("nope").json(&body).send().await.unwrap();
    assert_eq!(wrong.status(), 403);

    let ok = client
        .post(&url)
        .header("Authorization", "bearer secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status(), 200);
    let counted: serde_json::Value = ok.json().await.unwrap();
    assert_eq!(counted["input_tokens"], 1000);
}

#[tokio::test]
async fn test_count_tokens_surfaces_configuration_error() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages/count_tokens"))
        .json(&serde_json::json!({"model": "claude-unknown", "messages": []}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 500);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["type"], "api_error");
}

#[tokio::test]
async fn test_non_streaming_roundtrip() {
    let backend = spawn_backend().await;
    let (addr, logger) = spawn_proxy(test_config(backend), None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&simple_request("claude-sonnet-4-20250514", "What is 2+2?"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["id"], "chatcmpl-mock");
    assert_eq!(body["model"], "claude-sonnet-4-20250514");
    assert_eq!(body["stop_reason"], "tool_use");
    assert_eq!(body["usage"]["input_tokens"], 10);
    assert_eq!(body["usage"]["output_tokens"], 5);
    assert_eq!(body["content"][0]["type"], "tool_use");
    assert_eq!(body["content"][0]["name"], "calc");
    assert_eq!(body["content"][0]["input"]["value"], "2+2");

    let events: Vec<Option<ExchangeEvent>> =
        logger.recent(100).into_iter().map(|e| e.event_type).collect();
    assert!(events.contains(&Some(ExchangeEvent::AnthropicRequest)));
    assert!(events.contains(&Some(ExchangeEvent::BackendResponse)));
    assert!(events.contains(&Some(ExchangeEvent::AnthropicResponse)));
}

#[tokio::test]
async fn test_streaming_roundtrip() {
    let backend = spawn_backend().await;
    let (addr, logger) = spawn_proxy(test_config(backend), None).await;

    let mut req = simple_request("claude-sonnet-4-20250514", "Weather in London?");
    req.stream = Some(true);

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .json(&req)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let body = resp.text().await.unwrap();
    assert_eq!(
        event_names(&body),
        vec![
            "message_start",
            "content_block_start",
            "ping",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
            "data: [DONE]",
        ]
    );
    assert!(body.contains("\"model\":\"claude-sonnet-4-20250514\""));
    assert!(body.contains("\"partial_json\":\"{\\\"city\\\":\""));
    assert!(body.contains("\"stop_reason\":\"tool_use\""));
    assert!(body.contains("\"output_tokens\":11"));

    let entries = logger.recent(200);
    assert!(entries
        .iter()
        .any(|e| e.event_type == Some(ExchangeEvent::MalformedChunk)));
    assert_eq!(
        entries
            .iter()
            .filter(|e| e.event_type == Some(ExchangeEvent::AnthropicSseEvent))
            .count(),
        13
    );
}

#[tokio::test]
async fn test_backend_error_is_reexpressed() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), None).await;

    for stream in [false, true] {
        let mut req = simple_request("claude-broken", "hi");
        req.stream = Some(stream);

        let resp = reqwest::Client::new()
            .post(format!("http://{addr}/v1/messages"))
            .json(&req)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 404);
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }
}

#[tokio::test]
async fn test_invalid_request_body() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/messages"))
        .header("content-type", "application/json")
        .body("{\"model\": 42}")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_chat_completions_relays_responses_stream() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "gpt-high",
            "stream": true,
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "hi"}
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let body = resp.text().await.unwrap();
    assert!(body.starts_with("event: response.created\ndata: "));
    assert!(body.contains("\"model\":\"gpt-5\""));
    assert!(body.contains("\"effort\":\"high\""));
    assert!(body.contains("\"instructions\":\"Be terse.\""));
    assert!(body.ends_with("event: response.completed\ndata: {\"type\":\"response.completed\"}\n\n"));
}

#[tokio::test]
async fn test_chat_completions_rejects_unknown_effort() {
    let backend = spawn_backend().await;
    let (addr, _) = spawn_proxy(test_config(backend), None).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{addr}/v1/chat/completions"))
        .json(&serde_json::json!({
            "model": "gpt-extreme",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("gpt-extreme"));
}

// ────────────────────────────────────────────────────────────────
// Live tests (need AZURE_OPENAI_API_KEY and a deployment)
// ────────────────────────────────────────────────────────────────

fn live_config() -> ProxyConfig {
    let base_url = std::env::var("AZURE_OPENAI_BASE_URL")
        .expect("AZURE_OPENAI_BASE_URL must point at <resource>.openai.azure.com/openai/v1");
    let deployment =
        std::env::var("AZURE_OPENAI_DEPLOYMENT").unwrap_or_else(|_| "gpt-4o".to_string());

    ProxyConfig {
        port: 0,
        auth_token_env: None,
        backend: BackendConfig {
            base_url,
            api_key_env: "AZURE_OPENAI_API_KEY".to_string(),
            api_version: std::env::var("AZURE_OPENAI_API_VERSION").ok(),
            timeout_secs: 120,
        },
        deployments: DeploymentConfig {
            aliases: HashMap::new(),
            default: Some(deployment),
            responses: std::env::var("AZURE_OPENAI_RESPONSES_DEPLOYMENT").ok(),
        },
    }
}

#[tokio::test]
#[ignore = "requires AZURE_OPENAI_API_KEY"]
async fn test_non_streaming_azure() {
    let config = live_config();
    let client = reqwest::Client::new();
    let logger = SharedLogger::in_memory();
    let req = simple_request("claude-sonnet-4-20250514", "Say 'hello' and nothing else.");

    match proxy::proxy_non_streaming(&req, &config, &client, &logger).await {
        Ok(proxy::ProxyResult::Success(resp)) => {
            assert_eq!(resp.response_type, "message");
            assert_eq!(resp.model, "claude-sonnet-4-20250514");
            assert!(!resp.content.is_empty());
            println!("Response: {:?}", resp.content);
        }
        Ok(proxy::ProxyResult::Error(err, status)) => panic!("Backend error ({status}): {err:?}"),
        Err(e) => panic!("Proxy error: {e}"),
    }
}

#[tokio::test]
#[ignore = "requires AZURE_OPENAI_API_KEY"]
async fn test_streaming_azure() {
    let config = live_config();
    let client = reqwest::Client::new();
    let logger = SharedLogger::in_memory();
    let mut req = simple_request("claude-sonnet-4-20250514", "Count from 1 to 5.");
    req.stream = Some(true);

    let stream = match proxy::proxy_streaming(&req, &config, &client, &logger).await {
        Ok(proxy::StreamResult::Stream(stream)) => stream,
        Ok(proxy::StreamResult::Error(err, status)) => panic!("Backend error ({status}): {err:?}"),
        Err(e) => panic!("Proxy error: {e}"),
    };

    let body: String = stream
        .filter_map(|chunk| async move { chunk.ok() })
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .collect::<Vec<_>>()
        .await
        .concat();

    let names = event_names(&body);
    println!("Stream events: {names:?}");
    assert_eq!(&names[..3], &["message_start", "content_block_start", "ping"]);
    assert!(names.contains(&"content_block_delta".to_string()));
    assert_eq!(names.last().map(String::as_str), Some("data: [DONE]"));
}
