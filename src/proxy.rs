use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};
use crate::logging::{single_line, ExchangeEvent, SharedLogger};
use crate::translate::anthropic_types::{ErrorResponse, MessagesRequest, MessagesResponse};
use crate::translate::openai_types::{ChatCompletionResponse, ChatErrorResponse};
use crate::translate::request::anthropic_to_openai;
use crate::translate::response::{openai_error_to_anthropic, openai_to_anthropic};
use crate::translate::responses::chat_to_responses;
use crate::translate::responses_types::ChatClientRequest;
use crate::translate::streaming::translate_stream;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use std::pin::Pin;

/// Outcome of proxying a non-streaming request
pub enum ProxyResult {
    Success(MessagesResponse),
    Error(ErrorResponse, u16),
}

/// Rendered SSE frames, ready to be written to the response body
pub type SseStream = Pin<Box<dyn Stream<Item = std::result::Result<Bytes, std::io::Error>> + Send>>;

/// Outcome of proxying a streaming request. Backend errors that arrive before
/// the first chunk are still reported with their status code.
pub enum StreamResult {
    Stream(SseStream),
    Error(ErrorResponse, u16),
}

/// Outcome of relaying a Responses API call. Error bodies are passed through as-is.
pub enum RelayResult {
    Stream(SseStream),
    Error(u16, Bytes),
}

/// Forward a non-streaming Anthropic request to the Chat Completions deployment.
pub async fn proxy_non_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<ProxyResult> {
    logger.exchange(ExchangeEvent::AnthropicRequest, "proxy", "POST /v1/messages", req);

    let openai_req = anthropic_to_openai(req, &config.deployments)?;
    let response = send_backend(config, client, logger, "chat/completions", &openai_req).await?;

    let status = response.status().as_u16();
    let body = response.text().await.map_err(|e| {
        ProxyError::provider(format!("Failed to read response body: {}", e))
    })?;

    logger.exchange(
        ExchangeEvent::BackendResponse,
        "proxy",
        format!("status={}", status),
        &body,
    );

    if status >= 400 {
        return Ok(ProxyResult::Error(backend_error(&body, status, logger), status));
    }

    let openai_resp: ChatCompletionResponse = serde_json::from_str(&body).map_err(|e| {
        ProxyError::provider(format!(
            "Failed to parse backend response: {}. Body: {}",
            e,
            truncate(&body, 300)
        ))
    })?;

    let anthropic_resp = openai_to_anthropic(&openai_resp, &req.model);

    logger.exchange(
        ExchangeEvent::AnthropicResponse,
        "proxy",
        format!(
            "in={} out={} stop={}",
            anthropic_resp.usage.input_tokens,
            anthropic_resp.usage.output_tokens,
            anthropic_resp.stop_reason.as_deref().unwrap_or("")
        ),
        &anthropic_resp,
    );

    Ok(ProxyResult::Success(anthropic_resp))
}

/// Forward a streaming Anthropic request, returning the translated SSE body.
pub async fn proxy_streaming(
    req: &MessagesRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<StreamResult> {
    logger.exchange(
        ExchangeEvent::AnthropicRequest,
        "proxy",
        "POST /v1/messages (streaming)",
        req,
    );

    let openai_req = anthropic_to_openai(req, &config.deployments)?;
    let response = send_backend(config, client, logger, "chat/completions", &openai_req).await?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.text().await.unwrap_or_default();
        logger.exchange(
            ExchangeEvent::BackendResponse,
            "proxy",
            format!("status={}", status),
            &body,
        );
        return Ok(StreamResult::Error(backend_error(&body, status, logger), status));
    }

    let frames = translate_stream(backend_chunks(response), req.model.clone(), logger.clone());

    let logger = logger.clone();
    let body = frames.enumerate().map(move |(index, frame)| {
        let raw = frame.render();
        logger.exchange(
            ExchangeEvent::AnthropicSseEvent,
            "stream",
            format!("event_index={} {}", index, frame.name()),
            &single_line(&raw),
        );
        Ok::<_, std::io::Error>(Bytes::from(raw))
    });

    Ok(StreamResult::Stream(Box::pin(body)))
}

/// Translate a Chat Completions request to the Responses API and relay the
/// backend's event stream unchanged.
pub async fn proxy_responses(
    req: &ChatClientRequest,
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
) -> Result<RelayResult> {
    logger.exchange(ExchangeEvent::ChatRequest, "proxy", "POST /v1/chat/completions", req);

    let payload = chat_to_responses(req, &config.deployments)?;
    let response = send_backend(config, client, logger, "responses", &payload).await?;

    let status = response.status().as_u16();
    if status >= 400 {
        let body = response.bytes().await.unwrap_or_default();
        logger.exchange(
            ExchangeEvent::BackendResponse,
            "proxy",
            format!("status={}", status),
            &String::from_utf8_lossy(&body),
        );
        return Ok(RelayResult::Error(status, body));
    }

    let body = response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));

    Ok(RelayResult::Stream(Box::pin(body)))
}

async fn send_backend<T: Serialize + ?Sized>(
    config: &ProxyConfig,
    client: &reqwest::Client,
    logger: &SharedLogger,
    operation: &str,
    payload: &T,
) -> Result<reqwest::Response> {
    let api_key = config.resolve_api_key()?;
    let url = config.endpoint_url(operation);

    tracing::info!(%url, "Forwarding to backend");
    logger.info("proxy", format!("POST {}", url));

    client
        .post(&url)
        .header("api-key", api_key)
        .json(payload)
        .send()
        .await
        .map_err(|e| ProxyError::provider(format!("Request to {} failed: {}", operation, e)))
}

/// Decode the backend's SSE body into raw chunk payloads, ending at `[DONE]`.
fn backend_chunks(response: reqwest::Response) -> impl Stream<Item = Result<String>> + Send + 'static {
    async_stream::stream! {
        let events = response.bytes_stream().eventsource();
        futures::pin_mut!(events);

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    let data = event.data.trim();
                    if data == "[DONE]" {
                        break;
                    }
                    if data.is_empty() {
                        continue;
                    }
                    yield Ok(data.to_string());
                }
                Err(e) => {
                    yield Err(ProxyError::provider(format!("Backend stream failed: {}", e)));
                    break;
                }
            }
        }
    }
}

fn backend_error(body: &str, status: u16, logger: &SharedLogger) -> ErrorResponse {
    if let Ok(err) = serde_json::from_str::<ChatErrorResponse>(body) {
        logger.warn("proxy", format!("Backend error status={}: {}", status, err.error.message));
        return openai_error_to_anthropic(&err);
    }

    logger.warn("proxy", format!("Backend error status={}", status));
    ErrorResponse::api_error(format!(
        "Backend returned status {}: {}",
        status,
        truncate(body, 500)
    ))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}
