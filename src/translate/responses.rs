//! Translate Chat Completions requests into Azure OpenAI Responses API requests.
//!
//! The client picks a reasoning effort through the model name (`gpt-high`,
//! `gpt-low`, ...); the actual deployment always comes from configuration.
//! System and developer messages move into `instructions`, tool traffic becomes
//! `function_call` / `function_call_output` items.

use serde::Deserialize;

use crate::config::DeploymentConfig;
use crate::error::{ProxyError, Result};

use super::openai_types::ChatTool;
use super::responses_types::{
    ChatClientMessage, ChatClientRequest, ClientContentPart, ClientImageSource, Reasoning,
    ResponsesContentPart, ResponsesInputItem, ResponsesRequest, ResponsesTool,
};

const MODEL_PREFIX: &str = "gpt-";
const REASONING_EFFORTS: [&str; 4] = ["high", "medium", "low", "minimal"];
const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/png";

/// Translate a Chat Completions request into a streaming Responses request.
///
/// # Errors
/// `ProxyError::InvalidModel` if the model does not name a known reasoning effort,
/// `ProxyError::Config` if no Responses deployment is configured.
pub fn chat_to_responses(
    req: &ChatClientRequest,
    deployments: &DeploymentConfig,
) -> Result<ResponsesRequest> {
    let effort = reasoning_effort(&req.model)?;
    let deployment = deployments.responses_deployment()?;

    let mut instructions: Vec<&str> = Vec::new();
    let mut input = Vec::new();

    for msg in &req.messages {
        let role = msg.role.to_ascii_lowercase();
        match role.as_str() {
            "system" | "developer" => {
                if let Some(text) = msg.content.as_ref().and_then(|c| c.as_str()) {
                    if !text.trim().is_empty() {
                        instructions.push(text);
                    }
                }
            }
            "tool" => input.push(tool_output_item(msg)),
            _ => {
                input.push(ResponsesInputItem::Message {
                    content: convert_content(&role, msg.content.as_ref()),
                    role,
                });

                if let Some(ref tool_calls) = msg.tool_calls {
                    for tc in tool_calls {
                        input.push(ResponsesInputItem::FunctionCall {
                            call_id: tc.id.clone(),
                            name: tc.function.name.clone(),
                            arguments: tc.function.arguments.clone(),
                        });
                    }
                }
            }
        }
    }

    let tools = req
        .tools
        .as_ref()
        .filter(|t| !t.is_empty())
        .map(|tools| tools.iter().map(convert_tool).collect());

    Ok(ResponsesRequest {
        model: deployment.to_string(),
        stream: true,
        input,
        instructions: if instructions.is_empty() {
            None
        } else {
            Some(instructions.join("\n\n"))
        },
        tools,
        tool_choice: req.tool_choice.clone(),
        prompt_cache_key: req.user.clone(),
        reasoning: Reasoning {
            effort: effort.to_string(),
        },
    })
}

/// Derive the reasoning effort from a client model name such as `gpt-high`.
///
/// # Errors
/// `ProxyError::InvalidModel` for anything outside high, medium, low and minimal.
pub fn reasoning_effort(model: &str) -> Result<&'static str> {
    let trimmed = model.trim();
    let rest = match trimmed.get(..MODEL_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(MODEL_PREFIX) => &trimmed[MODEL_PREFIX.len()..],
        _ => trimmed,
    };
    let effort = rest.trim().to_ascii_lowercase();

    REASONING_EFFORTS
        .iter()
        .find(|e| **e == effort)
        .copied()
        .ok_or_else(|| ProxyError::invalid_model(model))
}

fn tool_output_item(msg: &ChatClientMessage) -> ResponsesInputItem {
    let output = match msg.content {
        None | Some(serde_json::Value::Null) => serde_json::Value::String(String::new()),
        Some(ref value) => value.clone(),
    };

    ResponsesInputItem::FunctionCallOutput {
        call_id: msg.tool_call_id.clone().filter(|id| !id.is_empty()),
        output,
        status: "completed".to_string(),
    }
}

fn convert_content(role: &str, content: Option<&serde_json::Value>) -> Vec<ResponsesContentPart> {
    let mut parts = Vec::new();

    if let Some(serde_json::Value::Array(items)) = content {
        for item in items {
            // Parts that don't parse are skipped; the text fallback below covers them
            let Ok(part) = ClientContentPart::deserialize(item) else {
                continue;
            };
            if let Some(converted) = convert_part(role, &part) {
                parts.push(converted);
            }
        }
    }

    if parts.is_empty() {
        let text = match content {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        };
        parts.push(text_part(role, text));
    }

    parts
}

fn convert_part(role: &str, part: &ClientContentPart) -> Option<ResponsesContentPart> {
    match part.part_type.as_str() {
        "text" => Some(text_part(role, part.text.clone().unwrap_or_default())),
        "input_text" => Some(ResponsesContentPart::InputText {
            text: part.text.clone().unwrap_or_default(),
        }),
        "output_text" => Some(ResponsesContentPart::OutputText {
            text: part.text.clone().unwrap_or_default(),
        }),
        "image_url" | "input_image" | "image" => image_part(part),
        other => {
            tracing::debug!(part_type = %other, "Dropping unsupported content part");
            None
        }
    }
}

fn text_part(role: &str, text: String) -> ResponsesContentPart {
    if role == "assistant" {
        ResponsesContentPart::OutputText { text }
    } else {
        ResponsesContentPart::InputText { text }
    }
}

/// First usable reference wins: `image_url`, `url`, `source`, then `image_base64`.
fn image_part(part: &ClientContentPart) -> Option<ResponsesContentPart> {
    let url = part
        .image_url
        .as_ref()
        .and_then(|u| u.url())
        .map(str::to_string)
        .or_else(|| part.url.clone())
        .or_else(|| part.source.as_ref().and_then(source_url))
        .filter(|u| !u.is_empty());

    if let Some(image_url) = url {
        return Some(ResponsesContentPart::InputImage {
            image_url: Some(image_url),
            image_base64: None,
        });
    }

    part.image_base64
        .clone()
        .filter(|b| !b.is_empty())
        .map(|image_base64| ResponsesContentPart::InputImage {
            image_url: None,
            image_base64: Some(image_base64),
        })
}

fn source_url(source: &ClientImageSource) -> Option<String> {
    if let Some(url) = source.url.as_ref().filter(|u| !u.is_empty()) {
        return Some(url.clone());
    }

    let is_base64 = source.source_type.as_deref().map_or(true, |t| t == "base64");
    let data = source.data.as_ref().filter(|d| !d.is_empty())?;
    if !is_base64 {
        return None;
    }

    let media_type = source
        .media_type
        .as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_IMAGE_MEDIA_TYPE);
    Some(format!("data:{media_type};base64,{data}"))
}

fn convert_tool(tool: &ChatTool) -> ResponsesTool {
    ResponsesTool {
        tool_type: "function".to_string(),
        name: tool.function.name.clone(),
        description: tool.function.description.clone(),
        parameters: tool.function.parameters.clone(),
        strict: false,
    }
}
