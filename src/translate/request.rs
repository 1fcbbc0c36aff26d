//! Translate Anthropic Messages API requests into Chat Completions requests.
//!
//! Handles system prompts, multi-part content (text, images), tool use, tool results,
//! and tool choice mapping. A single Anthropic message can expand into multiple
//! Chat Completions messages (e.g. a user message with `tool_result` blocks becomes
//! separate `tool`-role messages).

use crate::config::DeploymentConfig;
use crate::error::{ProxyError, Result};

use super::anthropic_types::{
    ContentBlock, Message, MessagesRequest, Role, ToolChoice, ToolResultContent,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatFunction, ChatMessage, ChatTool, ChatToolCall,
    ChatToolCallFunction, ChatToolChoice, ChatToolChoiceFunction, ChatToolChoiceSpecific,
    ContentPart, ImageUrlDetail, StreamOptions,
};

/// Translate an Anthropic Messages API request into a Chat Completions request.
///
/// The client's model string is replaced by the resolved backend deployment; callers
/// keep `req.model` to report it back in the response.
///
/// # Errors
/// `ProxyError::Config` if the model resolves to no deployment, `ProxyError::Translation`
/// if a tool result carries no tool id. Nothing is produced on error.
pub fn anthropic_to_openai(
    req: &MessagesRequest,
    deployments: &DeploymentConfig,
) -> Result<ChatCompletionRequest> {
    let target_model = deployments.resolve(&req.model)?;

    let mut messages = Vec::new();

    if let Some(ref system) = req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(ChatMessage::text("system", text));
        }
    }

    for msg in &req.messages {
        let mut translated = translate_message(msg)?;
        messages.append(&mut translated);
    }

    let tools: Option<Vec<ChatTool>> = req
        .tools
        .as_ref()
        .filter(|tools| !tools.is_empty())
        .map(|tools| {
            tools
                .iter()
                .map(|t| ChatTool {
                    tool_type: "function".to_string(),
                    function: ChatFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: Some(t.input_schema.clone()),
                    },
                })
                .collect()
        });

    // A tool_choice without tools is rejected by the backend.
    let tool_choice = if tools.is_some() {
        req.tool_choice.as_ref().map(translate_tool_choice)
    } else {
        None
    };

    let stream_options = req.stream.filter(|s| *s).map(|_| StreamOptions {
        include_usage: true,
    });

    let user = req.metadata.as_ref().and_then(|m| m.user_id.clone());

    Ok(ChatCompletionRequest {
        model: target_model,
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stream: req.stream,
        stream_options,
        tools,
        tool_choice,
        stop: req.stop_sequences.clone(),
        user,
    })
}

fn translate_message(msg: &Message) -> Result<Vec<ChatMessage>> {
    let blocks = msg.content.blocks();

    match msg.role {
        Role::User => translate_user_message(&blocks),
        Role::Assistant => Ok(translate_assistant_message(&blocks)),
    }
}

fn translate_user_message(blocks: &[ContentBlock]) -> Result<Vec<ChatMessage>> {
    let mut messages = Vec::new();
    let mut content_parts: Vec<ContentPart> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                content_parts.push(ContentPart::Text { text: text.clone() });
            }
            ContentBlock::Image { source } => {
                content_parts.push(ContentPart::ImageUrl {
                    image_url: ImageUrlDetail {
                        url: source.to_url(),
                        detail: None,
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                if tool_use_id.trim().is_empty() {
                    return Err(ProxyError::translation(
                        "tool_result block is missing tool_use_id",
                    ));
                }

                // Keep ordering: text before the tool result stays before it
                if !content_parts.is_empty() {
                    messages.push(user_message(&content_parts));
                    content_parts.clear();
                }

                messages.push(ChatMessage {
                    role: "tool".to_string(),
                    content: Some(ChatContent::Text(tool_result_to_string(
                        content.as_ref(),
                        *is_error,
                    ))),
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::ToolUse { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    if !content_parts.is_empty() {
        messages.push(user_message(&content_parts));
    }

    if messages.is_empty() {
        messages.push(ChatMessage::text("user", String::new()));
    }

    Ok(messages)
}

fn translate_assistant_message(blocks: &[ContentBlock]) -> Vec<ChatMessage> {
    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                text_parts.push(text);
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ChatToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: ChatToolCallFunction {
                        name: name.clone(),
                        arguments: serde_json::to_string(input)
                            .unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            ContentBlock::Thinking { .. }
            | ContentBlock::Image { .. }
            | ContentBlock::ToolResult { .. }
            | ContentBlock::Unsupported => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(ChatContent::Text(text_parts.concat()))
    };

    vec![ChatMessage {
        role: "assistant".to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: None,
    }]
}

fn user_message(parts: &[ContentPart]) -> ChatMessage {
    ChatMessage {
        role: "user".to_string(),
        content: Some(collapse_content_parts(parts)),
        tool_calls: None,
        tool_call_id: None,
    }
}

/// A lone text part is sent as a plain string; anything else stays a part array.
fn collapse_content_parts(parts: &[ContentPart]) -> ChatContent {
    if let [ContentPart::Text { text }] = parts {
        return ChatContent::Text(text.clone());
    }
    ChatContent::Parts(parts.to_vec())
}

fn tool_result_to_string(content: Option<&ToolResultContent>, is_error: Option<bool>) -> String {
    let prefix = if is_error == Some(true) { "ERROR: " } else { "" };

    match content {
        Some(ToolResultContent::Text(t)) => format!("{prefix}{t}"),
        Some(ToolResultContent::Blocks(blocks)) => {
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            format!("{prefix}{text}")
        }
        None => format!("{prefix}(no content)"),
    }
}

fn translate_tool_choice(tc: &ToolChoice) -> ChatToolChoice {
    match tc {
        ToolChoice::Auto => ChatToolChoice::String("auto".to_string()),
        ToolChoice::Any => ChatToolChoice::String("required".to_string()),
        ToolChoice::None => ChatToolChoice::String("none".to_string()),
        ToolChoice::Tool { name } => ChatToolChoice::Specific(ChatToolChoiceSpecific {
            choice_type: "function".to_string(),
            function: ChatToolChoiceFunction { name: name.clone() },
        }),
    }
}
