use super::anthropic_types::{ErrorResponse, MessagesResponse, ResponseContentBlock, Usage};
use super::openai_types::{ChatCompletionResponse, ChatErrorResponse};

/// Translate a Chat Completions response into an Anthropic Messages response.
/// Pure function: `original_model` is the model string the client asked for.
pub fn openai_to_anthropic(resp: &ChatCompletionResponse, original_model: &str) -> MessagesResponse {
    let choice = resp.choices.first();

    let mut content: Vec<ResponseContentBlock> = Vec::new();

    if let Some(c) = choice {
        if let Some(ref text) = c.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = c.message.tool_calls {
            for tc in tool_calls {
                content.push(ResponseContentBlock::ToolUse {
                    id: tc.id.clone(),
                    name: tc.function.name.clone(),
                    input: parse_tool_arguments(&tc.function.name, &tc.function.arguments),
                });
            }
        }
    }

    // Anthropic clients expect at least one content block
    if content.is_empty() {
        content.push(ResponseContentBlock::Text {
            text: String::new(),
        });
    }

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()));

    let usage = resp.usage.as_ref().map_or_else(Usage::default, |u| Usage {
        input_tokens: u.prompt_tokens,
        output_tokens: u.completion_tokens,
        cache_creation_input_tokens: None,
        cache_read_input_tokens: None,
    });

    MessagesResponse {
        id: resp.id.clone(),
        response_type: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason.to_string()),
        stop_sequence: None,
        usage,
    }
}

/// Parse accumulated tool-call arguments, degrading to `{}` when they are not valid JSON.
pub fn parse_tool_arguments(tool_name: &str, arguments: &str) -> serde_json::Value {
    if arguments.trim().is_empty() {
        return serde_json::json!({});
    }

    match serde_json::from_str::<serde_json::Value>(arguments) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(tool = %tool_name, error = %e, "Tool arguments are not valid JSON, using {{}}");
            serde_json::json!({})
        }
    }
}

/// Map a Chat Completions `finish_reason` to an Anthropic `stop_reason`.
pub fn map_finish_reason(reason: Option<&str>) -> &'static str {
    match reason {
        Some("length") => "max_tokens",
        Some("tool_calls") => "tool_use",
        _ => "end_turn",
    }
}

/// Translate a backend error body into an Anthropic error response
pub fn openai_error_to_anthropic(err: &ChatErrorResponse) -> ErrorResponse {
    let error_type = match err.error.error_type.as_str() {
        "invalid_request_error" => "invalid_request_error",
        "rate_limit_error" | "rate_limit_exceeded" => "rate_limit_error",
        _ => match err.error.code.as_deref() {
            Some("429") | Some("rate_limit_exceeded") => "rate_limit_error",
            Some("content_filter") => "invalid_request_error",
            _ => "api_error",
        },
    };

    ErrorResponse::new(error_type, &err.error.message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::openai_types::*;

    fn make_response(content: Option<String>, finish_reason: Option<String>) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: "chatcmpl-abc123".to_string(),
            object: "chat.completion".to_string(),
            created: 0,
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content,
                    tool_calls: None,
                },
                finish_reason,
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 10,
                completion_tokens: 20,
                total_tokens: 30,
            }),
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(Some("Hello!".to_string()), Some("stop".to_string()));
        let result = openai_to_anthropic(&resp, "claude-sonnet-4-20250514");

        assert_eq!(result.id, "chatcmpl-abc123");
        assert_eq!(result.role, "assistant");
        assert_eq!(result.model, "claude-sonnet-4-20250514");
        assert_eq!(result.stop_reason, Some("end_turn".to_string()));
        assert_eq!(result.content.len(), 1);

        if let ResponseContentBlock::Text { text } = &result.content[0] {
            assert_eq!(text, "Hello!");
        } else {
            panic!("Expected text content block");
        }

        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 20);
    }

    #[test]
    fn test_tool_call_response_from_json() {
        let resp: ChatCompletionResponse = serde_json::from_value(serde_json::json!({
            "id": "msg_123",
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "t1",
                        "function": {"name": "calc", "arguments": "{\"value\":\"2+2\"}"}
                    }]
                }
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }))
        .unwrap();

        let result = openai_to_anthropic(&resp, "claude-sonnet-4-20250514");

        assert_eq!(result.id, "msg_123");
        assert_eq!(result.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(result.usage.input_tokens, 10);
        assert_eq!(result.usage.output_tokens, 5);
        assert_eq!(
            result.content,
            vec![ResponseContentBlock::ToolUse {
                id: "t1".to_string(),
                name: "calc".to_string(),
                input: serde_json::json!({"value": "2+2"}),
            }]
        );
    }

    #[test]
    fn test_text_precedes_tool_use() {
        let resp = ChatCompletionResponse {
            id: "chatcmpl-xyz".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ChoiceMessage {
                    role: "assistant".to_string(),
                    content: Some("Let me check.".to_string()),
                    tool_calls: Some(vec![ChatToolCall {
                        id: "call_abc".to_string(),
                        call_type: "function".to_string(),
                        function: ChatToolCallFunction {
                            name: "get_weather".to_string(),
                            arguments: "{\"city\":\"London\"}".to_string(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".to_string()),
            }],
            ..Default::default()
        };

        let result = openai_to_anthropic(&resp, "test-model");

        assert_eq!(result.content.len(), 2);
        assert!(matches!(result.content[0], ResponseContentBlock::Text { .. }));
        if let ResponseContentBlock::ToolUse { id, name, input } = &result.content[1] {
            assert_eq!(id, "call_abc");
            assert_eq!(name, "get_weather");
            assert_eq!(input["city"], "London");
        } else {
            panic!("Expected tool_use content block");
        }
    }

    #[test]
    fn test_unparseable_arguments_degrade_to_empty_object() {
        let mut resp = make_response(None, Some("tool_calls".to_string()));
        resp.choices[0].message.tool_calls = Some(vec![ChatToolCall {
            id: "call_1".to_string(),
            call_type: "function".to_string(),
            function: ChatToolCallFunction {
                name: "search".to_string(),
                arguments: "{\"q\": ".to_string(),
            },
        }]);

        let result = openai_to_anthropic(&resp, "test-model");

        assert_eq!(result.content.len(), 1);
        if let ResponseContentBlock::ToolUse { input, .. } = &result.content[0] {
            assert_eq!(input, &serde_json::json!({}));
        } else {
            panic!("Expected tool_use content block");
        }
    }

    #[test]
    fn test_missing_usage_and_choices_default() {
        let resp = ChatCompletionResponse {
            id: "chatcmpl-empty".to_string(),
            ..Default::default()
        };

        let result = openai_to_anthropic(&resp, "claude-3-haiku");

        assert_eq!(result.usage.input_tokens, 0);
        assert_eq!(result.usage.output_tokens, 0);
        assert_eq!(result.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(result.model, "claude-3-haiku");
    }

    #[test]
    fn test_finish_reason_mapping() {
        assert_eq!(map_finish_reason(Some("stop")), "end_turn");
        assert_eq!(map_finish_reason(Some("length")), "max_tokens");
        assert_eq!(map_finish_reason(Some("tool_calls")), "tool_use");
        assert_eq!(map_finish_reason(Some("content_filter")), "end_turn");
        assert_eq!(map_finish_reason(Some("unknown")), "end_turn");
        assert_eq!(map_finish_reason(None), "end_turn");
    }

    #[test]
    fn test_error_mapping() {
        let err = ChatErrorResponse {
            error: ChatError {
                message: "slow down".to_string(),
                error_type: String::new(),
                code: Some("429".to_string()),
            },
        };

        let mapped = openai_error_to_anthropic(&err);
        assert_eq!(mapped.error_type, "error");
        assert_eq!(mapped.error.error_type, "rate_limit_error");
        assert_eq!(mapped.error.message, "slow down");
    }
}
