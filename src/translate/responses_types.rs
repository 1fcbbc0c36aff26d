//! Wire types for the second client dialect: a Chat Completions request coming in,
//! and the Azure OpenAI Responses API payload going out.
//!
//! Inbound message content stays as raw JSON until translation; clients of this
//! dialect mix OpenAI and Anthropic part shapes freely, so each part is parsed
//! individually with [`ClientContentPart`] and unknown shapes fall back to text.

use serde::{Deserialize, Serialize};

use super::openai_types::{ChatTool, ChatToolCall};

// ---------------------------------------------------------------------------
// Inbound (what the client sends)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatClientRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatClientMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Sampling parameters and anything else; not forwarded.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatClientMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ChatToolCall>>,
}

/// One element of an array-valued `content`. Every field is optional; which
/// ones matter depends on `part_type`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientContentPart {
    #[serde(rename = "type", default)]
    pub part_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image_url: Option<ClientImageUrl>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub source: Option<ClientImageSource>,
    #[serde(default)]
    pub image_base64: Option<String>,
}

/// `image_url` is either a bare string or `{"url": ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ClientImageUrl {
    Url(String),
    Object {
        #[serde(default)]
        url: Option<String>,
    },
}

impl ClientImageUrl {
    pub fn url(&self) -> Option<&str> {
        match self {
            ClientImageUrl::Url(url) => Some(url.as_str()),
            ClientImageUrl::Object { url } => url.as_deref(),
        }
    }
}

/// Anthropic-style image source embedded in a Chat Completions part.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientImageSource {
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Outbound (what we send TO the Responses endpoint)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub stream: bool,
    pub input: Vec<ResponsesInputItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ResponsesTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_cache_key: Option<String>,
    pub reasoning: Reasoning,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reasoning {
    pub effort: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesInputItem {
    Message {
        role: String,
        content: Vec<ResponsesContentPart>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        output: serde_json::Value,
        status: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsesContentPart {
    InputText {
        text: String,
    },
    OutputText {
        text: String,
    },
    InputImage {
        #[serde(skip_serializing_if = "Option::is_none")]
        image_url: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_base64: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String, // "function"
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
    pub strict: bool,
}
