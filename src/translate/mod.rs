//! API translation between Anthropic and Azure `OpenAI` formats.
//!
//! The core of the proxy: converts requests, responses, and streaming events
//! between the wire formats. Request and response translation is pure; the
//! streaming translator owns per-request state and nothing else.

pub mod anthropic_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod responses;
pub mod responses_types;
pub mod streaming;
