//! State machine for translating Chat Completions streaming chunks into Anthropic SSE events.
//!
//! The [`StreamTranslator`] processes chunks one at a time, tracking which content
//! blocks are open, and emits the corresponding Anthropic stream events
//! (`message_start`, `content_block_delta`, ...). Block 0 is always the text block;
//! tool-use blocks are numbered from 1 in the order their backend tool-call index
//! is first seen. [`translate_stream`] drives a translator over a live chunk stream.

use futures::stream::{Stream, StreamExt};

use crate::error::{ProxyError, Result};
use crate::logging::{ExchangeEvent, SharedLogger};

use super::anthropic_types::{
    Delta, DeltaUsage, MessageDeltaBody, MessagesResponse, ResponseContentBlock, StreamEvent, Usage,
};
use super::openai_types::{ChatCompletionChunk, ChunkToolCall};
use super::response::map_finish_reason;

const TEXT_BLOCK_INDEX: usize = 0;

/// One unit of outbound SSE output.
#[derive(Debug, Clone)]
pub enum SseFrame {
    Event(StreamEvent),
    /// The literal `data: [DONE]` terminator.
    Done,
}

impl SseFrame {
    pub fn name(&self) -> &'static str {
        match self {
            SseFrame::Event(event) => event.event_name(),
            SseFrame::Done => "[DONE]",
        }
    }

    /// Render the frame exactly as it goes on the wire.
    pub fn render(&self) -> String {
        match self {
            SseFrame::Event(event) => {
                let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
                format!("event: {}\ndata: {}\n\n", event.event_name(), data)
            }
            SseFrame::Done => "data: [DONE]\n\n".to_string(),
        }
    }

    pub fn as_event(&self) -> Option<&StreamEvent> {
        match self {
            SseFrame::Event(event) => Some(event),
            SseFrame::Done => None,
        }
    }
}

impl From<StreamEvent> for SseFrame {
    fn from(event: StreamEvent) -> Self {
        SseFrame::Event(event)
    }
}

/// Per-request streaming state.
///
/// Usage:
///   let mut translator = StreamTranslator::new("claude-sonnet-4-20250514");
///   let mut frames = translator.start();
///   for chunk in chunks {
///       frames.extend(translator.process_chunk(&chunk));
///   }
///   frames.extend(translator.finish());
#[derive(Debug)]
pub struct StreamTranslator {
    model: String,
    msg_id: String,
    started: bool,
    finished: bool,
    /// Backend index of the tool call most recently seen.
    current_tool_index: Option<u64>,
    /// Append-only (backend index, Anthropic block index) pairs in first-seen order.
    tool_blocks: Vec<(u64, usize)>,
    last_block_index: usize,
    accumulated_text: String,
    text_sent: bool,
    text_closed: bool,
    input_tokens: u64,
    output_tokens: u64,
}

impl StreamTranslator {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            msg_id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            started: false,
            finished: false,
            current_tool_index: None,
            tool_blocks: Vec::new(),
            last_block_index: TEXT_BLOCK_INDEX,
            accumulated_text: String::new(),
            text_sent: false,
            text_closed: false,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    /// The fixed prologue: `message_start`, the text block start, `ping`.
    /// Returns nothing if it was already emitted.
    pub fn start(&mut self) -> Vec<SseFrame> {
        if self.started {
            return Vec::new();
        }
        self.started = true;

        vec![
            self.make_message_start().into(),
            StreamEvent::ContentBlockStart {
                index: TEXT_BLOCK_INDEX,
                content_block: ResponseContentBlock::Text {
                    text: String::new(),
                },
            }
            .into(),
            StreamEvent::Ping.into(),
        ]
    }

    /// Parse one raw backend chunk and process it.
    ///
    /// # Errors
    /// Returns `ProxyError::Translation` if the text is not a chunk. The translator
    /// state is left untouched in that case, so the caller can skip the chunk.
    pub fn process_raw(&mut self, raw: &str) -> Result<Vec<SseFrame>> {
        let chunk: ChatCompletionChunk = serde_json::from_str(raw)
            .map_err(|e| ProxyError::translation(format!("Malformed stream chunk: {e}")))?;
        Ok(self.process_chunk(&chunk))
    }

    /// Process a single streaming chunk, returning zero or more SSE frames.
    pub fn process_chunk(&mut self, chunk: &ChatCompletionChunk) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }

        let mut frames = self.start();

        // Backend usage is cumulative: each report replaces the last
        if let Some(ref usage) = chunk.usage {
            self.input_tokens = usage.prompt_tokens;
            self.output_tokens = usage.completion_tokens;
        }

        let Some(choice) = chunk.choices.first() else {
            return frames;
        };
        let Some(ref delta) = choice.delta else {
            return frames;
        };

        if let Some(text) = delta.text_content().filter(|t| !t.is_empty()) {
            self.accumulated_text.push_str(text);
            if self.current_tool_index.is_none() && !self.text_closed {
                self.text_sent = true;
                frames.push(
                    StreamEvent::ContentBlockDelta {
                        index: TEXT_BLOCK_INDEX,
                        delta: Delta::TextDelta {
                            text: text.to_string(),
                        },
                    }
                    .into(),
                );
            }
        }

        if let Some(tool_calls) = delta.tool_calls.as_ref().filter(|calls| !calls.is_empty()) {
            if self.current_tool_index.is_none() {
                self.close_text_block(&mut frames);
            }

            for tc in tool_calls {
                self.process_tool_fragment(tc, &mut frames);
            }
        }

        if let Some(reason) = choice
            .finish_reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
        {
            frames.extend(self.make_terminal(map_finish_reason(Some(reason))));
        }

        frames
    }

    /// Call when the chunk sequence ends. Emits the terminal sequence with
    /// `end_turn` unless a `finish_reason` already produced one.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }

        let mut frames = self.start();
        frames.extend(self.make_terminal(map_finish_reason(None)));
        frames
    }

    fn process_tool_fragment(&mut self, tc: &ChunkToolCall, frames: &mut Vec<SseFrame>) {
        let block_index = match self.block_index_for(tc.index) {
            Some(index) => index,
            None => {
                self.last_block_index += 1;
                let index = self.last_block_index;
                self.tool_blocks.push((tc.index, index));

                let id = tc
                    .id
                    .clone()
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("toolu_{}", uuid::Uuid::new_v4().simple()));
                let name = tc
                    .function
                    .as_ref()
                    .and_then(|f| f.name.clone())
                    .unwrap_or_default();

                frames.push(
                    StreamEvent::ContentBlockStart {
                        index,
                        content_block: ResponseContentBlock::ToolUse {
                            id,
                            name,
                            input: serde_json::json!({}),
                        },
                    }
                    .into(),
                );
                index
            }
        };
        self.current_tool_index = Some(tc.index);

        // Fragments are forwarded verbatim; the client reassembles them
        if let Some(args) = tc
            .function
            .as_ref()
            .and_then(|f| f.arguments_text())
            .filter(|a| !a.is_empty())
        {
            frames.push(
                StreamEvent::ContentBlockDelta {
                    index: block_index,
                    delta: Delta::InputJsonDelta { partial_json: args },
                }
                .into(),
            );
        }
    }

    fn block_index_for(&self, backend_index: u64) -> Option<usize> {
        self.tool_blocks
            .iter()
            .find(|(seen, _)| *seen == backend_index)
            .map(|(_, block)| *block)
    }

    /// Close block 0, first flushing the accumulated text if no delta was ever sent for it.
    /// Text that arrives while block 0 is open is always forwarded at once, so in
    /// practice the flush finds `text_sent` already set.
    fn close_text_block(&mut self, frames: &mut Vec<SseFrame>) {
        if self.text_closed {
            return;
        }

        if !self.text_sent && !self.accumulated_text.is_empty() {
            frames.push(
                StreamEvent::ContentBlockDelta {
                    index: TEXT_BLOCK_INDEX,
                    delta: Delta::TextDelta {
                        text: self.accumulated_text.clone(),
                    },
                }
                .into(),
            );
            self.text_sent = true;
        }

        frames.push(
            StreamEvent::ContentBlockStop {
                index: TEXT_BLOCK_INDEX,
            }
            .into(),
        );
        self.text_closed = true;
    }

    fn make_message_start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: MessagesResponse {
                id: self.msg_id.clone(),
                response_type: "message".to_string(),
                role: "assistant".to_string(),
                content: Vec::new(),
                model: self.model.clone(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage {
                    input_tokens: 0,
                    output_tokens: 0,
                    cache_creation_input_tokens: Some(0),
                    cache_read_input_tokens: Some(0),
                },
            },
        }
    }

    fn make_terminal(&mut self, stop_reason: &str) -> Vec<SseFrame> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut frames = Vec::new();

        if self.current_tool_index.is_some() {
            for index in 1..=self.last_block_index {
                frames.push(StreamEvent::ContentBlockStop { index }.into());
            }
        }

        self.close_text_block(&mut frames);

        frames.push(
            StreamEvent::MessageDelta {
                delta: MessageDeltaBody {
                    stop_reason: Some(stop_reason.to_string()),
                    stop_sequence: None,
                },
                usage: DeltaUsage {
                    output_tokens: self.output_tokens,
                },
            }
            .into(),
        );
        frames.push(StreamEvent::MessageStop.into());
        frames.push(SseFrame::Done);

        frames
    }
}

/// Drive a [`StreamTranslator`] over a live sequence of raw chunk payloads.
///
/// The output is lazy and strictly ordered with the input. A chunk that fails to
/// parse is logged and skipped. An `Err` item from upstream ends the output
/// without a terminal sequence; a clean end of input produces one with `end_turn`.
/// Dropping the returned stream drops `chunks` with it.
pub fn translate_stream<S>(
    chunks: S,
    model: String,
    logger: SharedLogger,
) -> impl Stream<Item = SseFrame> + Send + 'static
where
    S: Stream<Item = Result<String>> + Send + 'static,
{
    async_stream::stream! {
        let mut translator = StreamTranslator::new(&model);

        for frame in translator.start() {
            yield frame;
        }

        futures::pin_mut!(chunks);
        let mut chunk_index: usize = 0;
        let mut truncated = false;

        while let Some(item) = chunks.next().await {
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::error!(error = %e, "Upstream stream failed, truncating response");
                    logger.error("stream", format!("Upstream stream failed: {e}"));
                    truncated = true;
                    break;
                }
            };

            logger.exchange(
                ExchangeEvent::BackendStreamChunk,
                "stream",
                format!("chunk_index={chunk_index}"),
                &raw,
            );

            match translator.process_raw(&raw) {
                Ok(frames) => {
                    for frame in frames {
                        yield frame;
                    }
                }
                Err(e) => {
                    tracing::warn!(chunk_index, error = %e, "Skipping malformed chunk");
                    logger.exchange(
                        ExchangeEvent::MalformedChunk,
                        "stream",
                        e.to_string(),
                        &serde_json::json!({ "chunk_index": chunk_index, "raw": raw }),
                    );
                }
            }
            chunk_index += 1;

            if translator.is_finished() {
                break;
            }
        }

        if !truncated {
            for frame in translator.finish() {
                yield frame;
            }
        }
    }
}
