//! Aggregation of Bedrock Converse stream events into OpenAI streaming chunks.
//!
//! The [`StreamAggregator`] processes `ConverseStreamEvent`s one at a time in
//! arrival order, emitting at most one `chat.completion.chunk` per event. It
//! also accumulates enough state to synthesize a single non-streaming
//! response afterwards, for callers that want the stream drained instead of
//! forwarded.

use super::bedrock_types::{ConverseStreamEvent, TokenUsage};
use super::openai_types::{
    ChatCompletionChunk, ChatCompletionResponse, ChatUsage, Choice, ChoiceMessage, ChunkChoice,
    ChunkDelta,
};
use super::response::map_stop_reason;

/// Per-stream translation state.
///
/// Usage:
///   let mut aggregator = StreamAggregator::new("gpt-4o");
///   for event in events {
///       if let Some(chunk) = aggregator.process_event(&event) {
///           // send as SSE
///       }
///   }
///   // or, when buffering: let response = aggregator.into_response();
#[derive(Debug)]
pub struct StreamAggregator {
    model: String,
    stream_id: String,
    created: u64,
    usage: ChatUsage,
    saw_usage: bool,
    final_chunk: Option<ChatCompletionChunk>,
}

impl StreamAggregator {
    pub fn new(requested_model: &str) -> Self {
        let created = chrono::Utc::now().timestamp().max(0) as u64;
        Self {
            model: requested_model.to_string(),
            stream_id: format!("chatcmpl-nova-stream-{created}"),
            created,
            usage: ChatUsage::default(),
            saw_usage: false,
            final_chunk: None,
        }
    }

    /// Process a single backend stream event, returning at most one client
    /// chunk. Block start/stop markers produce nothing.
    pub fn process_event(&mut self, event: &ConverseStreamEvent) -> Option<ChatCompletionChunk> {
        match event {
            ConverseStreamEvent::MessageStart(_) => Some(self.make_chunk(
                ChunkDelta {
                    role: Some("assistant".to_string()),
                    content: None,
                },
                None,
            )),
            ConverseStreamEvent::ContentBlockDelta(delta) => {
                let text = delta.delta.text.as_ref()?;
                Some(self.make_chunk(
                    ChunkDelta {
                        role: None,
                        content: Some(text.clone()),
                    },
                    None,
                ))
            }
            ConverseStreamEvent::MessageStop(stop) => {
                let reason = map_stop_reason(stop.stop_reason.as_deref().unwrap_or("end_turn"));
                let chunk = self.make_chunk(ChunkDelta::default(), Some(reason.to_string()));
                self.final_chunk = Some(chunk.clone());
                Some(chunk)
            }
            ConverseStreamEvent::Metadata(meta) => {
                let usage = meta.usage.as_ref()?;
                self.accumulate_usage(usage);
                Some(ChatCompletionChunk {
                    id: self.stream_id.clone(),
                    object: "chat.completion.chunk".to_string(),
                    created: self.created,
                    model: self.model.clone(),
                    choices: Vec::new(),
                    usage: Some(self.usage.clone()),
                })
            }
            ConverseStreamEvent::ContentBlockStart(_) | ConverseStreamEvent::ContentBlockStop(_) => {
                None
            }
        }
    }

    /// Synthesize a single non-streaming response from the drained stream:
    /// the last finish-reason-carrying chunk becomes the message, with the
    /// usage accumulated across every metadata event. A stream that never
    /// finished yields a placeholder assistant message.
    pub fn into_response(self) -> ChatCompletionResponse {
        let Some(final_chunk) = self.final_chunk else {
            return ChatCompletionResponse {
                id: self.stream_id,
                object: "chat.completion".to_string(),
                created: self.created,
                model: self.model,
                choices: vec![Choice {
                    index: 0,
                    message: ChoiceMessage {
                        role: "assistant".to_string(),
                        content: Some("Stream completed but no content received.".to_string()),
                        tool_calls: None,
                    },
                    finish_reason: Some("stop".to_string()),
                }],
                usage: ChatUsage::default(),
            };
        };

        let choices = final_chunk
            .choices
            .into_iter()
            .map(|c| Choice {
                index: c.index,
                message: ChoiceMessage {
                    role: c.delta.role.unwrap_or_else(|| "assistant".to_string()),
                    content: c.delta.content,
                    tool_calls: None,
                },
                finish_reason: c.finish_reason.or_else(|| Some("stop".to_string())),
            })
            .collect();

        ChatCompletionResponse {
            id: final_chunk.id,
            object: "chat.completion".to_string(),
            created: final_chunk.created,
            model: final_chunk.model,
            choices,
            usage: if self.saw_usage {
                self.usage
            } else {
                ChatUsage::default()
            },
        }
    }

    fn accumulate_usage(&mut self, usage: &TokenUsage) {
        self.saw_usage = true;
        self.usage.prompt_tokens += usage.input_tokens;
        self.usage.completion_tokens += usage.output_tokens;
        self.usage.total_tokens += usage.total_tokens;
    }

    fn make_chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.stream_id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
            usage: None,
        }
    }
}
