//! Translate Bedrock Converse responses into OpenAI Chat Completions
//! responses.
//!
//! Conversion is total: any backend response, however incomplete, produces a
//! well-formed client response. Inconsistent payloads degrade to a
//! best-effort fallback instead of failing the request.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use super::bedrock_types::{ContentBlock, ConverseResponse, TokenUsage};
use super::openai_types::{
    ChatCompletionResponse, ChatToolCall, ChatToolCallFunction, ChatUsage, Choice, ChoiceMessage,
};

/// Translate a Bedrock Converse response into an OpenAI Chat Completion
/// response. Pure function: `requested_model` is what the caller originally
/// asked for and is echoed back unchanged.
pub fn bedrock_to_openai(resp: &ConverseResponse, requested_model: &str) -> ChatCompletionResponse {
    let Some(message) = resp.output.as_ref().and_then(|o| o.message.as_ref()) else {
        return fallback_response("No message in backend response", requested_model);
    };

    let mut text_parts: Vec<&str> = Vec::new();
    let mut tool_calls: Vec<ChatToolCall> = Vec::new();

    for block in &message.content {
        match block {
            ContentBlock::Text(text) => text_parts.push(text),
            ContentBlock::ToolUse(tu) => tool_calls.push(ChatToolCall {
                id: tu.tool_use_id.clone(),
                call_type: "function".to_string(),
                function: ChatToolCallFunction {
                    name: tu.name.clone(),
                    arguments: serde_json::to_string(&tu.input).unwrap_or_default(),
                },
            }),
            ContentBlock::Image(_) | ContentBlock::ToolResult(_) => {}
        }
    }

    let content = if text_parts.is_empty() {
        None
    } else {
        Some(text_parts.join("\n"))
    };

    let finish_reason = map_stop_reason(resp.stop_reason.as_deref().unwrap_or("end_turn"));

    ChatCompletionResponse {
        id: response_id(resp),
        object: "chat.completion".to_string(),
        created: now(),
        model: requested_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some(finish_reason.to_string()),
        }],
        usage: convert_usage(resp.usage.as_ref()),
    }
}

/// Map a Bedrock stop reason to an OpenAI finish reason. Unknown reasons
/// degrade to `stop`.
pub fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        "content_filtered" => "content_filter",
        _ => "stop",
    }
}

/// Rename backend token counters into the client protocol's names. Missing
/// usage zeroes every field.
pub fn convert_usage(usage: Option<&TokenUsage>) -> ChatUsage {
    usage.map_or_else(ChatUsage::default, |u| ChatUsage {
        prompt_tokens: u.input_tokens,
        completion_tokens: u.output_tokens,
        total_tokens: u.total_tokens,
    })
}

/// Best-effort response for backend payloads we cannot interpret: a single
/// assistant choice carrying the error text, finish reason `stop`, zero usage.
pub fn fallback_response(reason: &str, requested_model: &str) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-error-{}", now()),
        object: "chat.completion".to_string(),
        created: now(),
        model: requested_model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChoiceMessage {
                role: "assistant".to_string(),
                content: Some(format!("Error: {reason}")),
                tool_calls: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: ChatUsage::default(),
    }
}

/// Response ids look like `chatcmpl-nova-{unix_ts}-{nnnn}` where the suffix is
/// a hash of the backend payload. Uniqueness in practice, not a guarantee.
fn response_id(resp: &ConverseResponse) -> String {
    let mut hasher = DefaultHasher::new();
    serde_json::to_string(resp).unwrap_or_default().hash(&mut hasher);
    format!("chatcmpl-nova-{}-{:04}", now(), hasher.finish() % 10000)
}

fn now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::bedrock_types::*;

    fn make_response(blocks: Vec<ContentBlock>, stop_reason: &str) -> ConverseResponse {
        ConverseResponse {
            output: Some(ConverseOutput {
                message: Some(ConverseMessage {
                    role: "assistant".to_string(),
                    content: blocks,
                }),
            }),
            stop_reason: Some(stop_reason.to_string()),
            usage: Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 20,
                total_tokens: 30,
            }),
        }
    }

    #[test]
    fn test_simple_text_response() {
        let resp = make_response(vec![ContentBlock::Text("Hello!".to_string())], "end_turn");
        let result = bedrock_to_openai(&resp, "gpt-4o");

        assert_eq!(result.object, "chat.completion");
        assert_eq!(result.model, "gpt-4o");
        assert!(result.id.starts_with("chatcmpl-nova-"));
        assert_eq!(result.choices.len(), 1);
        assert_eq!(result.choices[0].message.content.as_deref(), Some("Hello!"));
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage.prompt_tokens, 10);
        assert_eq!(result.usage.completion_tokens, 20);
        assert_eq!(result.usage.total_tokens, 30);
    }

    #[test]
    fn test_multiple_text_blocks_join_with_newline() {
        let resp = make_response(
            vec![
                ContentBlock::Text("First".to_string()),
                ContentBlock::Text("Second".to_string()),
            ],
            "end_turn",
        );
        let result = bedrock_to_openai(&resp, "gpt-4o");
        assert_eq!(
            result.choices[0].message.content.as_deref(),
            Some("First\nSecond")
        );
    }

    #[test]
    fn test_tool_use_response() {
        let resp = make_response(
            vec![ContentBlock::ToolUse(ToolUseBlock {
                tool_use_id: "t1".to_string(),
                name: "get_weather".to_string(),
                input: serde_json::json!({"city": "London"}),
            })],
            "tool_use",
        );
        let result = bedrock_to_openai(&resp, "gpt-4o");

        let choice = &result.choices[0];
        assert_eq!(choice.finish_reason.as_deref(), Some("tool_calls"));
        assert!(choice.message.content.is_none());

        let calls = choice.message.tool_calls.as_ref().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].function.name, "get_weather");
        let args: serde_json::Value = serde_json::from_str(&calls[0].function.arguments).unwrap();
        assert_eq!(args["city"], "London");
    }

    #[test]
    fn test_stop_reason_table() {
        assert_eq!(map_stop_reason("end_turn"), "stop");
        assert_eq!(map_stop_reason("tool_use"), "tool_calls");
        assert_eq!(map_stop_reason("max_tokens"), "length");
        assert_eq!(map_stop_reason("stop_sequence"), "stop");
        assert_eq!(map_stop_reason("content_filtered"), "content_filter");
        assert_eq!(map_stop_reason("anything_else"), "stop");
    }

    #[test]
    fn test_missing_message_yields_fallback() {
        let resp = ConverseResponse {
            output: None,
            stop_reason: None,
            usage: None,
        };
        let result = bedrock_to_openai(&resp, "gpt-4o-mini");

        assert_eq!(result.choices.len(), 1);
        let content = result.choices[0].message.content.as_deref().unwrap();
        assert!(content.starts_with("Error: "));
        assert_eq!(result.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(result.usage.total_tokens, 0);
    }

    #[test]
    fn test_missing_usage_zeroes_counters() {
        let mut resp = make_response(vec![ContentBlock::Text("hi".to_string())], "end_turn");
        resp.usage = None;
        let result = bedrock_to_openai(&resp, "gpt-4o");
        assert_eq!(result.usage.prompt_tokens, 0);
        assert_eq!(result.usage.completion_tokens, 0);
    }

    #[test]
    fn test_usage_totals_are_preserved() {
        let resp = make_response(vec![ContentBlock::Text("hi".to_string())], "end_turn");
        let result = bedrock_to_openai(&resp, "gpt-4o");
        assert_eq!(
            result.usage.total_tokens,
            result.usage.prompt_tokens + result.usage.completion_tokens
        );
    }
}
