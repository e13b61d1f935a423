//! Translate OpenAI Chat Completions requests into Bedrock Converse requests.
//!
//! Handles system-message extraction, multi-part content (text, data-URI
//! images), tool definitions, tool choice, and assistant tool calls.
//! Conversion is deliberately lenient: only a missing model or an empty
//! message list fails the request; malformed sub-fields degrade by dropping
//! the block or omitting the field.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::warn;

use super::bedrock_types::{
    BedrockToolChoice, ContentBlock, ConverseMessage, ConverseRequest, ImageBlock, ImageFormat,
    ImageSource, InferenceConfig, SystemBlock, ToolConfig, ToolEntry, ToolSpec, ToolUseBlock,
};
use super::openai_types::{
    ChatCompletionRequest, ChatContent, ChatMessage, ChatToolChoice, ContentPart,
};
use crate::error::{ProxyError, Result};
use crate::models::ModelTable;

/// Translate an OpenAI Chat Completions request into a Bedrock Converse
/// request. Pure function: takes the request + model table, returns the
/// translated request.
///
/// # Errors
/// Returns `ProxyError::Validation` if the model name or the message list is
/// empty. Everything else degrades instead of failing.
pub fn openai_to_bedrock(
    req: &ChatCompletionRequest,
    models: &ModelTable,
) -> Result<ConverseRequest> {
    if req.model.is_empty() {
        return Err(ProxyError::validation("Missing 'model' in request"));
    }
    if req.messages.is_empty() {
        return Err(ProxyError::validation("Request must contain at least one message"));
    }

    let model_id = models.resolve(&req.model);

    let mut system: Vec<SystemBlock> = Vec::new();
    let mut messages: Vec<ConverseMessage> = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" => {
                let text = msg.content.as_ref().map(ChatContent::as_text).unwrap_or_default();
                if !text.is_empty() {
                    system.push(SystemBlock { text });
                }
            }
            "user" => messages.push(ConverseMessage {
                role: "user".to_string(),
                content: translate_user_content(msg.content.as_ref()),
            }),
            "assistant" => messages.push(ConverseMessage {
                role: "assistant".to_string(),
                content: translate_assistant_content(msg),
            }),
            other => {
                warn!(role = other, "Dropping message with unsupported role");
            }
        }
    }

    let inference_config = translate_inference_config(req);
    let tool_config = req.tools.as_ref().map(|tools| ToolConfig {
        tools: tools
            .iter()
            .filter(|t| t.tool_type == "function")
            .map(|t| ToolEntry {
                tool_spec: ToolSpec {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    input_schema: t.function.parameters.clone(),
                },
            })
            .collect(),
        tool_choice: req.tool_choice.as_ref().and_then(translate_tool_choice),
    });

    Ok(ConverseRequest {
        model_id,
        messages,
        system: if system.is_empty() { None } else { Some(system) },
        inference_config: if inference_config.is_empty() {
            None
        } else {
            Some(inference_config)
        },
        tool_config,
    })
}

fn translate_user_content(content: Option<&ChatContent>) -> Vec<ContentBlock> {
    match content {
        Some(ChatContent::Text(text)) => vec![ContentBlock::Text(text.clone())],
        Some(ChatContent::Parts(parts)) => {
            let mut blocks = Vec::new();
            for part in parts {
                match part {
                    ContentPart::Text { text } => blocks.push(ContentBlock::Text(text.clone())),
                    ContentPart::ImageUrl { image_url } => {
                        if let Some(image) = translate_image_url(&image_url.url) {
                            blocks.push(image);
                        }
                    }
                }
            }
            blocks
        }
        None => vec![ContentBlock::Text(String::new())],
    }
}

fn translate_assistant_content(msg: &ChatMessage) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();

    if let Some(ref content) = msg.content {
        let text = content.as_text();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text(text));
        }
    }

    if let Some(ref tool_calls) = msg.tool_calls {
        for tc in tool_calls {
            if tc.call_type != "function" {
                continue;
            }
            // Arguments arrive as a JSON-encoded string; parse them into
            // structured input. Unparseable arguments are carried as a plain
            // string rather than failing the request.
            let input = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::Value::String(tc.function.arguments.clone()));
            blocks.push(ContentBlock::ToolUse(ToolUseBlock {
                tool_use_id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            }));
        }
    }

    blocks
}

/// Decode a `data:` URI into an image block. Non-data URLs are unsupported
/// and dropped, as are payloads that fail to decode.
fn translate_image_url(url: &str) -> Option<ContentBlock> {
    if !url.starts_with("data:") {
        let prefix: String = url.chars().take(50).collect();
        warn!(url = %prefix, "Dropping non-data image URL");
        return None;
    }

    let (header, data) = url.split_once(";base64,")?;
    let media_type = header.strip_prefix("data:").unwrap_or(header);

    match BASE64.decode(data.as_bytes()) {
        Ok(bytes) => Some(ContentBlock::Image(ImageBlock {
            format: ImageFormat::from_media_type(media_type),
            source: ImageSource { bytes },
        })),
        Err(e) => {
            warn!(error = %e, "Dropping image with undecodable base64 payload");
            None
        }
    }
}

fn translate_inference_config(req: &ChatCompletionRequest) -> InferenceConfig {
    InferenceConfig {
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        top_p: req.top_p,
        stop_sequences: req.stop.as_ref().map(super::openai_types::StopSequences::to_vec),
    }
}

fn translate_tool_choice(tc: &ChatToolChoice) -> Option<BedrockToolChoice> {
    match tc {
        ChatToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(BedrockToolChoice::Auto {}),
            "required" => Some(BedrockToolChoice::Any {}),
            _ => None,
        },
        ChatToolChoice::Specific(spec) => Some(BedrockToolChoice::Tool {
            name: spec.function.name.clone(),
        }),
    }
}
