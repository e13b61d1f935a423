//! End-to-end orchestrator tests against a mock backend.

use bedrock_proxy::auth::AuthManager;
use bedrock_proxy::bedrock::{BedrockBackend, BedrockClient, EventStream};
use bedrock_proxy::error::{BackendErrorCode, ProxyError, Result};
use bedrock_proxy::logging::SharedLogger;
use bedrock_proxy::models::ModelTable;
use bedrock_proxy::proxy::{ProxyOutcome, RequestOrchestrator, Stage};
use bedrock_proxy::translate::bedrock_types::*;
use bedrock_proxy::translate::openai_types::*;
use bedrock_proxy::ProxyConfig;

use axum::http::HeaderMap;
use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Mutex;

/// Scripted backend: records the converted request and replays a canned
/// response, error, or event sequence.
struct MockBackend {
    last_request: Mutex<Option<ConverseRequest>>,
    response: Option<ConverseResponse>,
    events: Vec<ConverseStreamEvent>,
    fail_with: Option<(BackendErrorCode, &'static str)>,
}

impl MockBackend {
    fn replying(response: ConverseResponse) -> Self {
        Self {
            last_request: Mutex::new(None),
            response: Some(response),
            events: Vec::new(),
            fail_with: None,
        }
    }

    fn streaming(events: Vec<ConverseStreamEvent>) -> Self {
        Self {
            last_request: Mutex::new(None),
            response: None,
            events,
            fail_with: None,
        }
    }

    fn failing(code: BackendErrorCode, message: &'static str) -> Self {
        Self {
            last_request: Mutex::new(None),
            response: None,
            events: Vec::new(),
            fail_with: Some((code, message)),
        }
    }

    fn captured_request(&self) -> ConverseRequest {
        self.last_request.lock().unwrap().clone().unwrap()
    }
}

impl BedrockBackend for MockBackend {
    fn converse<'a>(
        &'a self,
        request: &'a ConverseRequest,
    ) -> BoxFuture<'a, Result<ConverseResponse>> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        Box::pin(async move {
            if let Some((code, message)) = self.fail_with {
                return Err(ProxyError::from_backend(code, message));
            }
            Ok(self.response.clone().unwrap())
        })
    }

    fn converse_stream<'a>(
        &'a self,
        request: &'a ConverseRequest,
    ) -> BoxFuture<'a, Result<EventStream>> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        Box::pin(async move {
            if let Some((code, message)) = self.fail_with {
                return Err(ProxyError::from_backend(code, message));
            }
            let events: Vec<Result<ConverseStreamEvent>> =
                self.events.clone().into_iter().map(Ok).collect();
            Ok(Box::pin(futures::stream::iter(events)) as EventStream)
        })
    }

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move { Ok(vec!["amazon.nova-pro-v1:0".to_string()]) })
    }
}

struct Fixture {
    auth: AuthManager,
    models: ModelTable,
    logger: SharedLogger,
    _dir: tempfile::TempDir,
}

impl Fixture {
    fn new(require_auth: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let logger = SharedLogger::new(dir.path().join("test.jsonl")).unwrap();
        Self {
            auth: AuthManager::new(require_auth),
            models: ModelTable::with_defaults(),
            logger,
            _dir: dir,
        }
    }

    fn orchestrator<'a>(
        &'a self,
        backend: &'a MockBackend,
        buffered: bool,
    ) -> RequestOrchestrator<'a> {
        RequestOrchestrator::new(backend, &self.auth, &self.models, &self.logger, buffered)
    }
}

fn chat_request(model: &str, stream: bool) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: Some(ChatContent::Text("You are helpful".to_string())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
            ChatMessage {
                role: "user".to_string(),
                content: Some(ChatContent::Text("Hello".to_string())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            },
        ],
        temperature: Some(0.7),
        max_tokens: Some(256),
        top_p: None,
        stop: None,
        stream: if stream { Some(true) } else { None },
        tools: None,
        tool_choice: None,
        extra: HashMap::new(),
    }
}

fn text_response(text: &str) -> ConverseResponse {
    ConverseResponse {
        output: Some(ConverseOutput {
            message: Some(ConverseMessage {
                role: "assistant".to_string(),
                content: vec![ContentBlock::Text(text.to_string())],
            }),
        }),
        stop_reason: Some("end_turn".to_string()),
        usage: Some(TokenUsage {
            input_tokens: 12,
            output_tokens: 34,
            total_tokens: 46,
        }),
    }
}

#[tokio::test]
async fn test_text_round_trip() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::replying(text_response("Hi there!"));
    let orchestrator = fixture.orchestrator(&backend, false);

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o", false), "req-1")
        .await;

    let ProxyOutcome::Completed(response) = outcome else {
        panic!("expected completed outcome");
    };
    assert_eq!(response.model, "gpt-4o");
    assert_eq!(response.choices[0].message.content.as_deref(), Some("Hi there!"));
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.prompt_tokens, 12);
    assert_eq!(response.usage.completion_tokens, 34);

    // The backend saw the translated request, not the client one
    let sent = backend.captured_request();
    assert_eq!(sent.model_id, "amazon.nova-pro-v1:0");
    assert_eq!(sent.system.unwrap()[0].text, "You are helpful");
    assert_eq!(sent.messages.len(), 1);
    assert_eq!(sent.inference_config.unwrap().max_tokens, Some(256));
}

#[tokio::test]
async fn test_tool_call_round_trip() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::replying(ConverseResponse {
        output: Some(ConverseOutput {
            message: Some(ConverseMessage {
                role: "assistant".to_string(),
                content: vec![ContentBlock::ToolUse(ToolUseBlock {
                    tool_use_id: "t1".to_string(),
                    name: "get_weather".to_string(),
                    input: serde_json::json!({"city": "London"}),
                })],
            }),
        }),
        stop_reason: Some("tool_use".to_string()),
        usage: None,
    });
    let orchestrator = fixture.orchestrator(&backend, false);

    let mut req = chat_request("gpt-4o", false);
    req.tools = Some(vec![ChatTool {
        tool_type: "function".to_string(),
        function: ChatFunction {
            name: "get_weather".to_string(),
            description: None,
            parameters: serde_json::json!({"type": "object"}),
        },
    }]);

    let outcome = orchestrator.handle(&HeaderMap::new(), req, "req-2").await;

    let ProxyOutcome::Completed(response) = outcome else {
        panic!("expected completed outcome");
    };
    assert_eq!(
        response.choices[0].finish_reason.as_deref(),
        Some("tool_calls")
    );
    let calls = response.choices[0].message.tool_calls.as_ref().unwrap();
    assert_eq!(calls[0].function.name, "get_weather");

    let sent = backend.captured_request();
    assert_eq!(sent.tool_config.unwrap().tools[0].tool_spec.name, "get_weather");
}

fn stream_events() -> Vec<ConverseStreamEvent> {
    vec![
        ConverseStreamEvent::MessageStart(MessageStartEvent {
            role: Some("assistant".to_string()),
        }),
        ConverseStreamEvent::ContentBlockStart(ContentBlockStartEvent {
            content_block_index: Some(0),
            start: None,
        }),
        ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: Some(0),
            delta: BlockDelta {
                text: Some("Hel".to_string()),
            },
        }),
        ConverseStreamEvent::ContentBlockDelta(ContentBlockDeltaEvent {
            content_block_index: Some(0),
            delta: BlockDelta {
                text: Some("lo".to_string()),
            },
        }),
        ConverseStreamEvent::ContentBlockStop(ContentBlockStopEvent {
            content_block_index: Some(0),
        }),
        ConverseStreamEvent::MessageStop(MessageStopEvent {
            stop_reason: Some("end_turn".to_string()),
        }),
        ConverseStreamEvent::Metadata(MetadataEvent {
            usage: Some(TokenUsage {
                input_tokens: 3,
                output_tokens: 5,
                total_tokens: 8,
            }),
        }),
    ]
}

#[tokio::test]
async fn test_streaming_forwards_chunks() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::streaming(stream_events());
    let orchestrator = fixture.orchestrator(&backend, false);

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o", true), "req-3")
        .await;

    let ProxyOutcome::Streaming(chunks) = outcome else {
        panic!("expected streaming outcome");
    };
    let chunks: Vec<ChatCompletionChunk> = chunks.collect().await;

    // role, two content deltas, finish, usage
    assert_eq!(chunks.len(), 5);
    assert_eq!(chunks[0].choices[0].delta.role.as_deref(), Some("assistant"));
    assert_eq!(chunks[1].choices[0].delta.content.as_deref(), Some("Hel"));
    assert_eq!(chunks[2].choices[0].delta.content.as_deref(), Some("lo"));
    assert_eq!(chunks[3].choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(chunks[4].usage.as_ref().unwrap().total_tokens, 8);

    // Every chunk carries the same stream id and the requested model name
    assert!(chunks.iter().all(|c| c.id == chunks[0].id));
    assert!(chunks.iter().all(|c| c.model == "gpt-4o"));
}

#[tokio::test]
async fn test_buffered_streaming_synthesizes_one_response() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::streaming(stream_events());
    let orchestrator = fixture.orchestrator(&backend, true);

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o", true), "req-4")
        .await;

    let ProxyOutcome::Completed(response) = outcome else {
        panic!("expected completed outcome");
    };
    assert_eq!(response.object, "chat.completion");
    assert_eq!(response.choices.len(), 1);
    assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    assert_eq!(response.usage.total_tokens, 8);
}

#[tokio::test]
async fn test_buffered_streaming_empty_stream_placeholder() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::streaming(Vec::new());
    let orchestrator = fixture.orchestrator(&backend, true);

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o", true), "req-5")
        .await;

    let ProxyOutcome::Completed(response) = outcome else {
        panic!("expected completed outcome");
    };
    assert_eq!(
        response.choices[0].message.content.as_deref(),
        Some("Stream completed but no content received.")
    );
}

#[tokio::test]
async fn test_backend_throttling_maps_to_rate_limit() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::failing(BackendErrorCode::Throttling, "Too many requests");
    let orchestrator = fixture.orchestrator(&backend, false);

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o", false), "req-6")
        .await;

    let ProxyOutcome::Failed { stage, error } = outcome else {
        panic!("expected failure outcome");
    };
    assert_eq!(stage, Stage::BackendInvoked);
    assert_eq!(error.status_code(), 429);
    assert_eq!(error.error_type(), "rate_limit_error");
}

#[tokio::test]
async fn test_missing_credentials_fail_at_authentication() {
    let fixture = Fixture::new(true);
    let backend = MockBackend::replying(text_response("never reached"));
    let orchestrator = fixture.orchestrator(&backend, false);

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o", false), "req-7")
        .await;

    let ProxyOutcome::Failed { stage, error } = outcome else {
        panic!("expected failure outcome");
    };
    assert_eq!(stage, Stage::Authenticated);
    assert_eq!(error.status_code(), 401);
    assert!(backend.last_request.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_credentialed_request_passes_when_auth_required() {
    let fixture = Fixture::new(true);
    let backend = MockBackend::replying(text_response("ok"));
    let orchestrator = fixture.orchestrator(&backend, false);

    let mut headers = HeaderMap::new();
    headers.insert("authorization", "Bearer a-long-enough-token".parse().unwrap());

    let outcome = orchestrator
        .handle(&headers, chat_request("gpt-4o", false), "req-8")
        .await;
    assert!(matches!(outcome, ProxyOutcome::Completed(_)));
}

#[tokio::test]
async fn test_invalid_temperature_fails_at_validation() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::replying(text_response("never reached"));
    let orchestrator = fixture.orchestrator(&backend, false);

    let mut req = chat_request("gpt-4o", false);
    req.temperature = Some(3.5);

    let outcome = orchestrator.handle(&HeaderMap::new(), req, "req-9").await;

    let ProxyOutcome::Failed { stage, error } = outcome else {
        panic!("expected failure outcome");
    };
    assert_eq!(stage, Stage::Validated);
    assert_eq!(error.status_code(), 400);
    assert!(backend.last_request.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_tool_role_message_fails_at_validation() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::replying(text_response("never reached"));
    let orchestrator = fixture.orchestrator(&backend, false);

    let mut req = chat_request("gpt-4o", false);
    req.messages.push(ChatMessage {
        role: "tool".to_string(),
        content: Some(ChatContent::Text("tool output".to_string())),
        tool_calls: None,
        tool_call_id: Some("call_1".to_string()),
        name: None,
    });

    let outcome = orchestrator.handle(&HeaderMap::new(), req, "req-11").await;

    let ProxyOutcome::Failed { stage, error } = outcome else {
        panic!("expected failure outcome");
    };
    assert_eq!(stage, Stage::Validated);
    assert_eq!(error.status_code(), 400);
    assert!(backend.last_request.lock().unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_model_passes_through_to_backend() {
    let fixture = Fixture::new(false);
    let backend = MockBackend::replying(text_response("ok"));
    let orchestrator = fixture.orchestrator(&backend, false);

    let outcome = orchestrator
        .handle(
            &HeaderMap::new(),
            chat_request("my.custom-model-v2:0", false),
            "req-10",
        )
        .await;

    assert!(matches!(outcome, ProxyOutcome::Completed(_)));
    assert_eq!(backend.captured_request().model_id, "my.custom-model-v2:0");
}

/// Live test against a real Bedrock endpoint. Needs BEDROCK_API_KEY set.
/// Run with: cargo test --test orchestrator_test -- --ignored
#[tokio::test]
#[ignore]
async fn test_live_converse() {
    if std::env::var("BEDROCK_API_KEY").is_err() {
        eprintln!("BEDROCK_API_KEY not set, skipping");
        return;
    }

    let config = ProxyConfig::default();
    let client = BedrockClient::new(config).unwrap();

    let fixture = Fixture::new(false);
    let orchestrator = RequestOrchestrator::new(
        &client,
        &fixture.auth,
        &fixture.models,
        &fixture.logger,
        false,
    );

    let outcome = orchestrator
        .handle(&HeaderMap::new(), chat_request("gpt-4o-mini", false), "live-1")
        .await;

    let ProxyOutcome::Completed(response) = outcome else {
        panic!("expected completed outcome");
    };
    assert!(response.choices[0].message.content.is_some());
}
