//! Request orchestration.
//!
//! One proxied chat completion moves through a fixed pipeline:
//! authenticate, authorize, validate, convert, invoke the backend, convert
//! back, respond. Each request ends in exactly one terminal outcome; a
//! failure records the stage that did not complete together with its error.
//! No stage retries, and the orchestrator never retries the backend.

use futures::stream::{Stream, StreamExt};
use std::pin::Pin;
use std::time::Instant;
use tracing::info;

use crate::auth::AuthManager;
use crate::bedrock::BedrockBackend;
use crate::error::{ProxyError, Result};
use crate::logging::SharedLogger;
use crate::models::ModelTable;
use crate::translate::openai_types::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::translate::request::openai_to_bedrock;
use crate::translate::response::bedrock_to_openai;
use crate::translate::streaming::StreamAggregator;

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Authenticated,
    Authorized,
    Validated,
    Converted,
    BackendInvoked,
    ConvertedBack,
    Responded,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Authenticated => "authenticated",
            Stage::Authorized => "authorized",
            Stage::Validated => "validated",
            Stage::Converted => "converted",
            Stage::BackendInvoked => "backend_invoked",
            Stage::ConvertedBack => "converted_back",
            Stage::Responded => "responded",
        }
    }
}

/// Client-bound chunk sequence for a forwarded stream.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChatCompletionChunk> + Send>>;

/// The single terminal outcome of one proxied request.
pub enum ProxyOutcome {
    /// A complete non-streaming response (also the buffered-streaming path).
    Completed(ChatCompletionResponse),
    /// A live chunk sequence to forward as SSE.
    Streaming(ChunkStream),
    /// The pipeline stopped; `stage` is the step that did not complete.
    Failed { stage: Stage, error: ProxyError },
}

pub struct RequestOrchestrator<'a> {
    backend: &'a dyn BedrockBackend,
    auth: &'a AuthManager,
    models: &'a ModelTable,
    logger: &'a SharedLogger,
    buffered_streaming: bool,
}

impl<'a> RequestOrchestrator<'a> {
    pub fn new(
        backend: &'a dyn BedrockBackend,
        auth: &'a AuthManager,
        models: &'a ModelTable,
        logger: &'a SharedLogger,
        buffered_streaming: bool,
    ) -> Self {
        Self {
            backend,
            auth,
            models,
            logger,
            buffered_streaming,
        }
    }

    /// Run one chat-completion request through the pipeline.
    pub async fn handle(
        &self,
        headers: &axum::http::HeaderMap,
        request: ChatCompletionRequest,
        request_id: &str,
    ) -> ProxyOutcome {
        let start = Instant::now();

        let auth_result = self.auth.authenticate(headers);
        if !auth_result.authenticated {
            return self.fail(Stage::Authenticated, self.auth.auth_error(&auth_result), request_id);
        }

        if !self.auth.authorize(&auth_result, "chat:completion") {
            return self.fail(Stage::Authorized, self.auth.auth_error(&auth_result), request_id);
        }

        if let Err(e) = validate_request(&request) {
            return self.fail(Stage::Validated, e, request_id);
        }

        let bedrock_request = match openai_to_bedrock(&request, self.models) {
            Ok(r) => r,
            Err(e) => return self.fail(Stage::Converted, e, request_id),
        };

        let streaming = request.stream.unwrap_or(false);
        info!(
            request_id,
            model = %request.model,
            backend_model = %bedrock_request.model_id,
            streaming,
            "Dispatching request"
        );

        if streaming {
            let events = match self.backend.converse_stream(&bedrock_request).await {
                Ok(s) => s,
                Err(e) => return self.fail(Stage::BackendInvoked, e, request_id),
            };
            self.logger.log_backend_call(
                request_id,
                "/converse-stream",
                &bedrock_request.model_id,
                start.elapsed().as_secs_f64() * 1000.0,
            );

            let mut aggregator = StreamAggregator::new(&request.model);

            if self.buffered_streaming {
                // Lambda-era compromise: drain the whole event sequence and
                // answer with one synthesized response.
                let mut events = events;
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            let _ = aggregator.process_event(&event);
                        }
                        Err(e) => return self.fail(Stage::BackendInvoked, e, request_id),
                    }
                }
                let response = aggregator.into_response();
                self.logger
                    .log_response(request_id, 200, start.elapsed().as_secs_f64() * 1000.0);
                return ProxyOutcome::Completed(response);
            }

            let logger = self.logger.clone();
            let request_id = request_id.to_string();
            let chunks = async_stream::stream! {
                let mut events = events;
                while let Some(event) = events.next().await {
                    match event {
                        Ok(event) => {
                            if let Some(chunk) = aggregator.process_event(&event) {
                                yield chunk;
                            }
                        }
                        Err(e) => {
                            // Headers are already out; all we can do is log
                            // and end the stream.
                            logger.error(
                                "orchestrator",
                                format!("Stream aborted [{request_id}]: {e}"),
                            );
                            break;
                        }
                    }
                }
                logger.log_response(&request_id, 200, start.elapsed().as_secs_f64() * 1000.0);
            };
            return ProxyOutcome::Streaming(Box::pin(chunks));
        }

        let backend_response = match self.backend.converse(&bedrock_request).await {
            Ok(r) => r,
            Err(e) => return self.fail(Stage::BackendInvoked, e, request_id),
        };
        self.logger.log_backend_call(
            request_id,
            "/converse",
            &bedrock_request.model_id,
            start.elapsed().as_secs_f64() * 1000.0,
        );

        // Conversion back is total; this stage cannot fail.
        let response = bedrock_to_openai(&backend_response, &request.model);

        self.logger
            .log_response(request_id, 200, start.elapsed().as_secs_f64() * 1000.0);
        ProxyOutcome::Completed(response)
    }

    fn fail(&self, stage: Stage, error: ProxyError, request_id: &str) -> ProxyOutcome {
        self.logger.error(
            "orchestrator",
            format!("Request failed at {} [{}]: {}", stage.name(), request_id, error),
        );
        ProxyOutcome::Failed { stage, error }
    }
}

/// Validate the request's parameter ranges and message shape before any
/// conversion work.
pub fn validate_request(req: &ChatCompletionRequest) -> Result<()> {
    if req.messages.is_empty() {
        return Err(ProxyError::validation("Messages cannot be empty"));
    }

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" | "user" | "assistant" => {}
            other => {
                return Err(ProxyError::validation(format!("Invalid message role: {other}")));
            }
        }
    }

    if let Some(t) = req.temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err(ProxyError::validation(format!(
                "temperature must be between 0 and 2, got {t}"
            )));
        }
    }

    if let Some(m) = req.max_tokens {
        if m <= 0 {
            return Err(ProxyError::validation(format!(
                "max_tokens must be positive, got {m}"
            )));
        }
    }

    if let Some(p) = req.top_p {
        if p <= 0.0 || p > 1.0 {
            return Err(ProxyError::validation(format!(
                "top_p must be in (0, 1], got {p}"
            )));
        }
    }

    Ok(())
}
