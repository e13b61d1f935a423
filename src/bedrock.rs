//! Bedrock backend client.
//!
//! The orchestrator only sees the narrow [`BedrockBackend`] contract:
//! `converse`, `converse_stream`, `list_models`. The production
//! [`BedrockClient`] speaks HTTP to the Bedrock runtime and control-plane
//! endpoints with bearer-token auth and owns the model-list TTL cache and the
//! resolved-secret cache.

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{ProxyConfig, SecretCache};
use crate::error::{BackendErrorCode, ProxyError, Result};
use crate::translate::bedrock_types::{ConverseRequest, ConverseResponse, ConverseStreamEvent};

const MODEL_CACHE_TTL: Duration = Duration::from_secs(300);

/// Ordered backend stream events, surfaced as they arrive.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ConverseStreamEvent>> + Send>>;

/// The narrow contract the orchestrator depends on. Implemented by the HTTP
/// client in production and by mocks in tests.
pub trait BedrockBackend: Send + Sync {
    fn converse<'a>(&'a self, request: &'a ConverseRequest) -> BoxFuture<'a, Result<ConverseResponse>>;

    fn converse_stream<'a>(&'a self, request: &'a ConverseRequest) -> BoxFuture<'a, Result<EventStream>>;

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>>>;
}

/// HTTP client for the Bedrock runtime and control-plane APIs.
pub struct BedrockClient {
    http: reqwest::Client,
    config: ProxyConfig,
    secrets: SecretCache,
    model_cache: ModelListCache,
}

impl BedrockClient {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.backend.timeout_secs))
            .build()
            .map_err(|e| ProxyError::internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            config,
            secrets: SecretCache::new(),
            model_cache: ModelListCache::new(MODEL_CACHE_TTL),
        })
    }

    /// Whether backend credentials can currently be resolved. Used by the
    /// health endpoint.
    pub fn credentials_available(&self) -> bool {
        self.secrets.get_or_resolve(&self.config).is_ok()
    }

    async fn post_model(&self, model_id: &str, action: &str, body: &ConverseRequest) -> Result<reqwest::Response> {
        let api_key = self.secrets.get_or_resolve(&self.config)?;
        let url = format!("{}/model/{}/{}", self.config.runtime_endpoint(), model_id, action);

        debug!(url = %url, "Calling backend");

        let response = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            // A rejected key may have been rotated; force re-resolution next time
            if status.as_u16() == 401 || status.as_u16() == 403 {
                self.secrets.invalidate();
            }
            return Err(classify_error_response(response).await);
        }

        Ok(response)
    }
}

impl BedrockBackend for BedrockClient {
    fn converse<'a>(&'a self, request: &'a ConverseRequest) -> BoxFuture<'a, Result<ConverseResponse>> {
        Box::pin(async move {
            let response = self.post_model(&request.model_id, "converse", request).await?;
            let parsed: ConverseResponse = response
                .json()
                .await
                .map_err(|e| ProxyError::Server(format!("Failed to parse backend response: {e}")))?;
            Ok(parsed)
        })
    }

    fn converse_stream<'a>(&'a self, request: &'a ConverseRequest) -> BoxFuture<'a, Result<EventStream>> {
        Box::pin(async move {
            let response = self
                .post_model(&request.model_id, "converse-stream", request)
                .await?;
            let byte_stream = response.bytes_stream();
            Ok(Box::pin(event_line_stream(byte_stream)) as EventStream)
        })
    }

    fn list_models(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            if let Some(models) = self.model_cache.get() {
                debug!("Serving model list from cache");
                return Ok(models);
            }

            let api_key = self.secrets.get_or_resolve(&self.config)?;
            let url = format!("{}/foundation-models", self.config.control_endpoint());

            let response = self
                .http
                .get(&url)
                .header("Authorization", format!("Bearer {api_key}"))
                .send()
                .await?;

            if response.status().as_u16() >= 400 {
                return Err(classify_error_response(response).await);
            }

            let listing: FoundationModelListing = response
                .json()
                .await
                .map_err(|e| ProxyError::Server(format!("Failed to parse model listing: {e}")))?;

            let models: Vec<String> = listing
                .model_summaries
                .into_iter()
                .map(|m| m.model_id)
                .filter(|id| id.to_lowercase().contains("nova"))
                .collect();

            self.model_cache.put(models.clone());
            Ok(models)
        })
    }
}

/// Turn an error response into a `ProxyError` using the `x-amzn-errortype`
/// header, the body's `__type` field, or the HTTP status, in that order.
async fn classify_error_response(response: reqwest::Response) -> ProxyError {
    let status = response.status().as_u16();
    let header_type = response
        .headers()
        .get("x-amzn-errortype")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body: BackendErrorBody = response.json().await.unwrap_or_default();

    let code = if let Some(name) = header_type.as_deref().or(body.type_name.as_deref()) {
        BackendErrorCode::from_type_name(name)
    } else {
        match status {
            401 | 403 => BackendErrorCode::AccessDenied,
            429 => BackendErrorCode::Throttling,
            400 => BackendErrorCode::Validation,
            _ => BackendErrorCode::Unmapped,
        }
    };

    let message = body
        .message
        .unwrap_or_else(|| format!("Backend returned status {status}"));

    warn!(status, code = ?code, "Backend error");
    ProxyError::from_backend(code, message)
}

#[derive(Debug, Default, Deserialize)]
struct BackendErrorBody {
    #[serde(alias = "Message")]
    message: Option<String>,
    #[serde(rename = "__type")]
    type_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoundationModelListing {
    #[serde(default)]
    model_summaries: Vec<FoundationModelSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FoundationModelSummary {
    model_id: String,
}

/// Parse the backend's streamed bytes into events: one JSON object per line,
/// optionally prefixed with `data:`.
fn event_line_stream(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Send + 'static,
) -> impl Stream<Item = Result<ConverseStreamEvent>> + Send + 'static {
    async_stream::stream! {
        let mut buffer = String::new();

        tokio::pin!(byte_stream);

        while let Some(chunk_result) = byte_stream.next().await {
            let chunk = match chunk_result {
                Ok(c) => c,
                Err(e) => {
                    yield Err(ProxyError::from(e));
                    break;
                }
            };

            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline_pos) = buffer.find('\n') {
                let line = buffer[..newline_pos].trim().to_string();
                buffer = buffer[newline_pos + 1..].to_string();

                if line.is_empty() {
                    continue;
                }

                let data = line.strip_prefix("data:").map(str::trim).unwrap_or(&line);
                if data == "[DONE]" {
                    return;
                }

                match serde_json::from_str::<ConverseStreamEvent>(data) {
                    Ok(event) => {
                        debug!(event = event.event_name(), "Backend stream event");
                        yield Ok(event);
                    }
                    Err(e) => {
                        debug!(error = %e, "Skipping unparseable stream line");
                    }
                }
            }
        }
    }
}

/// Model-list cache: value plus last-refresh instant, fixed TTL. Readers may
/// briefly see a stale list while another task refreshes it.
pub struct ModelListCache {
    inner: RwLock<Option<(Vec<String>, Instant)>>,
    ttl: Duration,
}

impl ModelListCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            ttl,
        }
    }

    pub fn get(&self) -> Option<Vec<String>> {
        let guard = self.inner.read().ok()?;
        let (models, refreshed_at) = guard.as_ref()?;
        if refreshed_at.elapsed() < self.ttl {
            Some(models.clone())
        } else {
            None
        }
    }

    pub fn put(&self, models: Vec<String>) {
        if let Ok(mut guard) = self.inner.write() {
            *guard = Some((models, Instant::now()));
        }
    }
}
