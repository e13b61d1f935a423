//! Proxy configuration.
//!
//! Loaded from a TOML file found via the standard search paths, with every
//! field defaulted so the proxy also runs with no config file at all. The
//! backend API key is resolved from an environment variable and cached until
//! explicitly invalidated.

use crate::error::{ProxyError, Result};
use crate::models::ModelTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Drain the backend stream and answer with one synthesized response
    /// instead of forwarding SSE chunks.
    #[serde(default)]
    pub buffered_streaming: bool,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub models: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_region")]
    pub region: String,
    /// Override for the runtime endpoint, mainly for tests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_url: Option<String>,
    /// Override for the control-plane endpoint (model listing).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// When false every request runs as the anonymous user.
    #[serde(default)]
    pub require_auth: bool,
}

fn default_port() -> u16 {
    8080
}

fn default_log_file() -> PathBuf {
    PathBuf::from("bedrock-proxy.jsonl")
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_api_key_env() -> String {
    "BEDROCK_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
            runtime_url: None,
            control_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            buffered_streaming: false,
            log_file: default_log_file(),
            backend: BackendConfig::default(),
            auth: AuthConfig::default(),
            models: HashMap::new(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir. A missing file is not
    /// an error; every field has a default.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// The model table: shipped Nova defaults extended (and overridden) by
    /// the `[models]` section.
    #[must_use]
    pub fn model_table(&self) -> ModelTable {
        let mut map = ModelTable::default_map();
        map.extend(self.models.clone());
        ModelTable::new(map)
    }

    /// Runtime endpoint for converse calls.
    #[must_use]
    pub fn runtime_endpoint(&self) -> String {
        self.backend.runtime_url.clone().unwrap_or_else(|| {
            format!("https://bedrock-runtime.{}.amazonaws.com", self.backend.region)
        })
    }

    /// Control-plane endpoint for the foundation-model listing.
    #[must_use]
    pub fn control_endpoint(&self) -> String {
        self.backend
            .control_url
            .clone()
            .unwrap_or_else(|| format!("https://bedrock.{}.amazonaws.com", self.backend.region))
    }

    /// Resolve the backend API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.backend.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your Bedrock API key.",
                self.backend.api_key_env
            ))
        })
    }
}

/// Cache for the resolved backend secret. No TTL; stale entries are removed
/// only by an explicit `invalidate()`.
#[derive(Clone, Default)]
pub struct SecretCache {
    value: Arc<RwLock<Option<String>>>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached secret, resolving it through `config` on a miss.
    pub fn get_or_resolve(&self, config: &ProxyConfig) -> Result<String> {
        if let Ok(guard) = self.value.read() {
            if let Some(ref secret) = *guard {
                return Ok(secret.clone());
            }
        }

        let secret = config.resolve_api_key()?;
        if let Ok(mut guard) = self.value.write() {
            *guard = Some(secret.clone());
        }
        Ok(secret)
    }

    /// Drop the cached secret so the next read resolves it again.
    pub fn invalidate(&self) {
        if let Ok(mut guard) = self.value.write() {
            *guard = None;
        }
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("bedrock-proxy.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("bedrock-proxy")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(
                PathBuf::from(xdg)
                    .join("bedrock-proxy")
                    .join("config.toml"),
            );
        }
        if let Some(home) = dirs_path() {
            paths.push(
                home.join(".config")
                    .join("bedrock-proxy")
                    .join("config.toml"),
            );
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".bedrock-proxy.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
