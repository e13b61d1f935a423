//! Model name resolution and model-list shaping.
//!
//! Callers speak OpenAI model names (`gpt-4o`, `gpt-4o-mini`); the backend
//! speaks Bedrock model ids (`amazon.nova-pro-v1:0`). The [`ModelTable`] is a
//! pure lookup in the client-to-backend direction, with an inversion helper
//! for building the model listing.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One entry in the `/v1/models` listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    pub object: String, // "model"
    pub created: i64,
    pub owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

/// The `/v1/models` response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelListResponse {
    pub object: String, // "list"
    pub data: Vec<ModelEntry>,
}

/// Client-name to backend-id mapping. Unknown names pass through unchanged,
/// so resolution never fails.
#[derive(Debug, Clone)]
pub struct ModelTable {
    map: HashMap<String, String>,
}

impl ModelTable {
    pub fn new(map: HashMap<String, String>) -> Self {
        Self { map }
    }

    /// The shipped Nova mapping: OpenAI tier names onto the Nova family,
    /// plus identity entries so callers may also name the backend ids directly.
    pub fn with_defaults() -> Self {
        Self::new(Self::default_map())
    }

    /// The raw default mapping, for callers that extend it before building a
    /// table.
    #[must_use]
    pub fn default_map() -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("gpt-4o".to_string(), "amazon.nova-pro-v1:0".to_string());
        map.insert(
            "gpt-4o-mini".to_string(),
            "amazon.nova-lite-v1:0".to_string(),
        );
        map.insert(
            "gpt-3.5-turbo".to_string(),
            "amazon.nova-micro-v1:0".to_string(),
        );
        for id in [
            "amazon.nova-pro-v1:0",
            "amazon.nova-lite-v1:0",
            "amazon.nova-micro-v1:0",
        ] {
            map.insert(id.to_string(), id.to_string());
        }
        map
    }

    /// Resolve a client model name to a backend model id.
    /// Names without a mapping pass through unchanged.
    #[must_use]
    pub fn resolve(&self, name: &str) -> String {
        self.map
            .get(name)
            .cloned()
            .unwrap_or_else(|| name.to_string())
    }

    /// Invert the table: backend id to every client name that resolves to it.
    /// Identity entries are excluded; the result is ordered for stable output.
    #[must_use]
    pub fn aliases(&self) -> BTreeMap<String, Vec<String>> {
        let mut inverted: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (client, backend) in &self.map {
            if client != backend {
                inverted.entry(backend.clone()).or_default().push(client.clone());
            }
        }
        for names in inverted.values_mut() {
            names.sort();
        }
        inverted
    }

    /// Shape the `/v1/models` listing: one entry per backend model, plus one
    /// entry per configured alias carrying `root`/`parent` pointing at the
    /// backend model it resolves to.
    #[must_use]
    pub fn model_listing(&self, backend_models: &[String]) -> ModelListResponse {
        let created = chrono::Utc::now().timestamp();
        let mut data: Vec<ModelEntry> = backend_models
            .iter()
            .map(|id| ModelEntry {
                id: id.clone(),
                object: "model".to_string(),
                created,
                owned_by: "amazon-bedrock".to_string(),
                root: None,
                parent: None,
            })
            .collect();

        for (backend, clients) in self.aliases() {
            for client in clients {
                data.push(ModelEntry {
                    id: client,
                    object: "model".to_string(),
                    created,
                    owned_by: "openai-compatible".to_string(),
                    root: Some(backend.clone()),
                    parent: Some(backend.clone()),
                });
            }
        }

        ModelListResponse {
            object: "list".to_string(),
            data,
        }
    }
}

impl Default for ModelTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}
