//! Authentication and authorization.
//!
//! Two credential forms: a bearer token in `Authorization` or an API key in
//! `X-API-Key`. Identity is derived from a SHA-256 digest of the credential,
//! so the same key always maps to the same user id without storing keys.
//! When `require_auth` is off every request runs as the anonymous user and
//! authorization always passes.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::ProxyError;

/// Permissions granted to every credentialed caller.
const DEFAULT_PERMISSIONS: &[&str] = &["chat:completion", "models:list"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    BearerToken,
    None,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub permissions: Vec<String>,
    pub error_message: Option<String>,
    pub method: AuthMethod,
}

impl AuthResult {
    fn success(user_id: String, permissions: Vec<String>, method: AuthMethod) -> Self {
        Self {
            authenticated: true,
            user_id: Some(user_id),
            permissions,
            error_message: None,
            method,
        }
    }

    fn failure(message: &str, method: AuthMethod) -> Self {
        Self {
            authenticated: false,
            user_id: None,
            permissions: Vec::new(),
            error_message: Some(message.to_string()),
            method,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthManager {
    require_auth: bool,
}

impl AuthManager {
    pub fn new(require_auth: bool) -> Self {
        Self { require_auth }
    }

    /// Authenticate a request from its headers.
    pub fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        if !self.require_auth {
            debug!("Authentication disabled, allowing request");
            return AuthResult::success(
                "anonymous".to_string(),
                default_permissions(),
                AuthMethod::None,
            );
        }

        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        let api_key = headers.get("x-api-key").and_then(|v| v.to_str().ok());

        match (bearer, api_key) {
            (Some(token), _) => self.authenticate_bearer(token),
            (None, Some(key)) => self.authenticate_api_key(key),
            (None, None) => {
                AuthResult::failure("No authentication credentials provided", AuthMethod::None)
            }
        }
    }

    fn authenticate_bearer(&self, token: &str) -> AuthResult {
        if token.len() < 10 {
            return AuthResult::failure("Token too short", AuthMethod::BearerToken);
        }

        let user_id = sha256_prefix(token, 12);
        debug!(user_id = %user_id, "Bearer token authentication successful");
        AuthResult::success(user_id, default_permissions(), AuthMethod::BearerToken)
    }

    fn authenticate_api_key(&self, api_key: &str) -> AuthResult {
        if !valid_api_key_format(api_key) {
            return AuthResult::failure("Invalid API key format", AuthMethod::ApiKey);
        }

        let user_id = sha256_prefix(api_key, 16);
        debug!(user_id = %user_id, "API key authentication successful");
        AuthResult::success(user_id, default_permissions(), AuthMethod::ApiKey)
    }

    /// Authorize an action for an authenticated caller. Matches the exact
    /// permission, the `namespace:*` wildcard, or `admin:*`.
    pub fn authorize(&self, auth: &AuthResult, action: &str) -> bool {
        if !self.require_auth {
            return true;
        }
        if !auth.authenticated {
            return false;
        }

        if auth.permissions.iter().any(|p| p == action) {
            return true;
        }

        if let Some((namespace, _)) = action.split_once(':') {
            let wildcard = format!("{namespace}:*");
            if auth.permissions.iter().any(|p| *p == wildcard) {
                return true;
            }
        }

        if auth.permissions.iter().any(|p| p == "admin:*") {
            return true;
        }

        warn!(
            action,
            user_id = auth.user_id.as_deref().unwrap_or("unknown"),
            "Action not authorized"
        );
        false
    }

    /// Build the error for a failed authentication or authorization: 401 when
    /// no valid identity was established, 403 when the identity lacks the
    /// permission.
    pub fn auth_error(&self, auth: &AuthResult) -> ProxyError {
        if auth.authenticated {
            ProxyError::authorization("Insufficient permissions")
        } else {
            ProxyError::authentication(
                auth.error_message
                    .as_deref()
                    .unwrap_or("Authentication required"),
            )
        }
    }
}

fn default_permissions() -> Vec<String> {
    DEFAULT_PERMISSIONS.iter().map(|s| (*s).to_string()).collect()
}

fn valid_api_key_format(api_key: &str) -> bool {
    if api_key.len() < 20 {
        return false;
    }
    if api_key.starts_with("sk-") || api_key.starts_with("pk-") || api_key.starts_with("ak-") {
        return true;
    }
    api_key.len() >= 32
        && api_key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn sha256_prefix(input: &str, len: usize) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..len].to_string()
}
