//! Bearer token authentication for pin requests

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use tracing::debug;

use super::{error::ApiError, AppState};

/// Validates `Authorization: Bearer <token>` against the configured tokens
#[derive(Debug, Clone, Default)]
pub struct BearerAuth {
    tokens: Vec<String>,
}

impl BearerAuth {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.tokens.is_empty()
    }

    /// Check a raw `Authorization` header value
    pub fn validate(&self, header: Option<&str>) -> bool {
        let Some(token) = header.and_then(extract_bearer) else {
            return false;
        };
        self.tokens
            .iter()
            .any(|known| constant_time_compare(token, known))
    }
}

fn extract_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Middleware rejecting requests without a valid bearer token
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !state.auth.validate(header) {
        debug!(path = %request.uri().path(), "Rejected request without valid bearer token");
        return Err(ApiError::Unauthorized("missing or invalid bearer token".to_string()));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_token() {
        let auth = BearerAuth::new(["secret-token".to_string()]);
        assert!(auth.is_configured());
        assert!(auth.validate(Some("Bearer secret-token")));
        assert!(auth.validate(Some("bearer secret-token")));
    }

    #[test]
    fn test_invalid_or_missing_token() {
        let auth = BearerAuth::new(["secret-token".to_string()]);
        assert!(!auth.validate(None));
        assert!(!auth.validate(Some("Bearer wrong")));
        assert!(!auth.validate(Some("Basic secret-token")));
        assert!(!auth.validate(Some("secret-token")));
        assert!(!auth.validate(Some("Bearer ")));
    }

    #[test]
    fn test_no_tokens_rejects_everything() {
        let auth = BearerAuth::new(vec![String::new()]);
        assert!(!auth.is_configured());
        assert!(!auth.validate(Some("Bearer anything")));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("hello", "hello"));
        assert!(!constant_time_compare("hello", "world"));
        assert!(!constant_time_compare("hello", "hell"));
    }
}
