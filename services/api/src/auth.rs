use crate::infra::AppState;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use gatehouse::error::AppError;
use tracing::warn;

/// Extractor for callers holding the configured admin bearer token.
///
/// With no token configured every caller is refused.
pub(crate) struct AdminCaller;

#[async_trait]
impl<S> FromRequestParts<S> for AdminCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let expected = parts
            .extensions
            .get::<AppState>()
            .and_then(|state| state.admin_token.clone())
            .ok_or(AppError::Unauthorized)?;

        let presented = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        if !tokens_match(presented.trim().as_bytes(), expected.as_bytes()) {
            warn!(path = %parts.uri.path(), "admin request with a wrong token");
            return Err(AppError::Unauthorized);
        }
        Ok(AdminCaller)
    }
}

/// Compares without short-circuiting on the first differing byte.
fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    presented.len() == expected.len()
        && presented
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}
