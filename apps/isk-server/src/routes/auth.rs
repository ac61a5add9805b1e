use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap},
};

use super::ApiError;
use crate::auth::{Capability, Principal};
use crate::state::AppState;

/// Caller resolved from `Authorization: Bearer` or `?token=`.
#[derive(Clone, Debug)]
pub struct Authenticated(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token(&parts.headers)
            .or_else(|| query_token(parts.uri.query()))
            .ok_or(ApiError::Unauthorized)?;
        state
            .tokens
            .authenticate(&token)
            .map(Authenticated)
            .ok_or(ApiError::Unauthorized)
    }
}

impl Authenticated {
    pub fn require(&self, capability: Capability) -> Result<&Principal, ApiError> {
        self.0.require(capability)?;
        Ok(&self.0)
    }
}

fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|token| token.trim().to_owned())
        .filter(|token| !token.is_empty())
}

fn query_token(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "token")
        .map(|(_, value)| value.into_owned())
        .filter(|token| !token.is_empty())
}
