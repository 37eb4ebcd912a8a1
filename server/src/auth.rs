//! Resolves the calling principal from the `x-user-id` header.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use chapterflow::Principal;

use crate::error::ApiError;
use crate::routes::AppState;

pub const USER_HEADER: &str = "x-user-id";

/// Extractor for handlers that need a known caller.
pub struct Caller(pub Principal);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or(ApiError::Unauthorized)?;

        let principal = state
            .runner
            .principal(user_id)?
            .ok_or(ApiError::Unauthorized)?;
        Ok(Caller(principal))
    }
}
