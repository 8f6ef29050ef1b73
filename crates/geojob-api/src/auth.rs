//! Caller identity from gateway-set headers.

use crate::server::ApiResponse;
use axum::{extract::FromRequestParts, http::request::Parts, Json};
use geojob_types::Principal;

pub const USER_HEADER: &str = "x-user-id";
pub const ROLES_HEADER: &str = "x-user-roles";

/// Authenticated caller. The upstream gateway sets `x-user-id` and, optionally, a
/// comma-separated `x-user-roles` claim; both are trusted as given.
#[derive(Debug, Clone)]
pub struct CallerPrincipal(pub Principal);

#[axum::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CallerPrincipal {
    type Rejection = Json<ApiResponse<()>>;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, USER_HEADER)
            .ok_or_else(|| ApiResponse::error(401, format!("missing {USER_HEADER} header")))?;
        Ok(CallerPrincipal(Principal::from_claims(
            id.to_string(),
            header(parts, ROLES_HEADER),
        )))
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
