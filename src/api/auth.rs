//! Caller identification.
//!
//! Token issuance lives outside this service. Requests carry the caller's
//! user id in the `x-user-id` header, and the id must resolve in the
//! identity store. Anything else is rejected with 401. Registration and
//! login are the only routes served without it.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::error::ApiError;
use super::routes::AppState;
use crate::model::UserId;

pub const USER_HEADER: &str = "x-user-id";

/// The verified caller, inserted as a request extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: UserId,
}

/// Read the caller id from the request headers.
pub fn parse_user_id(headers: &HeaderMap) -> Option<UserId> {
    headers
        .get(USER_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.trim().parse::<UserId>().ok())
        .filter(|id| *id > 0)
}

pub async fn require_user(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let Some(id) = parse_user_id(req.headers()) else {
        return ApiError::unauthorized("Missing or invalid x-user-id header").into_response();
    };

    match state.core.context.identity.find_user_by_id(id).await {
        Ok(Some(_)) => {}
        Ok(None) => return ApiError::unauthorized("Unknown user").into_response(),
        Err(e) => return ApiError::from(e).into_response(),
    }

    req.extensions_mut().insert(AuthUser { id });
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_HEADER, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_parse_user_id() {
        assert_eq!(parse_user_id(&headers("42")), Some(42));
        assert_eq!(parse_user_id(&headers(" 7 ")), Some(7));
        assert_eq!(parse_user_id(&headers("abc")), None);
        assert_eq!(parse_user_id(&headers("0")), None);
        assert_eq!(parse_user_id(&headers("-3")), None);
        assert_eq!(parse_user_id(&HeaderMap::new()), None);
    }
}
