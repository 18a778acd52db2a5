//! Registration, login and profile endpoints.
//!
//! Login checks the credential and returns the user; the caller then sends
//! the user's id in `x-user-id`.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::identity::{ProfileUpdate, User};

/// Routes reachable without a caller id.
pub fn public_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/auth/me", get(get_profile))
        .route("/api/users/profile", get(get_profile).put(update_profile))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
}

impl RegisterRequest {
    fn validate(&self) -> Result<(), ApiError> {
        if !self.email.trim().contains('@') {
            return Err(ApiError::bad_request("Valid email is required"));
        }
        if !(3..=30).contains(&self.username.trim().chars().count()) {
            return Err(ApiError::bad_request("Username must be 3-30 characters"));
        }
        if self.password.chars().count() < 6 {
            return Err(ApiError::bad_request(
                "Password must be at least 6 characters",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub user: User,
}

impl UserResponse {
    fn with_message(message: &str, user: User) -> Self {
        Self {
            message: Some(message.to_string()),
            user,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    req.validate()?;
    let user = state
        .core
        .context
        .identity
        .register(
            &req.email,
            &req.username,
            &req.password,
            req.first_name.as_deref(),
            req.last_name.as_deref(),
        )
        .await?;
    tracing::info!(user_id = user.id, "Registered user {}", user.username);
    Ok((
        StatusCode::CREATED,
        Json(UserResponse::with_message("User registered successfully", user)),
    ))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<UserResponse> {
    let identity = &state.core.context.identity;
    let user = identity
        .find_user_by_email(req.email.trim())
        .await?
        .filter(|u| identity.verify_credential(&req.password, &u.password_hash))
        .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;
    Ok(Json(UserResponse::with_message("Login successful", user)))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
) -> ApiResult<UserResponse> {
    let user = state
        .core
        .context
        .identity
        .find_user_by_id(caller.id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "User not found"))?;
    Ok(Json(UserResponse {
        message: None,
        user,
    }))
}

async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<AuthUser>,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<UserResponse> {
    let user = state
        .core
        .context
        .identity
        .update_profile(caller.id, &update)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "User not found"))?;
    Ok(Json(UserResponse::with_message(
        "Profile updated successfully",
        user,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(email: &str, username: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            first_name: None,
            last_name: None,
        }
    }

    #[test]
    fn test_register_validation() {
        assert!(request("a@x.io", "alice", "secret1").validate().is_ok());
        let err = request("nope", "alice", "secret1").validate().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(request("a@x.io", "al", "secret1").validate().is_err());
        assert!(request("a@x.io", "alice", "short").validate().is_err());
    }
}
