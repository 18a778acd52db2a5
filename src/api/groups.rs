//! Group endpoints: create, join, leave, detail, stats.

use axum::{
    extract::{Path, Query, State},
    routing::{delete, get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::metrics::GroupStats;
use crate::model::{GroupDetails, GroupId, LeaveOutcome, StatsPeriod, UserGroup, UserId};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/groups", post(create_group))
        .route("/api/groups/join", post(join_group))
        .route("/api/groups/my-groups", get(my_groups))
        .route("/api/groups/:id", get(get_group))
        .route("/api/groups/:id/leave", delete(leave_group))
        .route("/api/groups/:id/stats", get(group_stats))
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGroupRequest {
    pub invite_code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    #[serde(default)]
    pub period: Option<String>,
}

impl PeriodQuery {
    pub fn period(&self) -> StatsPeriod {
        self.period
            .as_deref()
            .map(StatsPeriod::from_str)
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    pub message: String,
    pub group_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_owner_id: Option<UserId>,
}

impl From<LeaveOutcome> for LeaveResponse {
    fn from(outcome: LeaveOutcome) -> Self {
        match outcome {
            LeaveOutcome::GroupDeleted => Self {
                message: "Left group; the group had no other members and was deleted".to_string(),
                group_deleted: true,
                new_owner_id: None,
            },
            LeaveOutcome::Left { new_owner } => Self {
                message: "Left group successfully".to_string(),
                group_deleted: false,
                new_owner_id: new_owner,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn create_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<CreateGroupRequest>,
) -> ApiResult<GroupDetails> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ApiError::bad_request("Group name is required"));
    }
    let group = state
        .core
        .membership
        .create_group(name, req.description.as_deref(), user.id)
        .await?;
    Ok(Json(group))
}

async fn join_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<JoinGroupRequest>,
) -> ApiResult<GroupDetails> {
    let group = state
        .core
        .membership
        .join_group(&req.invite_code, user.id)
        .await?;
    Ok(Json(group))
}

async fn my_groups(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Vec<UserGroup>> {
    Ok(Json(state.core.membership.get_user_groups(user.id).await?))
}

async fn get_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<GroupId>,
) -> ApiResult<GroupDetails> {
    Ok(Json(state.core.membership.get_group_by_id(id, user.id).await?))
}

async fn leave_group(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<GroupId>,
) -> ApiResult<LeaveResponse> {
    let outcome = state.core.membership.leave_group(id, user.id).await?;
    Ok(Json(outcome.into()))
}

async fn group_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(id): Path<GroupId>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<GroupStats> {
    let stats = state
        .core
        .membership
        .get_group_stats(id, user.id, query.period())
        .await?;
    Ok(Json(stats))
}
