//! Per-user statistics and completion history.

use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::completions::parse_date_param;
use super::error::ApiResult;
use super::routes::AppState;
use crate::metrics::UserStats;
use crate::model::{CompletionView, GroupId, StatsPeriod};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/users/stats", get(user_stats))
        .route("/api/users/my-completions", get(my_completions))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
}

async fn user_stats(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<UserQuery>,
) -> ApiResult<UserStats> {
    if let Some(group_id) = query.group_id {
        state.core.context.require_member(group_id, user.id).await?;
    }
    let period = query
        .period
        .as_deref()
        .map(StatsPeriod::from_str)
        .unwrap_or_default();
    let stats = state
        .core
        .metrics
        .user_stats(user.id, query.group_id, period)
        .await?;
    Ok(Json(stats))
}

async fn my_completions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<UserQuery>,
) -> ApiResult<Vec<CompletionView>> {
    let date = parse_date_param(query.date.as_deref())?;
    let completions = state
        .core
        .ledger
        .get_user_completions(user.id, query.group_id, date)
        .await?;
    Ok(Json(completions))
}
