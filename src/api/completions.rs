//! Completion listing and peer verification.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::calendar::parse_date;
use crate::model::{CompletionId, CompletionView, GroupId};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/groups/:id/completions", get(group_completions))
        .route("/api/completions/:id/verify", post(verify_completion))
}

#[derive(Debug, Default, Deserialize)]
pub struct DateQuery {
    #[serde(default)]
    pub date: Option<String>,
}

/// Parse an optional `date` query value; blank means no filter.
pub fn parse_date_param(value: Option<&str>) -> Result<Option<NaiveDate>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse_date(v)
            .map(Some)
            .ok_or_else(|| ApiError::bad_request(format!("Invalid date: {}", v))),
    }
}

async fn group_completions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Vec<CompletionView>> {
    let date = parse_date_param(query.date.as_deref())?;
    let completions = state
        .core
        .ledger
        .get_group_completions(group_id, user.id, date)
        .await?;
    Ok(Json(completions))
}

async fn verify_completion(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(completion_id): Path<CompletionId>,
) -> ApiResult<CompletionView> {
    let completion = state
        .core
        .ledger
        .verify_completion(completion_id, user.id)
        .await?;
    Ok(Json(completion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_param() {
        assert_eq!(parse_date_param(None).unwrap(), None);
        assert_eq!(parse_date_param(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_date_param(Some("2024-03-09")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
        assert_eq!(
            parse_date_param(Some("2024-03-09T22:10:00Z")).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
        assert!(parse_date_param(Some("yesterday")).is_err());
    }
}
