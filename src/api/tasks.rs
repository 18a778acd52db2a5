//! Daily and personal task endpoints, plus task completion.

use axum::{
    extract::{Path, State},
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::auth::AuthUser;
use super::error::{ApiError, ApiResult};
use super::routes::AppState;
use crate::ledger::CompletionRequest;
use crate::model::{
    DailyTask, DailyTaskView, GroupId, PersonalTask, PersonalTaskView, TaskCompletion, TaskId,
    TaskPatch, TaskRef,
};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/groups/:id/daily-tasks",
            get(list_daily_tasks).post(create_daily_task),
        )
        .route(
            "/api/groups/:id/personal-tasks",
            get(list_personal_tasks).post(create_personal_task),
        )
        .route(
            "/api/daily-tasks/:id",
            put(update_daily_task).delete(delete_daily_task),
        )
        .route(
            "/api/personal-tasks/:id",
            put(update_personal_task).delete(delete_personal_task),
        )
        .route("/api/tasks/complete/daily/:id", post(complete_daily_task))
        .route(
            "/api/tasks/complete/personal/:id",
            post(complete_personal_task),
        )
}

// ─────────────────────────────────────────────────────────────────────────────
// Request/Response Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateTaskRequest {
    fn title(&self) -> Result<&str, ApiError> {
        let title = self.title.trim();
        if title.is_empty() {
            return Err(ApiError::bad_request("Task title is required"));
        }
        Ok(title)
    }
}

/// Body of a completion; the task comes from the path.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskRequest {
    #[serde(default)]
    pub group_id: Option<GroupId>,
    pub proof_image_url: String,
    #[serde(default)]
    pub notes: Option<String>,
}

impl CompleteTaskRequest {
    pub fn into_request(self, task: TaskRef) -> CompletionRequest {
        CompletionRequest {
            task,
            group_id: self.group_id,
            proof_image_url: self.proof_image_url,
            notes: self.notes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Daily tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn list_daily_tasks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(group_id): Path<GroupId>,
) -> ApiResult<Vec<DailyTaskView>> {
    let tasks = state
        .core
        .tasks
        .get_group_daily_tasks(group_id, user.id)
        .await?;
    Ok(Json(tasks))
}

async fn create_daily_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<DailyTask> {
    let task = state
        .core
        .tasks
        .create_daily_task(group_id, req.title()?, req.description.as_deref(), user.id)
        .await?;
    Ok(Json(task))
}

async fn update_daily_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<TaskId>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<DailyTask> {
    let task = state
        .core
        .tasks
        .update_daily_task(task_id, &patch, user.id)
        .await?;
    Ok(Json(task))
}

async fn delete_daily_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<MessageResponse> {
    state.core.tasks.delete_daily_task(task_id, user.id).await?;
    Ok(Json(MessageResponse {
        message: "Task deleted successfully".to_string(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Personal tasks
// ─────────────────────────────────────────────────────────────────────────────

async fn list_personal_tasks(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(group_id): Path<GroupId>,
) -> ApiResult<Vec<PersonalTaskView>> {
    let tasks = state
        .core
        .tasks
        .get_group_personal_tasks(group_id, user.id)
        .await?;
    Ok(Json(tasks))
}

async fn create_personal_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<PersonalTask> {
    let task = state
        .core
        .tasks
        .create_personal_task(group_id, req.title()?, req.description.as_deref(), user.id)
        .await?;
    Ok(Json(task))
}

async fn update_personal_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<TaskId>,
    Json(patch): Json<TaskPatch>,
) -> ApiResult<PersonalTask> {
    let task = state
        .core
        .tasks
        .update_personal_task(task_id, &patch, user.id)
        .await?;
    Ok(Json(task))
}

async fn delete_personal_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<TaskId>,
) -> ApiResult<MessageResponse> {
    state
        .core
        .tasks
        .delete_personal_task(task_id, user.id)
        .await?;
    Ok(Json(MessageResponse {
        message: "Task deleted successfully".to_string(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Completion
// ─────────────────────────────────────────────────────────────────────────────

async fn complete_daily_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<TaskId>,
    Json(req): Json<CompleteTaskRequest>,
) -> ApiResult<TaskCompletion> {
    complete(&state, user, req.into_request(TaskRef::Daily(task_id))).await
}

async fn complete_personal_task(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<AuthUser>,
    Path(task_id): Path<TaskId>,
    Json(req): Json<CompleteTaskRequest>,
) -> ApiResult<TaskCompletion> {
    complete(&state, user, req.into_request(TaskRef::Personal(task_id))).await
}

async fn complete(
    state: &AppState,
    user: AuthUser,
    request: CompletionRequest,
) -> ApiResult<TaskCompletion> {
    if request.proof_image_url.trim().is_empty() {
        return Err(ApiError::bad_request("Proof image is required"));
    }
    let completion = state.core.ledger.complete_task(request, user.id).await?;
    Ok(Json(completion))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_body_takes_task_from_path() {
        let body: CompleteTaskRequest = serde_json::from_value(serde_json::json!({
            "proofImageUrl": "/uploads/proof.jpg",
            "groupId": 3,
        }))
        .unwrap();
        let request = body.into_request(TaskRef::Personal(9));
        assert_eq!(request.task, TaskRef::Personal(9));
        assert_eq!(request.group_id, Some(3));
        assert_eq!(request.notes, None);
    }

    #[test]
    fn test_blank_title_is_rejected() {
        let req = CreateTaskRequest {
            title: "   ".to_string(),
            description: None,
        };
        assert!(req.title().is_err());
    }
}
