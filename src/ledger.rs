//! Completion Ledger.
//!
//! Per (task, user, calendar day) a completion moves
//! `NotCompleted -> Completed -> Verified` and never back. The store owns the
//! race resolution: a unique key rejects the second completion of the day and
//! a conditional update lets exactly one verifier win.

use std::collections::HashMap;
use tracing::info;

use crate::engine::CoreContext;
use crate::error::{Conflict, Error, Result};
use crate::model::{
    CompletionFilter, CompletionId, CompletionView, GroupId, NewCompletion, TaskCompletion,
    TaskRef, TaskSummary, UserId,
};
use chrono::NaiveDate;

/// A request to record today's completion of a task.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub task: TaskRef,
    /// Must match the task's group when given.
    pub group_id: Option<GroupId>,
    /// Location of the already-stored proof image.
    pub proof_image_url: String,
    pub notes: Option<String>,
}

impl CompletionRequest {
    pub fn daily(task_id: i64, proof_image_url: &str) -> Self {
        Self {
            task: TaskRef::Daily(task_id),
            group_id: None,
            proof_image_url: proof_image_url.to_string(),
            notes: None,
        }
    }

    pub fn personal(task_id: i64, proof_image_url: &str) -> Self {
        Self {
            task: TaskRef::Personal(task_id),
            ..Self::daily(task_id, proof_image_url)
        }
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }
}

#[derive(Clone)]
pub struct CompletionLedger {
    ctx: CoreContext,
}

impl CompletionLedger {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Record that `user_id` completed a task today.
    pub async fn complete_task(
        &self,
        request: CompletionRequest,
        user_id: UserId,
    ) -> Result<TaskCompletion> {
        let now = self.ctx.clock.now();
        let today = now.date_naive();

        let group_id = match request.task {
            TaskRef::Daily(id) => {
                let task = self
                    .ctx
                    .store
                    .get_daily_task(id)
                    .await?
                    .filter(|t| t.is_active)
                    .ok_or_else(|| Error::not_found("Task not found"))?;
                self.ctx.require_member(task.group_id, user_id).await?;
                task.group_id
            }
            TaskRef::Personal(id) => {
                let task = self
                    .ctx
                    .store
                    .get_personal_task(id)
                    .await?
                    .filter(|t| t.is_active)
                    .ok_or_else(|| Error::not_found("Task not found"))?;
                if task.user_id != user_id {
                    return Err(Error::forbidden(
                        "You can only complete your own personal tasks",
                    ));
                }
                task.group_id
            }
        };
        if request.group_id.is_some_and(|g| g != group_id) {
            return Err(Error::not_found("Task not found in this group"));
        }

        let completion = self
            .ctx
            .store
            .insert_completion(NewCompletion {
                task: request.task,
                user_id,
                group_id,
                completion_date: today,
                proof_image_url: request.proof_image_url,
                notes: request.notes,
                created_at: now,
            })
            .await?;
        info!(
            completion_id = completion.id,
            user_id,
            group_id,
            date = %today,
            "Recorded task completion"
        );
        Ok(completion)
    }

    /// Peer-verify a completion. One-way and one-time.
    pub async fn verify_completion(
        &self,
        completion_id: CompletionId,
        verifier_id: UserId,
    ) -> Result<CompletionView> {
        let completion = self
            .ctx
            .store
            .get_completion(completion_id)
            .await?
            .ok_or_else(completion_not_found)?;
        self.ctx
            .require_member(completion.group_id, verifier_id)
            .await?;
        if completion.user_id == verifier_id {
            return Err(Conflict::SelfVerification.into());
        }
        if completion.is_verified {
            return Err(Conflict::AlreadyVerified.into());
        }

        let verified = self
            .ctx
            .store
            .mark_verified(completion_id, verifier_id)
            .await?
            .ok_or_else(completion_not_found)?;
        info!(completion_id, verifier_id, "Verified completion");

        let mut views = enrich_completions(&self.ctx, vec![verified], true).await?;
        views.pop().ok_or_else(completion_not_found)
    }

    /// Completions in a group on `date` (today when omitted), members only.
    pub async fn get_group_completions(
        &self,
        group_id: GroupId,
        user_id: UserId,
        date: Option<NaiveDate>,
    ) -> Result<Vec<CompletionView>> {
        self.ctx.require_member(group_id, user_id).await?;
        let filter = CompletionFilter {
            group_id: Some(group_id),
            on: Some(date.unwrap_or_else(|| self.ctx.clock.today())),
            ..Default::default()
        };
        let completions = self.ctx.store.list_completions(&filter).await?;
        enrich_completions(&self.ctx, completions, true).await
    }

    /// A user's own completions on `date` (today when omitted), optionally
    /// narrowed to one group they belong to.
    pub async fn get_user_completions(
        &self,
        user_id: UserId,
        group_id: Option<GroupId>,
        date: Option<NaiveDate>,
    ) -> Result<Vec<CompletionView>> {
        if let Some(group_id) = group_id {
            self.ctx.require_member(group_id, user_id).await?;
        }
        let filter = CompletionFilter {
            group_id,
            user_id: Some(user_id),
            on: Some(date.unwrap_or_else(|| self.ctx.clock.today())),
            ..Default::default()
        };
        let completions = self.ctx.store.list_completions(&filter).await?;
        enrich_completions(&self.ctx, completions, true).await
    }
}

fn completion_not_found() -> Error {
    Error::not_found("Completion not found")
}

/// Join completer/verifier identity and, optionally, the task title.
pub(crate) async fn enrich_completions(
    ctx: &CoreContext,
    completions: Vec<TaskCompletion>,
    with_task: bool,
) -> Result<Vec<CompletionView>> {
    let users = ctx
        .summaries(
            completions
                .iter()
                .flat_map(|c| std::iter::once(c.user_id).chain(c.verified_by_id)),
        )
        .await?;

    let mut tasks: HashMap<TaskRef, Option<TaskSummary>> = HashMap::new();
    if with_task {
        for c in &completions {
            if tasks.contains_key(&c.task) {
                continue;
            }
            let summary = match c.task {
                TaskRef::Daily(id) => ctx.store.get_daily_task(id).await?.map(|t| TaskSummary {
                    id: t.id,
                    title: t.title,
                    description: t.description,
                }),
                TaskRef::Personal(id) => {
                    ctx.store.get_personal_task(id).await?.map(|t| TaskSummary {
                        id: t.id,
                        title: t.title,
                        description: t.description,
                    })
                }
            };
            tasks.insert(c.task, summary);
        }
    }

    Ok(completions
        .into_iter()
        .map(|completion| CompletionView {
            user: users.get(&completion.user_id).cloned(),
            verified_by: completion
                .verified_by_id
                .and_then(|id| users.get(&id).cloned()),
            task_summary: tasks.get(&completion.task).cloned().flatten(),
            completion,
        })
        .collect())
}
