//! Task Registry: shared daily tasks and private personal tasks.
//!
//! Deleting a task deactivates it. Inactive tasks drop out of listings and
//! cannot be completed, but their completion history stays in the ledger.

use std::collections::HashMap;
use tracing::info;

use crate::engine::CoreContext;
use crate::error::{Error, Result};
use crate::ledger::enrich_completions;
use crate::model::{
    CompletionFilter, CompletionView, DailyTask, DailyTaskView, GroupId, NewTask, PersonalTask,
    PersonalTaskView, TaskId, TaskPatch, TaskRef, UserId,
};

#[derive(Clone)]
pub struct TaskRegistry {
    ctx: CoreContext,
}

impl TaskRegistry {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    pub async fn create_daily_task(
        &self,
        group_id: GroupId,
        title: &str,
        description: Option<&str>,
        requester_id: UserId,
    ) -> Result<DailyTask> {
        self.ctx.require_member(group_id, requester_id).await?;
        let task = self
            .ctx
            .store
            .insert_daily_task(self.new_task(group_id, title, description, requester_id))
            .await?;
        info!(task_id = task.id, group_id, requester_id, "Created daily task");
        Ok(task)
    }

    pub async fn create_personal_task(
        &self,
        group_id: GroupId,
        title: &str,
        description: Option<&str>,
        requester_id: UserId,
    ) -> Result<PersonalTask> {
        self.ctx.require_member(group_id, requester_id).await?;
        let task = self
            .ctx
            .store
            .insert_personal_task(self.new_task(group_id, title, description, requester_id))
            .await?;
        info!(task_id = task.id, group_id, requester_id, "Created personal task");
        Ok(task)
    }

    /// Only the creator or a group ADMIN may change a daily task.
    pub async fn update_daily_task(
        &self,
        task_id: TaskId,
        patch: &TaskPatch,
        requester_id: UserId,
    ) -> Result<DailyTask> {
        self.authorize_daily(task_id, requester_id, "update").await?;
        let task = self
            .ctx
            .store
            .update_daily_task(task_id, patch, self.ctx.clock.now())
            .await?
            .ok_or_else(task_not_found)?;
        info!(task_id, requester_id, is_active = task.is_active, "Updated daily task");
        Ok(task)
    }

    pub async fn update_personal_task(
        &self,
        task_id: TaskId,
        patch: &TaskPatch,
        requester_id: UserId,
    ) -> Result<PersonalTask> {
        self.authorize_personal(task_id, requester_id, "update").await?;
        let task = self
            .ctx
            .store
            .update_personal_task(task_id, patch, self.ctx.clock.now())
            .await?
            .ok_or_else(task_not_found)?;
        info!(task_id, requester_id, is_active = task.is_active, "Updated personal task");
        Ok(task)
    }

    pub async fn delete_daily_task(&self, task_id: TaskId, requester_id: UserId) -> Result<()> {
        self.authorize_daily(task_id, requester_id, "delete").await?;
        self.ctx
            .store
            .update_daily_task(task_id, &TaskPatch::deactivate(), self.ctx.clock.now())
            .await?
            .ok_or_else(task_not_found)?;
        info!(task_id, requester_id, "Deactivated daily task");
        Ok(())
    }

    pub async fn delete_personal_task(&self, task_id: TaskId, requester_id: UserId) -> Result<()> {
        self.authorize_personal(task_id, requester_id, "delete").await?;
        self.ctx
            .store
            .update_personal_task(task_id, &TaskPatch::deactivate(), self.ctx.clock.now())
            .await?
            .ok_or_else(task_not_found)?;
        info!(task_id, requester_id, "Deactivated personal task");
        Ok(())
    }

    /// Active daily tasks with today's completions from every member.
    pub async fn get_group_daily_tasks(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Vec<DailyTaskView>> {
        self.ctx.require_member(group_id, user_id).await?;
        let today = self.ctx.clock.today();
        let tasks = self.ctx.store.list_daily_tasks(group_id, true).await?;
        let filter = CompletionFilter {
            group_id: Some(group_id),
            on: Some(today),
            ..Default::default()
        };
        let mut by_task = self.completions_by_task(&filter).await?;
        let creators = self
            .ctx
            .summaries(tasks.iter().map(|t| t.created_by_id))
            .await?;

        Ok(tasks
            .into_iter()
            .map(|task| DailyTaskView {
                creator: creators.get(&task.created_by_id).cloned(),
                completions: by_task.remove(&TaskRef::Daily(task.id)).unwrap_or_default(),
                task,
            })
            .collect())
    }

    /// The caller's own active personal tasks in a group, with today's completions.
    pub async fn get_group_personal_tasks(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Vec<PersonalTaskView>> {
        self.ctx.require_member(group_id, user_id).await?;
        let today = self.ctx.clock.today();
        let tasks = self.ctx.store.list_personal_tasks(group_id, user_id).await?;
        let filter = CompletionFilter {
            group_id: Some(group_id),
            user_id: Some(user_id),
            on: Some(today),
            ..Default::default()
        };
        let mut by_task = self.completions_by_task(&filter).await?;

        Ok(tasks
            .into_iter()
            .map(|task| PersonalTaskView {
                completions: by_task
                    .remove(&TaskRef::Personal(task.id))
                    .unwrap_or_default(),
                task,
            })
            .collect())
    }

    fn new_task(
        &self,
        group_id: GroupId,
        title: &str,
        description: Option<&str>,
        user_id: UserId,
    ) -> NewTask {
        NewTask {
            group_id,
            user_id,
            title: title.to_string(),
            description: description.map(|s| s.to_string()),
            created_at: self.ctx.clock.now(),
        }
    }

    async fn completions_by_task(
        &self,
        filter: &CompletionFilter,
    ) -> Result<HashMap<TaskRef, Vec<CompletionView>>> {
        let completions = self.ctx.store.list_completions(filter).await?;
        let views = enrich_completions(&self.ctx, completions, false).await?;
        let mut by_task: HashMap<TaskRef, Vec<CompletionView>> = HashMap::new();
        for view in views {
            by_task.entry(view.completion.task).or_default().push(view);
        }
        Ok(by_task)
    }

    async fn authorize_daily(
        &self,
        task_id: TaskId,
        requester_id: UserId,
        action: &str,
    ) -> Result<DailyTask> {
        let task = self
            .ctx
            .store
            .get_daily_task(task_id)
            .await?
            .ok_or_else(task_not_found)?;
        let membership = self.ctx.require_member(task.group_id, requester_id).await?;
        if task.created_by_id != requester_id && !membership.is_admin() {
            return Err(Error::forbidden(format!(
                "Only the task creator or group admin can {} this task",
                action
            )));
        }
        Ok(task)
    }

    async fn authorize_personal(
        &self,
        task_id: TaskId,
        requester_id: UserId,
        action: &str,
    ) -> Result<PersonalTask> {
        let task = self
            .ctx
            .store
            .get_personal_task(task_id)
            .await?
            .ok_or_else(task_not_found)?;
        if task.user_id != requester_id {
            return Err(Error::forbidden(format!(
                "You can only {} your own personal tasks",
                action
            )));
        }
        Ok(task)
    }
}

fn task_not_found() -> Error {
    Error::not_found("Task not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::FixedClock;
    use crate::engine::Core;
    use crate::error::ErrorKind;
    use crate::identity::{IdentityStore, InMemoryIdentityStore};
    use crate::ledger::CompletionRequest;
    use crate::store::InMemoryStore;
    use chrono::NaiveDate;
    use std::sync::Arc;

    struct Fixture {
        core: Core,
        clock: Arc<FixedClock>,
        group_id: GroupId,
        admin: UserId,
        member: UserId,
        other: UserId,
        outsider: UserId,
    }

    async fn fixture() -> Fixture {
        let identity = Arc::new(InMemoryIdentityStore::new());
        let mut ids = Vec::new();
        for name in ["admin", "member", "other", "outsider"] {
            let user = identity
                .register(&format!("{name}@x.io"), name, "pw", None, None)
                .await
                .unwrap();
            ids.push(user.id);
        }
        let (admin, member, other, outsider) = (ids[0], ids[1], ids[2], ids[3]);
        let clock = Arc::new(FixedClock::at_date(
            NaiveDate::from_ymd_opt(2024, 7, 1).unwrap(),
        ));
        let ctx = CoreContext::new(Arc::new(InMemoryStore::new()), identity)
            .with_clock(clock.clone());
        let core = Core::new(ctx, 10);
        let group = core.membership.create_group("G", None, admin).await.unwrap();
        core.membership
            .join_group(&group.group.invite_code, member)
            .await
            .unwrap();
        core.membership
            .join_group(&group.group.invite_code, other)
            .await
            .unwrap();
        Fixture {
            core,
            clock,
            group_id: group.group.id,
            admin,
            member,
            other,
            outsider,
        }
    }

    #[tokio::test]
    async fn test_create_requires_membership() {
        let f = fixture().await;
        let err = f
            .core
            .tasks
            .create_daily_task(f.group_id, "Run", None, f.outsider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = f
            .core
            .tasks
            .create_personal_task(f.group_id, "Run", None, f.outsider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let task = f
            .core
            .tasks
            .create_daily_task(f.group_id, "Run", Some("5k"), f.member)
            .await
            .unwrap();
        assert_eq!(task.created_by_id, f.member);
        assert!(task.is_active);
    }

    #[tokio::test]
    async fn test_daily_update_creator_or_admin_only() {
        let f = fixture().await;
        let task = f
            .core
            .tasks
            .create_daily_task(f.group_id, "Run", None, f.member)
            .await
            .unwrap();
        let patch = TaskPatch {
            title: Some("Run 10k".to_string()),
            ..Default::default()
        };

        let err = f
            .core
            .tasks
            .update_daily_task(task.id, &patch, f.other)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = f
            .core
            .tasks
            .update_daily_task(task.id, &patch, f.outsider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = f
            .core
            .tasks
            .update_daily_task(777, &patch, f.member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let updated = f
            .core
            .tasks
            .update_daily_task(task.id, &patch, f.member)
            .await
            .unwrap();
        assert_eq!(updated.title, "Run 10k");

        let patch = TaskPatch {
            description: Some("hills".to_string()),
            ..Default::default()
        };
        let updated = f
            .core
            .tasks
            .update_daily_task(task.id, &patch, f.admin)
            .await
            .unwrap();
        assert_eq!(updated.description.as_deref(), Some("hills"));
        assert_eq!(updated.title, "Run 10k");
    }

    #[tokio::test]
    async fn test_personal_tasks_are_private() {
        let f = fixture().await;
        let task = f
            .core
            .tasks
            .create_personal_task(f.group_id, "Journal", None, f.member)
            .await
            .unwrap();

        let err = f
            .core
            .tasks
            .update_personal_task(task.id, &TaskPatch::default(), f.admin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = f
            .core
            .tasks
            .delete_personal_task(task.id, f.admin)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        assert!(f
            .core
            .tasks
            .get_group_personal_tasks(f.group_id, f.admin)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            f.core
                .tasks
                .get_group_personal_tasks(f.group_id, f.member)
                .await
                .unwrap()
                .len(),
            1
        );

        f.core
            .tasks
            .delete_personal_task(task.id, f.member)
            .await
            .unwrap();
        assert!(f
            .core
            .tasks
            .get_group_personal_tasks(f.group_id, f.member)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_deactivates_but_keeps_history() {
        let f = fixture().await;
        let task = f
            .core
            .tasks
            .create_daily_task(f.group_id, "Run", None, f.member)
            .await
            .unwrap();
        let completion = f
            .core
            .ledger
            .complete_task(
                CompletionRequest::daily(task.id, "/p.png"),
                f.other,
            )
            .await
            .unwrap();

        let err = f
            .core
            .tasks
            .delete_daily_task(task.id, f.other)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        f.core.tasks.delete_daily_task(task.id, f.admin).await.unwrap();

        assert!(f
            .core
            .tasks
            .get_group_daily_tasks(f.group_id, f.member)
            .await
            .unwrap()
            .is_empty());
        let kept = f
            .core
            .context
            .store
            .get_completion(completion.id)
            .await
            .unwrap();
        assert!(kept.is_some());

        f.clock.advance_days(1);
        let err = f
            .core
            .ledger
            .complete_task(CompletionRequest::daily(task.id, "/p.png"), f.other)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_daily_listing_annotates_todays_completions() {
        let f = fixture().await;
        let run = f
            .core
            .tasks
            .create_daily_task(f.group_id, "Run", None, f.admin)
            .await
            .unwrap();
        let read = f
            .core
            .tasks
            .create_daily_task(f.group_id, "Read", None, f.admin)
            .await
            .unwrap();

        // Yesterday's completion must not show up today.
        f.core
            .ledger
            .complete_task(CompletionRequest::daily(run.id, "/old.png"), f.member)
            .await
            .unwrap();
        f.clock.advance_days(1);
        f.core
            .ledger
            .complete_task(CompletionRequest::daily(run.id, "/a.png"), f.member)
            .await
            .unwrap();
        f.core
            .ledger
            .complete_task(CompletionRequest::daily(run.id, "/b.png"), f.other)
            .await
            .unwrap();

        let err = f
            .core
            .tasks
            .get_group_daily_tasks(f.group_id, f.outsider)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let views = f
            .core
            .tasks
            .get_group_daily_tasks(f.group_id, f.admin)
            .await
            .unwrap();
        assert_eq!(views.len(), 2);
        assert_eq!(views[0].task.id, read.id, "newest task first");
        assert!(views[0].completions.is_empty());
        assert_eq!(views[1].completions.len(), 2);
        assert!(views[1]
            .completions
            .iter()
            .all(|c| c.user.is_some() && c.completion.proof_image_url != "/old.png"));
        assert_eq!(
            views[1].creator.as_ref().map(|c| c.username.as_str()),
            Some("admin")
        );
    }
}
