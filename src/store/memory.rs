//! In-memory store (non-persistent).
//!
//! All tables sit behind one lock; each trait call holds it for its whole
//! duration, which makes every call atomic with respect to the others.

use super::{filter_matches, pick_successor, Store};
use crate::error::{Conflict, Error, Result};
use crate::model::{
    CompletionFilter, CompletionId, DailyTask, Group, GroupId, GroupMember, LeaveOutcome,
    MemberRole, NewCompletion, NewGroup, NewTask, PersonalTask, TaskCompletion, TaskId, TaskPatch,
    UserGroup, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    groups: BTreeMap<GroupId, Group>,
    /// Kept in insertion (join) order.
    members: Vec<GroupMember>,
    daily_tasks: BTreeMap<TaskId, DailyTask>,
    personal_tasks: BTreeMap<TaskId, PersonalTask>,
    completions: BTreeMap<CompletionId, TaskCompletion>,
    next_id: i64,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn members_of(&self, group_id: GroupId) -> Vec<GroupMember> {
        self.members
            .iter()
            .filter(|m| m.group_id == group_id)
            .cloned()
            .collect()
    }

    fn delete_group(&mut self, group_id: GroupId) {
        self.groups.remove(&group_id);
        self.members.retain(|m| m.group_id != group_id);
        self.daily_tasks.retain(|_, t| t.group_id != group_id);
        self.personal_tasks.retain(|_, t| t.group_id != group_id);
        self.completions.retain(|_, c| c.group_id != group_id);
    }
}

fn apply_patch(
    title: &mut String,
    description: &mut Option<String>,
    is_active: &mut bool,
    patch: &TaskPatch,
) {
    if let Some(t) = &patch.title {
        *title = t.clone();
    }
    if let Some(d) = &patch.description {
        *description = Some(d.clone());
    }
    if let Some(a) = patch.is_active {
        *is_active = a;
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn create_group(&self, new: NewGroup) -> Result<Option<Group>> {
        let mut t = self.tables.write().await;
        if t.groups.values().any(|g| g.invite_code == new.invite_code) {
            return Ok(None);
        }
        let group = Group {
            id: t.next_id(),
            name: new.name,
            description: new.description,
            invite_code: new.invite_code,
            created_by_id: new.owner_id,
            max_members: new.max_members,
            created_at: new.created_at,
        };
        let member = GroupMember {
            id: t.next_id(),
            group_id: group.id,
            user_id: new.owner_id,
            role: MemberRole::Admin,
            joined_at: new.created_at,
        };
        t.groups.insert(group.id, group.clone());
        t.members.push(member);
        Ok(Some(group))
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.tables.read().await.groups.get(&id).cloned())
    }

    async fn get_group_by_invite_code(&self, code: &str) -> Result<Option<Group>> {
        Ok(self
            .tables
            .read()
            .await
            .groups
            .values()
            .find(|g| g.invite_code == code)
            .cloned())
    }

    async fn join_group(
        &self,
        invite_code: &str,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<(Group, GroupMember)> {
        let mut t = self.tables.write().await;
        let group = t
            .groups
            .values()
            .find(|g| g.invite_code == invite_code)
            .cloned()
            .ok_or_else(|| Error::not_found("Invalid invite code"))?;

        let current = t.members.iter().filter(|m| m.group_id == group.id).count();
        if current >= group.max_members as usize {
            return Err(Conflict::GroupFull.into());
        }
        if t
            .members
            .iter()
            .any(|m| m.group_id == group.id && m.user_id == user_id)
        {
            return Err(Conflict::AlreadyMember.into());
        }

        let member = GroupMember {
            id: t.next_id(),
            group_id: group.id,
            user_id,
            role: MemberRole::Member,
            joined_at,
        };
        t.members.push(member.clone());
        Ok((group, member))
    }

    async fn leave_group(&self, group_id: GroupId, user_id: UserId) -> Result<LeaveOutcome> {
        let mut t = self.tables.write().await;
        let members = t.members_of(group_id);
        let leaving = members
            .iter()
            .find(|m| m.user_id == user_id)
            .cloned()
            .ok_or_else(Error::not_a_member)?;
        let owner_id = t
            .groups
            .get(&group_id)
            .map(|g| g.created_by_id)
            .ok_or_else(|| Error::not_found("Group not found"))?;

        if members.len() == 1 {
            t.delete_group(group_id);
            return Ok(LeaveOutcome::GroupDeleted);
        }

        let successor = pick_successor(&members, &leaving, owner_id).map(|m| m.id);
        let mut new_owner = None;
        if let Some(successor_id) = successor {
            let mut successor_user = None;
            if let Some(m) = t.members.iter_mut().find(|m| m.id == successor_id) {
                m.role = MemberRole::Admin;
                successor_user = Some(m.user_id);
            }
            if leaving.user_id == owner_id {
                if let (Some(uid), Some(g)) = (successor_user, t.groups.get_mut(&group_id)) {
                    g.created_by_id = uid;
                    new_owner = Some(uid);
                }
            }
        }
        t.members.retain(|m| m.id != leaving.id);
        Ok(LeaveOutcome::Left { new_owner })
    }

    async fn get_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Option<GroupMember>> {
        Ok(self
            .tables
            .read()
            .await
            .members
            .iter()
            .find(|m| m.group_id == group_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>> {
        let mut members = self.tables.read().await.members_of(group_id);
        members.sort_by(|a, b| a.joined_at.cmp(&b.joined_at).then(a.id.cmp(&b.id)));
        Ok(members)
    }

    async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroup>> {
        let t = self.tables.read().await;
        let groups = t
            .members
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                let group = t.groups.get(&m.group_id)?.clone();
                let member_count = t.members.iter().filter(|x| x.group_id == m.group_id).count();
                Some(UserGroup {
                    group,
                    member_count,
                    my_role: m.role,
                    joined_at: m.joined_at,
                })
            })
            .collect();
        Ok(groups)
    }

    async fn insert_daily_task(&self, new: NewTask) -> Result<DailyTask> {
        let mut t = self.tables.write().await;
        if !t.groups.contains_key(&new.group_id) {
            return Err(Error::not_found("Group not found"));
        }
        let task = DailyTask {
            id: t.next_id(),
            group_id: new.group_id,
            created_by_id: new.user_id,
            title: new.title,
            description: new.description,
            is_active: true,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        t.daily_tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn insert_personal_task(&self, new: NewTask) -> Result<PersonalTask> {
        let mut t = self.tables.write().await;
        if !t.groups.contains_key(&new.group_id) {
            return Err(Error::not_found("Group not found"));
        }
        let task = PersonalTask {
            id: t.next_id(),
            group_id: new.group_id,
            user_id: new.user_id,
            title: new.title,
            description: new.description,
            is_active: true,
            created_at: new.created_at,
            updated_at: new.created_at,
        };
        t.personal_tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn get_daily_task(&self, id: TaskId) -> Result<Option<DailyTask>> {
        Ok(self.tables.read().await.daily_tasks.get(&id).cloned())
    }

    async fn get_personal_task(&self, id: TaskId) -> Result<Option<PersonalTask>> {
        Ok(self.tables.read().await.personal_tasks.get(&id).cloned())
    }

    async fn update_daily_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<DailyTask>> {
        let mut t = self.tables.write().await;
        Ok(t.daily_tasks.get_mut(&id).map(|task| {
            apply_patch(&mut task.title, &mut task.description, &mut task.is_active, patch);
            task.updated_at = updated_at;
            task.clone()
        }))
    }

    async fn update_personal_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<PersonalTask>> {
        let mut t = self.tables.write().await;
        Ok(t.personal_tasks.get_mut(&id).map(|task| {
            apply_patch(&mut task.title, &mut task.description, &mut task.is_active, patch);
            task.updated_at = updated_at;
            task.clone()
        }))
    }

    async fn list_daily_tasks(
        &self,
        group_id: GroupId,
        active_only: bool,
    ) -> Result<Vec<DailyTask>> {
        let t = self.tables.read().await;
        let mut tasks: Vec<DailyTask> = t
            .daily_tasks
            .values()
            .filter(|task| task.group_id == group_id && (!active_only || task.is_active))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }

    async fn list_personal_tasks(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Vec<PersonalTask>> {
        let t = self.tables.read().await;
        let mut tasks: Vec<PersonalTask> = t
            .personal_tasks
            .values()
            .filter(|task| task.group_id == group_id && task.user_id == user_id && task.is_active)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(tasks)
    }

    async fn insert_completion(&self, new: NewCompletion) -> Result<TaskCompletion> {
        let mut t = self.tables.write().await;
        let duplicate = t.completions.values().any(|c| {
            c.user_id == new.user_id
                && c.task == new.task
                && c.completion_date == new.completion_date
        });
        if duplicate {
            return Err(Conflict::AlreadyCompletedToday.into());
        }
        let completion = TaskCompletion {
            id: t.next_id(),
            task: new.task,
            user_id: new.user_id,
            group_id: new.group_id,
            completion_date: new.completion_date,
            proof_image_url: new.proof_image_url,
            notes: new.notes,
            is_verified: false,
            verified_by_id: None,
            created_at: new.created_at,
        };
        t.completions.insert(completion.id, completion.clone());
        Ok(completion)
    }

    async fn get_completion(&self, id: CompletionId) -> Result<Option<TaskCompletion>> {
        Ok(self.tables.read().await.completions.get(&id).cloned())
    }

    async fn mark_verified(
        &self,
        id: CompletionId,
        verifier_id: UserId,
    ) -> Result<Option<TaskCompletion>> {
        let mut t = self.tables.write().await;
        let Some(completion) = t.completions.get_mut(&id) else {
            return Ok(None);
        };
        if completion.is_verified {
            return Err(Conflict::AlreadyVerified.into());
        }
        completion.is_verified = true;
        completion.verified_by_id = Some(verifier_id);
        Ok(Some(completion.clone()))
    }

    async fn list_completions(&self, filter: &CompletionFilter) -> Result<Vec<TaskCompletion>> {
        let t = self.tables.read().await;
        let mut completions: Vec<TaskCompletion> = t
            .completions
            .values()
            .filter(|c| filter_matches(filter, c))
            .cloned()
            .collect();
        completions.sort_by(|a, b| {
            b.completion_date
                .cmp(&a.completion_date)
                .then(b.created_at.cmp(&a.created_at))
                .then(b.id.cmp(&a.id))
        });
        if let Some(limit) = filter.limit {
            completions.truncate(limit);
        }
        Ok(completions)
    }
}
