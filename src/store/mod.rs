//! Persistence for groups, memberships, tasks and completions.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database with uniqueness constraints
//!
//! Every read-then-write sequence the core depends on (capacity check on join,
//! duplicate join, duplicate completion, verify-once, owner hand-off on leave)
//! is a single store call. Backends make each of those calls atomic.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::identity::{IdentityStore, InMemoryIdentityStore};
use crate::model::{
    CompletionFilter, CompletionId, DailyTask, Group, GroupId, GroupMember, LeaveOutcome,
    NewCompletion, NewGroup, NewTask, PersonalTask, TaskCompletion, TaskId, TaskPatch, UserGroup,
    UserId,
};

pub type SharedStore = Arc<dyn Store>;

/// Storage trait - implemented by all storage backends.
#[async_trait]
pub trait Store: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    // === Groups and membership ===

    /// Create a group and its first ADMIN membership for the owner in one step.
    /// Returns `None` if the invite code is already taken.
    async fn create_group(&self, group: NewGroup) -> Result<Option<Group>>;

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>>;

    async fn get_group_by_invite_code(&self, code: &str) -> Result<Option<Group>>;

    /// Add a MEMBER row. Fails `NotFound` for an unknown code, `GroupFull` at
    /// capacity and `AlreadyMember` on a duplicate; never inserts on failure.
    async fn join_group(
        &self,
        invite_code: &str,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<(Group, GroupMember)>;

    /// Remove a member, handing ownership over or deleting the group as needed.
    /// Fails `Forbidden` if the user is not a member.
    async fn leave_group(&self, group_id: GroupId, user_id: UserId) -> Result<LeaveOutcome>;

    async fn get_membership(&self, group_id: GroupId, user_id: UserId)
        -> Result<Option<GroupMember>>;

    /// Members ordered by join time, oldest first.
    async fn list_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>>;

    async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroup>>;

    // === Tasks ===

    async fn insert_daily_task(&self, task: NewTask) -> Result<DailyTask>;

    async fn insert_personal_task(&self, task: NewTask) -> Result<PersonalTask>;

    async fn get_daily_task(&self, id: TaskId) -> Result<Option<DailyTask>>;

    async fn get_personal_task(&self, id: TaskId) -> Result<Option<PersonalTask>>;

    async fn update_daily_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<DailyTask>>;

    async fn update_personal_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<PersonalTask>>;

    /// Daily tasks of a group, newest first.
    async fn list_daily_tasks(&self, group_id: GroupId, active_only: bool)
        -> Result<Vec<DailyTask>>;

    /// Active personal tasks a user owns in a group, newest first.
    async fn list_personal_tasks(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Vec<PersonalTask>>;

    // === Completions ===

    /// Insert a completion. Fails `AlreadyCompletedToday` if one already exists
    /// for the same user, task and calendar date.
    async fn insert_completion(&self, completion: NewCompletion) -> Result<TaskCompletion>;

    async fn get_completion(&self, id: CompletionId) -> Result<Option<TaskCompletion>>;

    /// Flip `is_verified` from false to true as a conditional update. Returns
    /// `None` if the completion does not exist and fails `AlreadyVerified` if
    /// another verifier got there first.
    async fn mark_verified(
        &self,
        id: CompletionId,
        verifier_id: UserId,
    ) -> Result<Option<TaskCompletion>>;

    /// Completions matching the filter, newest calendar date first.
    async fn list_completions(&self, filter: &CompletionFilter) -> Result<Vec<TaskCompletion>>;

    async fn count_completions(&self, filter: &CompletionFilter) -> Result<usize> {
        Ok(self.list_completions(filter).await?.len())
    }
}

/// Store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    Memory,
    #[default]
    Sqlite,
}

impl StoreType {
    /// Parse from environment variable value.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "memory" => Self::Memory,
            "sqlite" | "db" => Self::Sqlite,
            _ => Self::default(),
        }
    }
}

/// Identity store persisted alongside a [`Store`].
pub type SharedIdentity = Arc<dyn IdentityStore>;

/// Create the store and its identity store based on type and configuration.
/// Users live in the same backend as groups so ids stay stable across restarts.
pub async fn create_backends(
    store_type: StoreType,
    data_dir: PathBuf,
) -> Result<(SharedStore, SharedIdentity)> {
    match store_type {
        StoreType::Memory => {
            let store: SharedStore = Arc::new(InMemoryStore::new());
            let identity: SharedIdentity = Arc::new(InMemoryIdentityStore::new());
            Ok((store, identity))
        }
        StoreType::Sqlite => {
            let sqlite = Arc::new(SqliteStore::new(data_dir).await?);
            let store: SharedStore = sqlite.clone();
            let identity: SharedIdentity = sqlite;
            Ok((store, identity))
        }
    }
}

/// Whether a completion matches a filter. Shared by backends that filter in memory.
pub(crate) fn filter_matches(filter: &CompletionFilter, c: &TaskCompletion) -> bool {
    filter.group_id.map_or(true, |g| c.group_id == g)
        && filter.user_id.map_or(true, |u| c.user_id == u)
        && filter.task.map_or(true, |t| c.task == t)
        && filter.on.map_or(true, |d| c.completion_date == d)
        && filter.since.map_or(true, |d| c.completion_date >= d)
}

/// Who takes over when `leaving` departs from a group with `members` (join order).
///
/// A successor is needed when the owner leaves, or when the last ADMIN leaves.
/// Another ADMIN is preferred, otherwise the longest-standing member.
pub(crate) fn pick_successor<'a>(
    members: &'a [GroupMember],
    leaving: &GroupMember,
    owner_id: UserId,
) -> Option<&'a GroupMember> {
    let others = || members.iter().filter(|m| m.user_id != leaving.user_id);
    let other_admin = others().find(|m| m.is_admin());
    let needs_successor =
        leaving.user_id == owner_id || (leaving.is_admin() && other_admin.is_none());
    if !needs_successor {
        return None;
    }
    other_admin.or_else(|| others().next())
}

#[cfg(test)]
mod tests;
