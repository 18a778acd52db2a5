//! Entities owned by the core and the read projections built from them.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::calendar::{days_before, months_before};
use crate::identity::UserSummary;

pub type UserId = i64;
pub type GroupId = i64;
pub type TaskId = i64;
pub type CompletionId = i64;

/// Role of a member inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemberRole {
    Admin,
    Member,
}

impl MemberRole {
    pub fn parse(s: &str) -> Self {
        match s {
            "ADMIN" => MemberRole::Admin,
            _ => MemberRole::Member,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    /// Globally unique, never changes after issue.
    pub invite_code: String,
    /// Current owner. Reassigned when the owner leaves.
    pub created_by_id: UserId,
    pub max_members: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub id: i64,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

impl GroupMember {
    pub fn is_admin(&self) -> bool {
        self.role == MemberRole::Admin
    }
}

/// Task shared by every member of its group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTask {
    pub id: TaskId,
    pub group_id: GroupId,
    pub created_by_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task private to one user, scoped to a group for metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalTask {
    pub id: TaskId,
    pub group_id: GroupId,
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which task a completion refers to. Exactly one kind is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskRef {
    #[serde(rename = "dailyTaskId")]
    Daily(TaskId),
    #[serde(rename = "personalTaskId")]
    Personal(TaskId),
}

impl TaskRef {
    pub fn daily_id(&self) -> Option<TaskId> {
        match self {
            TaskRef::Daily(id) => Some(*id),
            TaskRef::Personal(_) => None,
        }
    }

    pub fn personal_id(&self) -> Option<TaskId> {
        match self {
            TaskRef::Personal(id) => Some(*id),
            TaskRef::Daily(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCompletion {
    pub id: CompletionId,
    #[serde(flatten)]
    pub task: TaskRef,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub completion_date: NaiveDate,
    pub proof_image_url: String,
    pub notes: Option<String>,
    pub is_verified: bool,
    pub verified_by_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Store inputs
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub description: Option<String>,
    pub invite_code: String,
    pub owner_id: UserId,
    pub max_members: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub group_id: GroupId,
    /// Creator of a daily task, or owner of a personal task.
    pub user_id: UserId,
    pub title: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Partial update for either task kind. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl TaskPatch {
    pub fn deactivate() -> Self {
        Self {
            is_active: Some(false),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewCompletion {
    pub task: TaskRef,
    pub user_id: UserId,
    pub group_id: GroupId,
    pub completion_date: NaiveDate,
    pub proof_image_url: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for ledger reads. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct CompletionFilter {
    pub group_id: Option<GroupId>,
    pub user_id: Option<UserId>,
    pub task: Option<TaskRef>,
    /// Exact calendar day.
    pub on: Option<NaiveDate>,
    /// Inclusive lower bound.
    pub since: Option<NaiveDate>,
    pub limit: Option<usize>,
}

/// Result of a leave operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Member removed; `new_owner` is set when ownership was transferred.
    Left { new_owner: Option<UserId> },
    /// The departing member was the last one; the group is gone.
    GroupDeleted,
}

/// One row of a user's group list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserGroup {
    pub group: Group,
    pub member_count: usize,
    pub my_role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

/// Reporting window for statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsPeriod {
    Week,
    Month,
    #[default]
    All,
}

impl StatsPeriod {
    /// Parse a period name; anything unrecognised means `All`.
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "week" => Self::Week,
            "month" => Self::Month,
            _ => Self::All,
        }
    }

    /// Denominator days used by the group completion rate.
    pub fn days(&self) -> u32 {
        match self {
            Self::Week => 7,
            Self::Month => 30,
            Self::All => 1,
        }
    }

    /// First calendar day included in the window, if bounded.
    pub fn since(&self, today: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Week => Some(days_before(today, 7)),
            Self::Month => Some(months_before(today, 1)),
            Self::All => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Read projections
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    #[serde(flatten)]
    pub member: GroupMember,
    pub user: Option<UserSummary>,
}

/// Group with its members, creator and (for detail views) active daily tasks.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupDetails {
    #[serde(flatten)]
    pub group: Group,
    pub creator: Option<UserSummary>,
    pub members: Vec<MemberView>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub daily_tasks: Vec<TaskWithCreator>,
}

/// Daily task annotated with its creator, as listed in group detail.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskWithCreator {
    #[serde(flatten)]
    pub task: DailyTask,
    pub creator: Option<UserSummary>,
}

/// Title and description of the task a completion refers to.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub id: TaskId,
    pub title: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionView {
    #[serde(flatten)]
    pub completion: TaskCompletion,
    pub user: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<UserSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_summary: Option<TaskSummary>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyTaskView {
    #[serde(flatten)]
    pub task: DailyTask,
    pub creator: Option<UserSummary>,
    /// Completions recorded on the day of the query.
    pub completions: Vec<CompletionView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalTaskView {
    #[serde(flatten)]
    pub task: PersonalTask,
    pub completions: Vec<CompletionView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_parsing_and_windows() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        assert_eq!(StatsPeriod::from_str("WEEK"), StatsPeriod::Week);
        assert_eq!(StatsPeriod::from_str("month"), StatsPeriod::Month);
        assert_eq!(StatsPeriod::from_str("forever"), StatsPeriod::All);
        assert_eq!(
            StatsPeriod::Week.since(today),
            NaiveDate::from_ymd_opt(2024, 6, 8)
        );
        assert_eq!(
            StatsPeriod::Month.since(today),
            NaiveDate::from_ymd_opt(2024, 5, 15)
        );
        assert_eq!(StatsPeriod::All.since(today), None);
        assert_eq!(StatsPeriod::All.days(), 1);
    }

    #[test]
    fn test_completion_serializes_single_task_reference() {
        let completion = TaskCompletion {
            id: 1,
            task: TaskRef::Daily(9),
            user_id: 2,
            group_id: 3,
            completion_date: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            proof_image_url: "/x.png".to_string(),
            notes: None,
            is_verified: false,
            verified_by_id: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&completion).unwrap();
        assert_eq!(json["dailyTaskId"], 9);
        assert!(json.get("personalTaskId").is_none());
        assert_eq!(json["completionDate"], "2024-06-15");
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(MemberRole::parse("ADMIN"), MemberRole::Admin);
        assert_eq!(MemberRole::parse("anything"), MemberRole::Member);
        assert_eq!(
            serde_json::to_value(MemberRole::Admin).unwrap(),
            serde_json::json!("ADMIN")
        );
    }
}
