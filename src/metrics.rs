//! Metrics Engine.
//!
//! Pure folds over ledger rows plus a thin async layer that loads the rows.
//! Nothing here is stored.
//!
//! Two formulas are kept exactly as existing clients expect them:
//! - the group completion rate uses a 1-day denominator for the "all" period;
//! - the per-user completion rate is 100% whenever there is any completion.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

use crate::calendar::days_before;
use crate::engine::CoreContext;
use crate::error::Result;
use crate::identity::UserSummary;
use crate::model::{
    CompletionFilter, DailyTask, GroupId, GroupMember, MemberRole, StatsPeriod, TaskCompletion,
    TaskId, TaskRef, UserId,
};

/// How many of the most recent completion rows the streak walk looks at.
pub const STREAK_WINDOW: usize = 30;

/// Length of the weekly progress series.
pub const WEEKLY_DAYS: u64 = 7;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummaryStats {
    pub total_tasks: usize,
    pub completion_rate: f64,
    pub total_completions: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberStat {
    pub user_id: UserId,
    pub user: Option<UserSummary>,
    pub role: MemberRole,
    pub completion_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStat {
    pub task_id: TaskId,
    pub title: String,
    pub creator: Option<UserSummary>,
    pub completion_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub group_stats: GroupSummaryStats,
    pub member_stats: Vec<MemberStat>,
    pub task_stats: Vec<TaskStat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayProgress {
    pub date: NaiveDate,
    pub completions: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub completion_rate: f64,
    pub current_streak: u32,
    /// Same value as `current_streak`; no historical maximum is tracked.
    pub longest_streak: u32,
    pub total_completions: usize,
    pub weekly_progress: Vec<DayProgress>,
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `total / (active_tasks * members * period_days)` as a percentage.
pub fn completion_rate(
    total_completions: usize,
    active_tasks: usize,
    members: usize,
    period: StatsPeriod,
) -> f64 {
    let possible = active_tasks * members * period.days() as usize;
    if possible == 0 {
        return 0.0;
    }
    round2(total_completions as f64 / possible as f64 * 100.0)
}

/// `completions / max(completions, 1) * 100`: either 0 or 100.
pub fn user_completion_rate(total_completions: usize) -> f64 {
    if total_completions == 0 {
        return 0.0;
    }
    round2(total_completions as f64 / total_completions.max(1) as f64 * 100.0)
}

/// Consecutive days with a completion, walking back from `today`.
/// No completion today means no streak.
pub fn current_streak<I>(dates: I, today: NaiveDate) -> u32
where
    I: IntoIterator<Item = NaiveDate>,
{
    let days: BTreeSet<NaiveDate> = dates.into_iter().collect();
    let mut streak = 0u32;
    let mut cursor = today;
    while days.contains(&cursor) {
        streak += 1;
        match cursor.pred_opt() {
            Some(prev) => cursor = prev,
            None => break,
        }
    }
    streak
}

/// Completion counts for the last seven days, oldest first.
pub fn weekly_progress<I>(dates: I, today: NaiveDate) -> Vec<DayProgress>
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut counts: HashMap<NaiveDate, usize> = HashMap::new();
    for date in dates {
        *counts.entry(date).or_default() += 1;
    }
    (0..WEEKLY_DAYS)
        .rev()
        .map(|back| {
            let date = days_before(today, back);
            DayProgress {
                date,
                completions: counts.get(&date).copied().unwrap_or(0),
            }
        })
        .collect()
}

/// Per-member completion counts, highest first. Ties keep membership order.
pub fn rank_members(
    members: &[GroupMember],
    completions: &[TaskCompletion],
) -> Vec<(GroupMember, usize)> {
    let mut counts: HashMap<UserId, usize> = HashMap::new();
    for c in completions {
        *counts.entry(c.user_id).or_default() += 1;
    }
    let mut ranked: Vec<(GroupMember, usize)> = members
        .iter()
        .map(|m| (m.clone(), counts.get(&m.user_id).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

/// Per-task completion counts for daily tasks, highest first. Ties keep task order.
pub fn rank_tasks(tasks: &[DailyTask], completions: &[TaskCompletion]) -> Vec<(DailyTask, usize)> {
    let mut counts: HashMap<TaskId, usize> = HashMap::new();
    for c in completions {
        if let TaskRef::Daily(id) = c.task {
            *counts.entry(id).or_default() += 1;
        }
    }
    let mut ranked: Vec<(DailyTask, usize)> = tasks
        .iter()
        .map(|t| (t.clone(), counts.get(&t.id).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

#[derive(Clone)]
pub struct MetricsEngine {
    ctx: CoreContext,
}

impl MetricsEngine {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    /// Group-wide statistics. Callers check membership first.
    pub async fn group_stats(&self, group_id: GroupId, period: StatsPeriod) -> Result<GroupStats> {
        let today = self.ctx.clock.today();
        let completions = self
            .ctx
            .store
            .list_completions(&CompletionFilter {
                group_id: Some(group_id),
                since: period.since(today),
                ..Default::default()
            })
            .await?;
        let tasks = self.ctx.store.list_daily_tasks(group_id, true).await?;
        let members = self.ctx.store.list_members(group_id).await?;

        let rate = completion_rate(completions.len(), tasks.len(), members.len(), period);

        let users = self
            .ctx
            .summaries(
                members
                    .iter()
                    .map(|m| m.user_id)
                    .chain(tasks.iter().map(|t| t.created_by_id)),
            )
            .await?;

        let member_stats = rank_members(&members, &completions)
            .into_iter()
            .map(|(m, count)| MemberStat {
                user_id: m.user_id,
                user: users.get(&m.user_id).cloned(),
                role: m.role,
                completion_count: count,
            })
            .collect();
        let task_stats = rank_tasks(&tasks, &completions)
            .into_iter()
            .map(|(t, count)| TaskStat {
                task_id: t.id,
                creator: users.get(&t.created_by_id).cloned(),
                title: t.title,
                completion_count: count,
            })
            .collect();

        Ok(GroupStats {
            group_stats: GroupSummaryStats {
                total_tasks: tasks.len(),
                completion_rate: rate,
                total_completions: completions.len(),
            },
            member_stats,
            task_stats,
        })
    }

    /// Statistics for one user, optionally scoped to a group.
    pub async fn user_stats(
        &self,
        user_id: UserId,
        group_id: Option<GroupId>,
        period: StatsPeriod,
    ) -> Result<UserStats> {
        let today = self.ctx.clock.today();
        let total = self
            .ctx
            .store
            .count_completions(&CompletionFilter {
                user_id: Some(user_id),
                group_id,
                since: period.since(today),
                ..Default::default()
            })
            .await?;
        let streak = self.streak(user_id, group_id, today).await?;
        let weekly = self.weekly(user_id, group_id, today).await?;

        Ok(UserStats {
            completion_rate: user_completion_rate(total),
            current_streak: streak,
            longest_streak: streak,
            total_completions: total,
            weekly_progress: weekly,
        })
    }

    async fn streak(
        &self,
        user_id: UserId,
        group_id: Option<GroupId>,
        today: NaiveDate,
    ) -> Result<u32> {
        let recent = self
            .ctx
            .store
            .list_completions(&CompletionFilter {
                user_id: Some(user_id),
                group_id,
                limit: Some(STREAK_WINDOW),
                ..Default::default()
            })
            .await?;
        Ok(current_streak(recent.iter().map(|c| c.completion_date), today))
    }

    async fn weekly(
        &self,
        user_id: UserId,
        group_id: Option<GroupId>,
        today: NaiveDate,
    ) -> Result<Vec<DayProgress>> {
        let recent = self
            .ctx
            .store
            .list_completions(&CompletionFilter {
                user_id: Some(user_id),
                group_id,
                since: Some(days_before(today, WEEKLY_DAYS - 1)),
                ..Default::default()
            })
            .await?;
        Ok(weekly_progress(recent.iter().map(|c| c.completion_date), today))
    }
}
