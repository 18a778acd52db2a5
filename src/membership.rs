//! Membership Manager: groups, invite codes, join/leave and ownership hand-off.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::engine::CoreContext;
use crate::error::{Error, Result};
use crate::invite::InviteCodeGenerator;
use crate::metrics::{GroupStats, MetricsEngine};
use crate::model::{
    Group, GroupDetails, GroupId, LeaveOutcome, MemberView, NewGroup, StatsPeriod, TaskWithCreator,
    UserGroup, UserId,
};

/// Attempts at drawing an unused invite code before giving up.
const MAX_INVITE_ATTEMPTS: usize = 5;

#[derive(Clone)]
pub struct MembershipManager {
    ctx: CoreContext,
    invites: Arc<dyn InviteCodeGenerator>,
    max_members: u32,
    metrics: MetricsEngine,
}

impl MembershipManager {
    pub fn new(
        ctx: CoreContext,
        invites: Arc<dyn InviteCodeGenerator>,
        max_members: u32,
        metrics: MetricsEngine,
    ) -> Self {
        Self {
            ctx,
            invites,
            max_members: max_members.max(1),
            metrics,
        }
    }

    /// Member cap applied to newly created groups.
    pub fn max_members(&self) -> u32 {
        self.max_members
    }

    /// Create a group owned by `owner_id`, who becomes its first ADMIN.
    pub async fn create_group(
        &self,
        name: &str,
        description: Option<&str>,
        owner_id: UserId,
    ) -> Result<GroupDetails> {
        let now = self.ctx.clock.now();
        for attempt in 1..=MAX_INVITE_ATTEMPTS {
            let invite_code = self.invites.generate();
            let new = NewGroup {
                name: name.to_string(),
                description: description.map(|s| s.to_string()),
                invite_code: invite_code.clone(),
                owner_id,
                max_members: self.max_members,
                created_at: now,
            };
            match self.ctx.store.create_group(new).await? {
                Some(group) => {
                    info!(
                        group_id = group.id,
                        owner_id,
                        "Created group '{}' with invite code {}",
                        group.name,
                        group.invite_code
                    );
                    return self.details(group, false).await;
                }
                None => {
                    warn!(attempt, "Invite code {} already taken, retrying", invite_code);
                }
            }
        }
        Err(Error::internal("Could not allocate a unique invite code"))
    }

    /// Join the group behind `invite_code`.
    pub async fn join_group(&self, invite_code: &str, user_id: UserId) -> Result<GroupDetails> {
        let (group, member) = self
            .ctx
            .store
            .join_group(invite_code.trim(), user_id, self.ctx.clock.now())
            .await?;
        info!(group_id = group.id, user_id, member_id = member.id, "User joined group");
        self.details(group, false).await
    }

    /// Leave a group. The last member leaving deletes the group; an owner
    /// leaving hands ownership to another member first.
    pub async fn leave_group(&self, group_id: GroupId, user_id: UserId) -> Result<LeaveOutcome> {
        let outcome = self.ctx.store.leave_group(group_id, user_id).await?;
        match outcome {
            LeaveOutcome::GroupDeleted => {
                info!(group_id, user_id, "Last member left; group deleted");
            }
            LeaveOutcome::Left {
                new_owner: Some(new_owner),
            } => {
                info!(group_id, user_id, new_owner, "Owner left; ownership transferred");
            }
            LeaveOutcome::Left { new_owner: None } => {
                info!(group_id, user_id, "User left group");
            }
        }
        Ok(outcome)
    }

    pub async fn get_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroup>> {
        self.ctx.store.list_user_groups(user_id).await
    }

    /// Group detail for a member: members by join time and active daily tasks.
    pub async fn get_group_by_id(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<GroupDetails> {
        self.ctx.require_member(group_id, user_id).await?;
        let group = self
            .ctx
            .store
            .get_group(group_id)
            .await?
            .ok_or_else(|| Error::not_found("Group not found"))?;
        self.details(group, true).await
    }

    pub async fn get_group_stats(
        &self,
        group_id: GroupId,
        user_id: UserId,
        period: StatsPeriod,
    ) -> Result<GroupStats> {
        self.ctx.require_member(group_id, user_id).await?;
        debug!(group_id, ?period, "Computing group stats");
        self.metrics.group_stats(group_id, period).await
    }

    async fn details(&self, group: Group, with_tasks: bool) -> Result<GroupDetails> {
        let members = self.ctx.store.list_members(group.id).await?;
        let daily_tasks = if with_tasks {
            self.ctx.store.list_daily_tasks(group.id, true).await?
        } else {
            Vec::new()
        };
        let users = self
            .ctx
            .summaries(
                members
                    .iter()
                    .map(|m| m.user_id)
                    .chain(daily_tasks.iter().map(|t| t.created_by_id))
                    .chain(std::iter::once(group.created_by_id)),
            )
            .await?;
        let creator = users.get(&group.created_by_id).cloned();
        let members = members
            .into_iter()
            .map(|member| MemberView {
                user: users.get(&member.user_id).cloned(),
                member,
            })
            .collect();
        let daily_tasks = daily_tasks
            .into_iter()
            .map(|task| TaskWithCreator {
                creator: users.get(&task.created_by_id).cloned(),
                task,
            })
            .collect();
        Ok(GroupDetails {
            group,
            creator,
            members,
            daily_tasks,
        })
    }
}
