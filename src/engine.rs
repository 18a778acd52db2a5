//! Wiring for the core components.
//!
//! Every component receives its collaborators explicitly through
//! [`CoreContext`]; nothing reaches for process-wide state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::calendar::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::identity::{IdentityStore, UserSummary};
use crate::invite::{InviteCodeGenerator, RandomInviteCodes};
use crate::ledger::CompletionLedger;
use crate::membership::MembershipManager;
use crate::metrics::MetricsEngine;
use crate::model::{GroupId, GroupMember, UserId};
use crate::store::SharedStore;
use crate::tasks::TaskRegistry;

/// Collaborators shared by all components.
#[derive(Clone)]
pub struct CoreContext {
    pub store: SharedStore,
    pub identity: Arc<dyn IdentityStore>,
    pub clock: Arc<dyn Clock>,
}

impl CoreContext {
    pub fn new(store: SharedStore, identity: Arc<dyn IdentityStore>) -> Self {
        Self {
            store,
            identity,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Membership gate used before any group-scoped action.
    pub async fn require_member(&self, group_id: GroupId, user_id: UserId) -> Result<GroupMember> {
        self.store
            .get_membership(group_id, user_id)
            .await?
            .ok_or_else(Error::not_a_member)
    }

    /// Resolve user ids to public projections, skipping unknown users.
    pub async fn summaries<I>(&self, ids: I) -> Result<HashMap<UserId, UserSummary>>
    where
        I: IntoIterator<Item = UserId>,
    {
        // Owned before the first await so borrowing iterators never cross it.
        let ids: HashSet<UserId> = ids.into_iter().collect();
        let mut out = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(summary) = self.identity.summary(id).await? {
                out.insert(id, summary);
            }
        }
        Ok(out)
    }
}

/// The four core components over one shared context.
#[derive(Clone)]
pub struct Core {
    pub context: CoreContext,
    pub membership: MembershipManager,
    pub tasks: TaskRegistry,
    pub ledger: CompletionLedger,
    pub metrics: MetricsEngine,
}

impl Core {
    pub fn new(context: CoreContext, max_members: u32) -> Self {
        Self::with_invite_codes(context, max_members, Arc::new(RandomInviteCodes))
    }

    pub fn with_invite_codes(
        context: CoreContext,
        max_members: u32,
        invites: Arc<dyn InviteCodeGenerator>,
    ) -> Self {
        let metrics = MetricsEngine::new(context.clone());
        Self {
            membership: MembershipManager::new(
                context.clone(),
                invites,
                max_members,
                metrics.clone(),
            ),
            tasks: TaskRegistry::new(context.clone()),
            ledger: CompletionLedger::new(context.clone()),
            metrics,
            context,
        }
    }

    pub fn from_config(context: CoreContext, config: &Config) -> Self {
        Self::new(context, config.max_members)
    }
}
