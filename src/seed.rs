//! Demo data: two users sharing a fitness group.

use chrono::Utc;
use tracing::info;

use crate::engine::Core;
use crate::error::Result;
use crate::model::NewGroup;

pub const DEMO_INVITE_CODE: &str = "DEMO123";
pub const DEMO_PASSWORD: &str = "password123";

const DEMO_TASKS: &[(&str, &str)] = &[
    ("Morning Workout", "30 minutes of exercise to start the day"),
    ("Drink 8 Glasses of Water", "Stay hydrated throughout the day"),
    ("Read for 20 Minutes", "Read a book or educational content"),
];

/// Register the demo users and group unless the group already exists.
pub async fn seed_demo(core: &Core) -> Result<()> {
    let identity = &core.context.identity;
    let john = match identity.find_user_by_email("john@example.com").await? {
        Some(u) => u,
        None => {
            identity
                .register(
                    "john@example.com",
                    "john_doe",
                    DEMO_PASSWORD,
                    Some("John"),
                    Some("Doe"),
                )
                .await?
        }
    };
    let jane = match identity.find_user_by_email("jane@example.com").await? {
        Some(u) => u,
        None => {
            identity
                .register(
                    "jane@example.com",
                    "jane_smith",
                    DEMO_PASSWORD,
                    Some("Jane"),
                    Some("Smith"),
                )
                .await?
        }
    };

    let store = &core.context.store;
    if store.get_group_by_invite_code(DEMO_INVITE_CODE).await?.is_some() {
        info!("Demo group already present, skipping seed");
        return Ok(());
    }

    let group = store
        .create_group(NewGroup {
            name: "Fitness Buddies".to_string(),
            description: Some("Daily fitness and wellness accountability group".to_string()),
            invite_code: DEMO_INVITE_CODE.to_string(),
            owner_id: john.id,
            max_members: core.membership.max_members(),
            created_at: Utc::now(),
        })
        .await?;
    let Some(group) = group else {
        return Ok(());
    };
    core.membership.join_group(DEMO_INVITE_CODE, jane.id).await?;
    for &(title, description) in DEMO_TASKS {
        core.tasks
            .create_daily_task(group.id, title, Some(description), john.id)
            .await?;
    }

    info!(
        group_id = group.id,
        "Seeded demo group '{}' (invite code {}) for {} and {}",
        group.name,
        DEMO_INVITE_CODE,
        john.username,
        jane.username
    );
    Ok(())
}
