//! Behaviour shared by every backend, run against each of them.

use super::*;
use crate::error::{Conflict, ErrorKind};
use crate::model::{MemberRole, TaskRef};
use chrono::{Duration, NaiveDate, TimeZone};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
}

fn new_group(code: &str, owner: UserId, max_members: u32) -> NewGroup {
    NewGroup {
        name: "Runners".to_string(),
        description: Some("5k every morning".to_string()),
        invite_code: code.to_string(),
        owner_id: owner,
        max_members,
        created_at: t0(),
    }
}

fn new_task(group_id: GroupId, user_id: UserId, title: &str, minutes: i64) -> NewTask {
    NewTask {
        group_id,
        user_id,
        title: title.to_string(),
        description: None,
        created_at: t0() + Duration::minutes(minutes),
    }
}

fn new_completion(
    task: TaskRef,
    user_id: UserId,
    group_id: GroupId,
    date: NaiveDate,
) -> NewCompletion {
    NewCompletion {
        task,
        user_id,
        group_id,
        completion_date: date,
        proof_image_url: "/uploads/proofs/p.png".to_string(),
        notes: None,
        created_at: t0(),
    }
}

async fn join(
    store: &dyn Store,
    code: &str,
    user: UserId,
    minutes: i64,
) -> Result<(Group, GroupMember)> {
    store
        .join_group(code, user, t0() + Duration::minutes(minutes))
        .await
}

async fn stores() -> Vec<(&'static str, SharedStore, Option<tempfile::TempDir>)> {
    let dir = tempfile::tempdir().expect("tempdir");
    let sqlite = SqliteStore::new(dir.path().to_path_buf())
        .await
        .expect("open sqlite store");
    let memory: SharedStore = Arc::new(InMemoryStore::new());
    let sqlite: SharedStore = Arc::new(sqlite);
    vec![("memory", memory, None), ("sqlite", sqlite, Some(dir))]
}

#[tokio::test]
async fn test_create_group_makes_owner_admin() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("CODE1", 1, 5))
            .await
            .unwrap()
            .expect("group created");
        assert_eq!(group.created_by_id, 1, "{name}");

        let members = store.list_members(group.id).await.unwrap();
        assert_eq!(members.len(), 1, "{name}");
        assert_eq!(members[0].role, MemberRole::Admin, "{name}");

        let by_code = store.get_group_by_invite_code("CODE1").await.unwrap();
        assert_eq!(by_code.map(|g| g.id), Some(group.id), "{name}");

        // A second group may not reuse the code.
        let dup = store.create_group(new_group("CODE1", 2, 5)).await.unwrap();
        assert!(dup.is_none(), "{name}: invite code must stay unique");
    }
}

#[tokio::test]
async fn test_join_enforces_capacity_and_uniqueness() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("CAP2", 1, 2))
            .await
            .unwrap()
            .unwrap();

        let err = join(store.as_ref(), "NOPE", 2, 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");

        let err = join(store.as_ref(), "CAP2", 1, 1).await.unwrap_err();
        assert_eq!(err.as_conflict(), Some(Conflict::AlreadyMember), "{name}");

        let (_, member) = join(store.as_ref(), "CAP2", 2, 1).await.unwrap();
        assert_eq!(member.role, MemberRole::Member, "{name}");

        let err = join(store.as_ref(), "CAP2", 3, 2).await.unwrap_err();
        assert_eq!(err.as_conflict(), Some(Conflict::GroupFull), "{name}");
        assert_eq!(store.list_members(group.id).await.unwrap().len(), 2, "{name}");
    }
}

#[tokio::test]
async fn test_concurrent_joins_never_exceed_capacity() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("RACE", 1, 4))
            .await
            .unwrap()
            .unwrap();

        let mut handles = Vec::new();
        for user in 2..=12 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.join_group("RACE", user, Utc::now()).await
            }));
        }
        // Same user racing itself.
        for _ in 0..3 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.join_group("RACE", 2, Utc::now()).await
            }));
        }

        let mut joined = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => joined += 1,
                Err(e) => assert_eq!(e.kind(), ErrorKind::Conflict, "{name}"),
            }
        }
        let members = store.list_members(group.id).await.unwrap();
        assert_eq!(members.len(), 4, "{name}");
        assert_eq!(joined, 3, "{name}");
        let twos = members.iter().filter(|m| m.user_id == 2).count();
        assert!(twos <= 1, "{name}: duplicate membership rows");
    }
}

#[tokio::test]
async fn test_owner_leaving_prefers_other_admin() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("LEAVE", 1, 10))
            .await
            .unwrap()
            .unwrap();
        join(store.as_ref(), "LEAVE", 2, 1).await.unwrap();
        join(store.as_ref(), "LEAVE", 3, 2).await.unwrap();

        // Non-member cannot leave.
        let err = store.leave_group(group.id, 99).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden, "{name}");

        // Non-owner member leaving changes nothing else.
        let outcome = store.leave_group(group.id, 2).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::Left { new_owner: None }, "{name}");

        join(store.as_ref(), "LEAVE", 4, 3).await.unwrap();
        let outcome = store.leave_group(group.id, 1).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::Left { new_owner: Some(3) }, "{name}");

        let group = store.get_group(group.id).await.unwrap().unwrap();
        assert_eq!(group.created_by_id, 3, "{name}");
        let members = store.list_members(group.id).await.unwrap();
        let admins: Vec<_> = members.iter().filter(|m| m.is_admin()).collect();
        assert_eq!(admins.len(), 1, "{name}");
        assert_eq!(admins[0].user_id, 3, "{name}");
    }
}

#[tokio::test]
async fn test_last_member_leaving_deletes_group_and_ledger() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("SOLO", 1, 10))
            .await
            .unwrap()
            .unwrap();
        let task = store
            .insert_daily_task(new_task(group.id, 1, "Stretch", 1))
            .await
            .unwrap();
        store
            .insert_completion(new_completion(TaskRef::Daily(task.id), 1, group.id, day(1)))
            .await
            .unwrap();

        let outcome = store.leave_group(group.id, 1).await.unwrap();
        assert_eq!(outcome, LeaveOutcome::GroupDeleted, "{name}");
        assert!(store.get_group(group.id).await.unwrap().is_none(), "{name}");
        assert!(store.get_daily_task(task.id).await.unwrap().is_none(), "{name}");
        let left = store
            .list_completions(&CompletionFilter {
                group_id: Some(group.id),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(left.is_empty(), "{name}");

        let err = join(store.as_ref(), "SOLO", 2, 5).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");
    }
}

#[tokio::test]
async fn test_task_listing_and_patch() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("TASKS", 1, 10))
            .await
            .unwrap()
            .unwrap();
        let older = store
            .insert_daily_task(new_task(group.id, 1, "Read", 1))
            .await
            .unwrap();
        let newer = store
            .insert_daily_task(new_task(group.id, 1, "Run", 2))
            .await
            .unwrap();

        let listed = store.list_daily_tasks(group.id, true).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![newer.id, older.id], "{name}: newest first");

        let patch = TaskPatch {
            title: Some("Read 20 pages".to_string()),
            ..TaskPatch::default()
        };
        let updated = store
            .update_daily_task(older.id, &patch, t0())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Read 20 pages", "{name}");
        assert!(updated.is_active, "{name}");

        store
            .update_daily_task(older.id, &TaskPatch::deactivate(), t0())
            .await
            .unwrap();
        assert_eq!(store.list_daily_tasks(group.id, true).await.unwrap().len(), 1, "{name}");
        assert_eq!(store.list_daily_tasks(group.id, false).await.unwrap().len(), 2, "{name}");

        assert!(store
            .update_daily_task(9999, &patch, t0())
            .await
            .unwrap()
            .is_none());

        let mine = store
            .insert_personal_task(new_task(group.id, 2, "Journal", 3))
            .await
            .unwrap();
        assert_eq!(
            store.list_personal_tasks(group.id, 2).await.unwrap()[0].id,
            mine.id,
            "{name}"
        );
        assert!(store.list_personal_tasks(group.id, 1).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_completion_unique_per_day_and_verify_once() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("LEDGER", 1, 10))
            .await
            .unwrap()
            .unwrap();
        let task = store
            .insert_daily_task(new_task(group.id, 1, "Pushups", 1))
            .await
            .unwrap();
        let personal = store
            .insert_personal_task(new_task(group.id, 2, "Meditate", 2))
            .await
            .unwrap();

        let first = store
            .insert_completion(new_completion(TaskRef::Daily(task.id), 2, group.id, day(3)))
            .await
            .unwrap();
        assert!(!first.is_verified, "{name}");

        let err = store
            .insert_completion(new_completion(TaskRef::Daily(task.id), 2, group.id, day(3)))
            .await
            .unwrap_err();
        assert_eq!(err.as_conflict(), Some(Conflict::AlreadyCompletedToday), "{name}");

        // Different day, different user and personal tasks are independent keys.
        store
            .insert_completion(new_completion(TaskRef::Daily(task.id), 2, group.id, day(4)))
            .await
            .unwrap();
        store
            .insert_completion(new_completion(TaskRef::Daily(task.id), 1, group.id, day(3)))
            .await
            .unwrap();
        store
            .insert_completion(new_completion(TaskRef::Personal(personal.id), 2, group.id, day(3)))
            .await
            .unwrap();

        let verified = store.mark_verified(first.id, 1).await.unwrap().unwrap();
        assert!(verified.is_verified, "{name}");
        assert_eq!(verified.verified_by_id, Some(1), "{name}");

        let err = store.mark_verified(first.id, 3).await.unwrap_err();
        assert_eq!(err.as_conflict(), Some(Conflict::AlreadyVerified), "{name}");
        let still = store.get_completion(first.id).await.unwrap().unwrap();
        assert_eq!(still.verified_by_id, Some(1), "{name}");

        assert!(store.mark_verified(4242, 1).await.unwrap().is_none(), "{name}");

        let on_day3 = store
            .list_completions(&CompletionFilter {
                group_id: Some(group.id),
                on: Some(day(3)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(on_day3.len(), 3, "{name}");

        let user2 = store
            .list_completions(&CompletionFilter {
                user_id: Some(2),
                task: Some(TaskRef::Daily(task.id)),
                ..Default::default()
            })
            .await
            .unwrap();
        let dates: Vec<_> = user2.iter().map(|c| c.completion_date).collect();
        assert_eq!(dates, vec![day(4), day(3)], "{name}: newest date first");

        let since = store
            .count_completions(&CompletionFilter {
                since: Some(day(4)),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(since, 1, "{name}");
    }
}

#[tokio::test]
async fn test_concurrent_verifiers_only_one_wins() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("VERIFY", 1, 10))
            .await
            .unwrap()
            .unwrap();
        let task = store
            .insert_daily_task(new_task(group.id, 1, "Walk", 1))
            .await
            .unwrap();
        let completion = store
            .insert_completion(new_completion(TaskRef::Daily(task.id), 1, group.id, day(2)))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for verifier in 2..=8 {
            let store = Arc::clone(&store);
            let id = completion.id;
            handles.push(tokio::spawn(async move { store.mark_verified(id, verifier).await }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "{name}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_completions_only_one_lands() {
    for (name, store, _dir) in stores().await {
        let group = store
            .create_group(new_group("RACE", 1, 10))
            .await
            .unwrap()
            .unwrap();
        let daily = store
            .insert_daily_task(new_task(group.id, 1, "Stretch", 1))
            .await
            .unwrap();
        let personal = store
            .insert_personal_task(new_task(group.id, 1, "Journal", 2))
            .await
            .unwrap();

        for task in [TaskRef::Daily(daily.id), TaskRef::Personal(personal.id)] {
            let mut handles = Vec::new();
            for _ in 0..8 {
                let store = Arc::clone(&store);
                let completion = new_completion(task, 1, group.id, day(3));
                handles.push(tokio::spawn(async move {
                    store.insert_completion(completion).await
                }));
            }
            let mut winners = 0;
            for handle in handles {
                match handle.await.unwrap() {
                    Ok(_) => winners += 1,
                    Err(e) => assert_eq!(
                        e.as_conflict(),
                        Some(Conflict::AlreadyCompletedToday),
                        "{name}"
                    ),
                }
            }
            assert_eq!(winners, 1, "{name}");

            let filter = CompletionFilter {
                task: Some(task),
                ..Default::default()
            };
            assert_eq!(store.count_completions(&filter).await.unwrap(), 1, "{name}");
        }
    }
}

#[tokio::test]
async fn test_task_insert_into_missing_group_is_not_found() {
    for (name, store, _dir) in stores().await {
        let err = store
            .insert_daily_task(new_task(4242, 1, "Orphan", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");
        assert_eq!(err.to_string(), "Group not found", "{name}");

        let err = store
            .insert_personal_task(new_task(4242, 1, "Orphan", 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound, "{name}");
    }
}

#[tokio::test]
async fn test_sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let group_id = {
        let store = SqliteStore::new(dir.path().to_path_buf()).await.unwrap();
        assert!(store.is_persistent());
        store
            .create_group(new_group("KEEP", 1, 3))
            .await
            .unwrap()
            .unwrap()
            .id
    };
    let reopened = SqliteStore::new(dir.path().to_path_buf()).await.unwrap();
    let group = reopened.get_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.invite_code, "KEEP");
    assert_eq!(group.max_members, 3);
    assert_eq!(group.created_at, t0());
}

#[test]
fn test_store_type_parsing() {
    assert_eq!(StoreType::from_str("memory"), StoreType::Memory);
    assert_eq!(StoreType::from_str("DB"), StoreType::Sqlite);
    assert_eq!(StoreType::from_str("whatever"), StoreType::Sqlite);
}
