//! SQLite-backed store.
//!
//! Uniqueness and one-way transitions are enforced by the schema itself:
//! `UNIQUE(group_id, user_id)` on memberships, partial unique indexes on
//! `(user_id, task, completion_date)` for completions, and a conditional
//! update for verification. Multi-step writes run in IMMEDIATE transactions.

use super::{pick_successor, Store};
use crate::calendar::format_date;
use crate::error::{Conflict, Error, Result};
use crate::identity::{IdentityStore, NewUser, ProfileUpdate, User};
use crate::model::{
    CompletionFilter, CompletionId, DailyTask, Group, GroupId, GroupMember, LeaveOutcome,
    MemberRole, NewCompletion, NewGroup, NewTask, PersonalTask, TaskCompletion, TaskId, TaskPatch,
    TaskRef, UserGroup, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE COLLATE NOCASE,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    first_name TEXT,
    last_name TEXT,
    profile_image_url TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    invite_code TEXT NOT NULL UNIQUE,
    created_by_id INTEGER NOT NULL,
    max_members INTEGER NOT NULL CHECK (max_members > 0),
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    role TEXT NOT NULL DEFAULT 'MEMBER' CHECK (role IN ('ADMIN', 'MEMBER')),
    joined_at TEXT NOT NULL,
    UNIQUE (group_id, user_id),
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_members_user ON group_members(user_id);

CREATE TABLE IF NOT EXISTS daily_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    created_by_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_daily_tasks_group ON daily_tasks(group_id, is_active);

CREATE TABLE IF NOT EXISTS personal_tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    group_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_personal_tasks_owner ON personal_tasks(group_id, user_id);

CREATE TABLE IF NOT EXISTS task_completions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    daily_task_id INTEGER,
    personal_task_id INTEGER,
    user_id INTEGER NOT NULL,
    group_id INTEGER NOT NULL,
    completion_date TEXT NOT NULL,
    proof_image_url TEXT NOT NULL,
    notes TEXT,
    is_verified INTEGER NOT NULL DEFAULT 0,
    verified_by_id INTEGER,
    created_at TEXT NOT NULL,
    CHECK ((daily_task_id IS NULL) <> (personal_task_id IS NULL)),
    FOREIGN KEY (daily_task_id) REFERENCES daily_tasks(id) ON DELETE CASCADE,
    FOREIGN KEY (personal_task_id) REFERENCES personal_tasks(id) ON DELETE CASCADE,
    FOREIGN KEY (group_id) REFERENCES groups(id) ON DELETE CASCADE
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_completion_daily
    ON task_completions(user_id, daily_task_id, completion_date)
    WHERE daily_task_id IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS uq_completion_personal
    ON task_completions(user_id, personal_task_id, completion_date)
    WHERE personal_task_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_completions_group_date
    ON task_completions(group_id, completion_date);
CREATE INDEX IF NOT EXISTS idx_completions_user_date
    ON task_completions(user_id, completion_date);
"#;

const USER_COLUMNS: &str =
    "id, email, username, password_hash, first_name, last_name, profile_image_url, created_at";
const GROUP_COLUMNS: &str =
    "id, name, description, invite_code, created_by_id, max_members, created_at";
const MEMBER_COLUMNS: &str = "id, group_id, user_id, role, joined_at";
const DAILY_COLUMNS: &str =
    "id, group_id, created_by_id, title, description, is_active, created_at, updated_at";
const PERSONAL_COLUMNS: &str =
    "id, group_id, user_id, title, description, is_active, created_at, updated_at";
const COMPLETION_COLUMNS: &str = "id, daily_task_id, personal_task_id, user_id, group_id, \
     completion_date, proof_image_url, notes, is_verified, verified_by_id, created_at";

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn get_ts(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn get_date(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d").map_err(|e| conversion_error(idx, e))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password_hash: row.get(3)?,
        first_name: row.get(4)?,
        last_name: row.get(5)?,
        profile_image_url: row.get(6)?,
        created_at: get_ts(row, 7)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        invite_code: row.get(3)?,
        created_by_id: row.get(4)?,
        max_members: row.get(5)?,
        created_at: get_ts(row, 6)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<GroupMember> {
    let role: String = row.get(3)?;
    Ok(GroupMember {
        id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        role: MemberRole::parse(&role),
        joined_at: get_ts(row, 4)?,
    })
}

fn daily_from_row(row: &Row<'_>) -> rusqlite::Result<DailyTask> {
    Ok(DailyTask {
        id: row.get(0)?,
        group_id: row.get(1)?,
        created_by_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: get_ts(row, 6)?,
        updated_at: get_ts(row, 7)?,
    })
}

fn personal_from_row(row: &Row<'_>) -> rusqlite::Result<PersonalTask> {
    Ok(PersonalTask {
        id: row.get(0)?,
        group_id: row.get(1)?,
        user_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        is_active: row.get::<_, i32>(5)? != 0,
        created_at: get_ts(row, 6)?,
        updated_at: get_ts(row, 7)?,
    })
}

fn completion_from_row(row: &Row<'_>) -> rusqlite::Result<TaskCompletion> {
    let daily: Option<TaskId> = row.get(1)?;
    let personal: Option<TaskId> = row.get(2)?;
    let task = match (daily, personal) {
        (Some(id), None) => TaskRef::Daily(id),
        (None, Some(id)) => TaskRef::Personal(id),
        _ => {
            return Err(conversion_error(
                1,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "completion must reference exactly one task",
                ),
            ))
        }
    };
    Ok(TaskCompletion {
        id: row.get(0)?,
        task,
        user_id: row.get(3)?,
        group_id: row.get(4)?,
        completion_date: get_date(row, 5)?,
        proof_image_url: row.get(6)?,
        notes: row.get(7)?,
        is_verified: row.get::<_, i32>(8)? != 0,
        verified_by_id: row.get(9)?,
        created_at: get_ts(row, 10)?,
    })
}

fn has_extended_code(e: &rusqlite::Error, code: std::os::raw::c_int) -> bool {
    matches!(e, rusqlite::Error::SqliteFailure(err, _) if err.extended_code == code)
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    has_extended_code(e, rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE)
}

fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    has_extended_code(e, rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
}

fn query_user(conn: &Connection, column: &str, value: Value) -> rusqlite::Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"),
        params![value],
        user_from_row,
    )
    .optional()
}

fn query_group(conn: &Connection, id: GroupId) -> rusqlite::Result<Option<Group>> {
    conn.query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?1"),
        params![id],
        group_from_row,
    )
    .optional()
}

fn query_members(conn: &Connection, group_id: GroupId) -> rusqlite::Result<Vec<GroupMember>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MEMBER_COLUMNS} FROM group_members WHERE group_id = ?1
         ORDER BY joined_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![group_id], member_from_row)?;
    rows.collect()
}

fn query_daily(conn: &Connection, id: TaskId) -> rusqlite::Result<Option<DailyTask>> {
    conn.query_row(
        &format!("SELECT {DAILY_COLUMNS} FROM daily_tasks WHERE id = ?1"),
        params![id],
        daily_from_row,
    )
    .optional()
}

fn query_personal(conn: &Connection, id: TaskId) -> rusqlite::Result<Option<PersonalTask>> {
    conn.query_row(
        &format!("SELECT {PERSONAL_COLUMNS} FROM personal_tasks WHERE id = ?1"),
        params![id],
        personal_from_row,
    )
    .optional()
}

fn query_completion(
    conn: &Connection,
    id: CompletionId,
) -> rusqlite::Result<Option<TaskCompletion>> {
    conn.query_row(
        &format!("SELECT {COMPLETION_COLUMNS} FROM task_completions WHERE id = ?1"),
        params![id],
        completion_from_row,
    )
    .optional()
}

/// Tasks reference their group; a dangling reference means the group is gone.
fn task_insert_error(e: rusqlite::Error) -> Error {
    if is_foreign_key_violation(&e) {
        Error::not_found("Group not found")
    } else {
        e.into()
    }
}

const PATCH_SET: &str = "title = COALESCE(?2, title),
     description = COALESCE(?3, description),
     is_active = COALESCE(?4, is_active),
     updated_at = ?5";

pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) `huddle.db` inside `data_dir`.
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| Error::internal(format!("Failed to create data dir: {}", e)))?;
        Self::open(data_dir.join("huddle.db")).await
    }

    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            tracing::debug!("Opened SQLite store at {}", db_path.display());
            Ok::<_, Error>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await?
    }
}

#[async_trait]
impl Store for SqliteStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn create_group(&self, new: NewGroup) -> Result<Option<Group>> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let created_at = ts(new.created_at);
            let inserted = tx.execute(
                "INSERT INTO groups
                    (name, description, invite_code, created_by_id, max_members, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.name,
                    new.description,
                    new.invite_code,
                    new.owner_id,
                    new.max_members,
                    created_at
                ],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => return Ok(None),
                other => {
                    other?;
                }
            }
            let group_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO group_members (group_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'ADMIN', ?3)",
                params![group_id, new.owner_id, created_at],
            )?;
            let group = query_group(&tx, group_id)?;
            tx.commit()?;
            Ok(group)
        })
        .await
    }

    async fn get_group(&self, id: GroupId) -> Result<Option<Group>> {
        self.with_conn(move |conn| Ok(query_group(conn, id)?)).await
    }

    async fn get_group_by_invite_code(&self, code: &str) -> Result<Option<Group>> {
        let code = code.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE invite_code = ?1"),
                    params![code],
                    group_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn join_group(
        &self,
        invite_code: &str,
        user_id: UserId,
        joined_at: DateTime<Utc>,
    ) -> Result<(Group, GroupMember)> {
        let invite_code = invite_code.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let group = tx
                .query_row(
                    &format!("SELECT {GROUP_COLUMNS} FROM groups WHERE invite_code = ?1"),
                    params![invite_code],
                    group_from_row,
                )
                .optional()?
                .ok_or_else(|| Error::not_found("Invalid invite code"))?;

            let count: i64 = tx.query_row(
                "SELECT COUNT(*) FROM group_members WHERE group_id = ?1",
                params![group.id],
                |row| row.get(0),
            )?;
            if count >= i64::from(group.max_members) {
                return Err(Conflict::GroupFull.into());
            }

            let inserted = tx.execute(
                "INSERT INTO group_members (group_id, user_id, role, joined_at)
                 VALUES (?1, ?2, 'MEMBER', ?3)",
                params![group.id, user_id, ts(joined_at)],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => return Err(Conflict::AlreadyMember.into()),
                other => {
                    other?;
                }
            }
            let member_id = tx.last_insert_rowid();
            let member = tx.query_row(
                &format!("SELECT {MEMBER_COLUMNS} FROM group_members WHERE id = ?1"),
                params![member_id],
                member_from_row,
            )?;
            tx.commit()?;
            Ok((group, member))
        })
        .await
    }

    async fn leave_group(&self, group_id: GroupId, user_id: UserId) -> Result<LeaveOutcome> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let members = query_members(&tx, group_id)?;
            let leaving = members
                .iter()
                .find(|m| m.user_id == user_id)
                .cloned()
                .ok_or_else(Error::not_a_member)?;
            let group =
                query_group(&tx, group_id)?.ok_or_else(|| Error::not_found("Group not found"))?;

            if members.len() == 1 {
                tx.execute("DELETE FROM groups WHERE id = ?1", params![group_id])?;
                tx.commit()?;
                return Ok(LeaveOutcome::GroupDeleted);
            }

            let mut new_owner = None;
            if let Some(successor) = pick_successor(&members, &leaving, group.created_by_id) {
                tx.execute(
                    "UPDATE group_members SET role = 'ADMIN' WHERE id = ?1",
                    params![successor.id],
                )?;
                if leaving.user_id == group.created_by_id {
                    tx.execute(
                        "UPDATE groups SET created_by_id = ?2 WHERE id = ?1",
                        params![group_id, successor.user_id],
                    )?;
                    new_owner = Some(successor.user_id);
                }
            }
            tx.execute("DELETE FROM group_members WHERE id = ?1", params![leaving.id])?;
            tx.commit()?;
            Ok(LeaveOutcome::Left { new_owner })
        })
        .await
    }

    async fn get_membership(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Option<GroupMember>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {MEMBER_COLUMNS} FROM group_members
                         WHERE group_id = ?1 AND user_id = ?2"
                    ),
                    params![group_id, user_id],
                    member_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn list_members(&self, group_id: GroupId) -> Result<Vec<GroupMember>> {
        self.with_conn(move |conn| Ok(query_members(conn, group_id)?))
            .await
    }

    async fn list_user_groups(&self, user_id: UserId) -> Result<Vec<UserGroup>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT g.id, g.name, g.description, g.invite_code, g.created_by_id, g.max_members,
                        g.created_at, m.role, m.joined_at,
                        (SELECT COUNT(*) FROM group_members c WHERE c.group_id = g.id)
                 FROM group_members m
                 JOIN groups g ON g.id = m.group_id
                 WHERE m.user_id = ?1
                 ORDER BY m.joined_at ASC, m.id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                let role: String = row.get(7)?;
                let count: i64 = row.get(9)?;
                Ok(UserGroup {
                    group: group_from_row(row)?,
                    member_count: count as usize,
                    my_role: MemberRole::parse(&role),
                    joined_at: get_ts(row, 8)?,
                })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn insert_daily_task(&self, new: NewTask) -> Result<DailyTask> {
        self.with_conn(move |conn| {
            let created_at = ts(new.created_at);
            conn.execute(
                "INSERT INTO daily_tasks
                    (group_id, created_by_id, title, description, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                params![new.group_id, new.user_id, new.title, new.description, created_at],
            )
            .map_err(task_insert_error)?;
            query_daily(conn, conn.last_insert_rowid())?
                .ok_or_else(|| Error::internal("inserted daily task vanished"))
        })
        .await
    }

    async fn insert_personal_task(&self, new: NewTask) -> Result<PersonalTask> {
        self.with_conn(move |conn| {
            let created_at = ts(new.created_at);
            conn.execute(
                "INSERT INTO personal_tasks
                    (group_id, user_id, title, description, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)",
                params![new.group_id, new.user_id, new.title, new.description, created_at],
            )
            .map_err(task_insert_error)?;
            query_personal(conn, conn.last_insert_rowid())?
                .ok_or_else(|| Error::internal("inserted personal task vanished"))
        })
        .await
    }

    async fn get_daily_task(&self, id: TaskId) -> Result<Option<DailyTask>> {
        self.with_conn(move |conn| Ok(query_daily(conn, id)?)).await
    }

    async fn get_personal_task(&self, id: TaskId) -> Result<Option<PersonalTask>> {
        self.with_conn(move |conn| Ok(query_personal(conn, id)?))
            .await
    }

    async fn update_daily_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<DailyTask>> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!("UPDATE daily_tasks SET {PATCH_SET} WHERE id = ?1"),
                params![id, patch.title, patch.description, patch.is_active, ts(updated_at)],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(query_daily(conn, id)?)
        })
        .await
    }

    async fn update_personal_task(
        &self,
        id: TaskId,
        patch: &TaskPatch,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<PersonalTask>> {
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                &format!("UPDATE personal_tasks SET {PATCH_SET} WHERE id = ?1"),
                params![id, patch.title, patch.description, patch.is_active, ts(updated_at)],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(query_personal(conn, id)?)
        })
        .await
    }

    async fn list_daily_tasks(
        &self,
        group_id: GroupId,
        active_only: bool,
    ) -> Result<Vec<DailyTask>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {DAILY_COLUMNS} FROM daily_tasks
                 WHERE group_id = ?1 AND (?2 = 0 OR is_active = 1)
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map(params![group_id, active_only], daily_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn list_personal_tasks(
        &self,
        group_id: GroupId,
        user_id: UserId,
    ) -> Result<Vec<PersonalTask>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PERSONAL_COLUMNS} FROM personal_tasks
                 WHERE group_id = ?1 AND user_id = ?2 AND is_active = 1
                 ORDER BY created_at DESC, id DESC"
            ))?;
            let rows = stmt.query_map(params![group_id, user_id], personal_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn insert_completion(&self, new: NewCompletion) -> Result<TaskCompletion> {
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT INTO task_completions
                    (daily_task_id, personal_task_id, user_id, group_id, completion_date,
                     proof_image_url, notes, is_verified, verified_by_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, NULL, ?8)",
                params![
                    new.task.daily_id(),
                    new.task.personal_id(),
                    new.user_id,
                    new.group_id,
                    format_date(new.completion_date),
                    new.proof_image_url,
                    new.notes,
                    ts(new.created_at)
                ],
            );
            match inserted {
                Err(e) if is_unique_violation(&e) => {
                    return Err(Conflict::AlreadyCompletedToday.into())
                }
                other => {
                    other?;
                }
            }
            query_completion(conn, conn.last_insert_rowid())?
                .ok_or_else(|| Error::internal("inserted completion vanished"))
        })
        .await
    }

    async fn get_completion(&self, id: CompletionId) -> Result<Option<TaskCompletion>> {
        self.with_conn(move |conn| Ok(query_completion(conn, id)?))
            .await
    }

    async fn mark_verified(
        &self,
        id: CompletionId,
        verifier_id: UserId,
    ) -> Result<Option<TaskCompletion>> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE task_completions SET is_verified = 1, verified_by_id = ?2
                 WHERE id = ?1 AND is_verified = 0",
                params![id, verifier_id],
            )?;
            let current = query_completion(conn, id)?;
            match current {
                None => Ok(None),
                Some(_) if changed == 0 => Err(Conflict::AlreadyVerified.into()),
                Some(c) => Ok(Some(c)),
            }
        })
        .await
    }

    async fn list_completions(&self, filter: &CompletionFilter) -> Result<Vec<TaskCompletion>> {
        let filter = filter.clone();
        self.with_conn(move |conn| {
            let mut clauses: Vec<&str> = Vec::new();
            let mut values: Vec<Value> = Vec::new();
            if let Some(g) = filter.group_id {
                clauses.push("group_id = ?");
                values.push(Value::Integer(g));
            }
            if let Some(u) = filter.user_id {
                clauses.push("user_id = ?");
                values.push(Value::Integer(u));
            }
            match filter.task {
                Some(TaskRef::Daily(id)) => {
                    clauses.push("daily_task_id = ?");
                    values.push(Value::Integer(id));
                }
                Some(TaskRef::Personal(id)) => {
                    clauses.push("personal_task_id = ?");
                    values.push(Value::Integer(id));
                }
                None => {}
            }
            if let Some(d) = filter.on {
                clauses.push("completion_date = ?");
                values.push(Value::Text(format_date(d)));
            }
            if let Some(d) = filter.since {
                clauses.push("completion_date >= ?");
                values.push(Value::Text(format_date(d)));
            }

            let mut sql = format!("SELECT {COMPLETION_COLUMNS} FROM task_completions");
            if !clauses.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&clauses.join(" AND "));
            }
            sql.push_str(" ORDER BY completion_date DESC, created_at DESC, id DESC");
            if let Some(limit) = filter.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values), completion_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }
}

#[async_trait]
impl IdentityStore for SqliteStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        self.with_conn(move |conn| Ok(query_user(conn, "id", Value::Integer(id))?))
            .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = Value::Text(email.to_string());
        self.with_conn(move |conn| Ok(query_user(conn, "email", email)?))
            .await
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let username = Value::Text(username.to_string());
        self.with_conn(move |conn| Ok(query_user(conn, "username", username)?))
            .await
    }

    async fn create_user(&self, new: NewUser) -> Result<User> {
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if query_user(&tx, "email", Value::Text(new.email.clone()))?.is_some() {
                return Err(Conflict::EmailTaken.into());
            }
            if query_user(&tx, "username", Value::Text(new.username.clone()))?.is_some() {
                return Err(Conflict::UsernameTaken.into());
            }
            tx.execute(
                "INSERT INTO users
                    (email, username, password_hash, first_name, last_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    new.email,
                    new.username,
                    new.password_hash,
                    new.first_name,
                    new.last_name,
                    ts(new.created_at)
                ],
            )?;
            let user = query_user(&tx, "id", Value::Integer(tx.last_insert_rowid()))?
                .ok_or_else(|| Error::internal("inserted user vanished"))?;
            tx.commit()?;
            Ok(user)
        })
        .await
    }

    async fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<Option<User>> {
        let update = update.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE users SET first_name = COALESCE(?2, first_name),
                     last_name = COALESCE(?3, last_name),
                     profile_image_url = COALESCE(?4, profile_image_url)
                 WHERE id = ?1",
                params![id, update.first_name, update.last_name, update.profile_image_url],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            Ok(query_user(conn, "id", Value::Integer(id))?)
        })
        .await
    }
}
