//! Identity Store contract.
//!
//! The core only resolves user ids into display projections; the HTTP layer
//! also registers users and edits profiles through the same trait. Both store
//! backends persist users next to the rest of their data: `InMemoryIdentityStore`
//! pairs with the in-memory store and `SqliteStore` keeps a `users` table.
//! Credentials are kept as hex SHA-256 digests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Conflict, Result};
use crate::model::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Public projection of a user attached to groups, tasks and completions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: UserId,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

impl From<&User> for UserSummary {
    fn from(u: &User) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            first_name: u.first_name.clone(),
            last_name: u.last_name.clone(),
            profile_image_url: u.profile_image_url.clone(),
        }
    }
}

/// A user about to be stored. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Editable profile fields. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Emails compare case-insensitively.
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;

    /// Store a new user with a fresh id. Fails `EmailTaken` before
    /// `UsernameTaken`; nothing is written on failure.
    async fn create_user(&self, user: NewUser) -> Result<User>;

    /// Apply a profile update. Returns `None` for an unknown user.
    async fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<Option<User>>;

    fn verify_credential(&self, password: &str, hash: &str) -> bool {
        constant_time_eq(&hash_credential(password), hash)
    }

    /// Hash `password` and store the user.
    async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<User> {
        self.create_user(NewUser {
            email: email.trim().to_string(),
            username: username.trim().to_string(),
            password_hash: hash_credential(password),
            first_name: first_name.map(|s| s.to_string()),
            last_name: last_name.map(|s| s.to_string()),
            created_at: Utc::now(),
        })
        .await
    }

    /// Resolve a user id into its public projection.
    async fn summary(&self, id: UserId) -> Result<Option<UserSummary>> {
        Ok(self.find_user_by_id(id).await?.as_ref().map(UserSummary::from))
    }
}

/// Hex SHA-256 digest of a password.
pub fn hash_credential(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a_bytes.iter().zip(b_bytes) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Default)]
pub struct InMemoryIdentityStore {
    users: RwLock<HashMap<UserId, User>>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn find_user_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn create_user(&self, new: NewUser) -> Result<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email.eq_ignore_ascii_case(&new.email)) {
            return Err(Conflict::EmailTaken.into());
        }
        if users.values().any(|u| u.username == new.username) {
            return Err(Conflict::UsernameTaken.into());
        }
        let id = users.keys().max().copied().unwrap_or(0) + 1;
        let user = User {
            id,
            email: new.email,
            username: new.username,
            password_hash: new.password_hash,
            first_name: new.first_name,
            last_name: new.last_name,
            profile_image_url: None,
            created_at: new.created_at,
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_profile(&self, id: UserId, update: &ProfileUpdate) -> Result<Option<User>> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(first_name) = &update.first_name {
            user.first_name = Some(first_name.clone());
        }
        if let Some(last_name) = &update.last_name {
            user.last_name = Some(last_name.clone());
        }
        if let Some(url) = &update.profile_image_url {
            user.profile_image_url = Some(url.clone());
        }
        Ok(Some(user.clone()))
    }
}
