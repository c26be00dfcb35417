//! User and message storage.
//!
//! Storage is a collaborator of the realtime layer, not part of it. The
//! traits here are what the server needs from it; [`MemoryStore`] is a
//! process-local implementation good enough to run standalone.

use crate::config::UserSeed;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parley_core::{ChatEvent, MessageBody, UserIdentity};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// A user profile. Never carries credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserIdentity,
    pub full_name: String,
    pub email: String,
    pub profile_pic: String,
}

impl From<&UserSeed> for User {
    fn from(seed: &UserSeed) -> Self {
        Self {
            id: UserIdentity::new(seed.id.clone()),
            full_name: seed.full_name.clone(),
            email: seed.email.clone(),
            profile_pic: seed.profile_pic.clone(),
        }
    }
}

/// Lookup of known users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Find a user by identity.
    async fn find_user(&self, id: &UserIdentity) -> Result<Option<User>, StoreError>;

    /// All known users.
    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}

/// Durable chat history.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a new message, assigning its id and timestamps.
    async fn persist(
        &self,
        sender: &UserIdentity,
        receiver: &UserIdentity,
        body: MessageBody,
    ) -> Result<ChatEvent, StoreError>;

    /// Messages exchanged between two users, oldest first.
    async fn conversation(
        &self,
        a: &UserIdentity,
        b: &UserIdentity,
    ) -> Result<Vec<ChatEvent>, StoreError>;

    /// Users that `user` has sent messages to or received messages from.
    async fn partners(&self, user: &UserIdentity) -> Result<Vec<UserIdentity>, StoreError>;
}

/// In-memory users and messages.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<UserIdentity, User>,
    messages: RwLock<Vec<ChatEvent>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given users.
    #[must_use]
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let store = Self::new();
        for user in users {
            store.add_user(user);
        }
        store
    }

    /// Add or replace a user.
    pub fn add_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, id: &UserIdentity) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut users: Vec<User> = self.users.iter().map(|u| u.clone()).collect();
        users.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(users)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist(
        &self,
        sender: &UserIdentity,
        receiver: &UserIdentity,
        body: MessageBody,
    ) -> Result<ChatEvent, StoreError> {
        let now = Utc::now();
        let message = ChatEvent {
            id: Uuid::new_v4().simple().to_string(),
            sender: sender.clone(),
            receiver: receiver.clone(),
            body,
            created_at: now,
            updated_at: now,
        };
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn conversation(
        &self,
        a: &UserIdentity,
        b: &UserIdentity,
    ) -> Result<Vec<ChatEvent>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| {
                (&m.sender == a && &m.receiver == b) || (&m.sender == b && &m.receiver == a)
            })
            .cloned()
            .collect())
    }

    async fn partners(&self, user: &UserIdentity) -> Result<Vec<UserIdentity>, StoreError> {
        let messages = self.messages.read().await;
        let mut partners: Vec<UserIdentity> = Vec::new();
        for message in messages.iter().filter(|m| m.involves(user)) {
            let partner = if &message.sender == user {
                &message.receiver
            } else {
                &message.sender
            };
            if !partners.contains(partner) {
                partners.push(partner.clone());
            }
        }
        Ok(partners)
    }
}
