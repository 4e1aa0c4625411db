use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::{
    repo::{StoreError, UserStore},
    repo_types::{NewUser, PendingReset, Role, User},
};

/// In-process store used by the test suite. A single write lock gives the
/// same uniqueness and conditional-update guarantees as the Postgres schema.
#[derive(Default)]
pub struct MemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn email_taken(users: &HashMap<Uuid, User>, email: &str) -> bool {
    users.values().any(|u| u.email == email)
}

fn reset_matches(user: &User, token_hash: &str, now: OffsetDateTime) -> bool {
    user.pending_reset
        .as_ref()
        .map(|p| p.token_hash == token_hash && p.expires_at > now)
        .unwrap_or(false)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.write().await;
        if email_taken(&users, &new.email) {
            return Err(StoreError::Conflict(new.email));
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            role: new.role,
            pending_reset: None,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| reset_matches(u, token_hash, now))
            .cloned())
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let mut all: Vec<User> = self.users.read().await.values().cloned().collect();
        all.sort_by_key(|u| u.created_at);
        Ok(all)
    }

    async fn set_pending_reset(&self, id: Uuid, reset: &PendingReset) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users.get_mut(&id) else {
            return Ok(false);
        };
        user.pending_reset = Some(reset.clone());
        Ok(true)
    }

    async fn clear_pending_reset_if(&self, id: Uuid, token_hash: &str) -> Result<bool, StoreError> {
        let mut users = self.users.write().await;
        match users.get_mut(&id) {
            Some(user)
                if user
                    .pending_reset
                    .as_ref()
                    .is_some_and(|p| p.token_hash == token_hash) =>
            {
                user.clear_reset();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        Ok(users.get_mut(&id).map(|user| {
            user.role = role;
            user.clone()
        }))
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        let mut users = self.users.write().await;
        let Some(user) = users
            .values_mut()
            .find(|u| reset_matches(u, token_hash, now))
        else {
            return Ok(None);
        };
        user.password_hash = new_password_hash.to_string();
        user.clear_reset();
        Ok(Some(user.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use time::Duration;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            name: "Test".into(),
            email: email.into(),
            password_hash: "hash".into(),
            role: Role::User,
        }
    }

    fn pending(hash: &str, expires_at: OffsetDateTime) -> PendingReset {
        PendingReset {
            token_hash: hash.into(),
            expires_at,
        }
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_email() {
        let store = MemoryUserStore::new();
        store.insert(new_user("a@x.com")).await.expect("first insert");
        let err = store.insert(new_user("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn consume_only_succeeds_once() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        assert!(store
            .set_pending_reset(user.id, &pending("h1", now + Duration::minutes(10)))
            .await
            .unwrap());

        let first = store.consume_reset_token("h1", now, "new").await.unwrap();
        assert!(first.is_some());
        let second = store.consume_reset_token("h1", now, "newer").await.unwrap();
        assert!(second.is_none());

        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, "new");
        assert!(!stored.has_pending_reset());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_consumers_have_one_winner() {
        let store = Arc::new(MemoryUserStore::new());
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_pending_reset(user.id, &pending("h1", now + Duration::minutes(10)))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .consume_reset_token("h1", now, &format!("new-{i}"))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for t in tasks {
            if t.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn role_update_leaves_password_and_reset_alone() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        store
            .set_pending_reset(user.id, &pending("h1", now + Duration::minutes(10)))
            .await
            .unwrap();
        store.consume_reset_token("h1", now, "new").await.unwrap();

        let updated = store.update_role(user.id, Role::Admin).await.unwrap().unwrap();
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.password_hash, "new");
        assert!(!updated.has_pending_reset());
        assert!(store.update_role(Uuid::new_v4(), Role::Admin).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn conditional_clear_keeps_newer_reset() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let later = OffsetDateTime::now_utc() + Duration::minutes(10);
        store.set_pending_reset(user.id, &pending("old", later)).await.unwrap();
        store.set_pending_reset(user.id, &pending("new", later)).await.unwrap();

        assert!(!store.clear_pending_reset_if(user.id, "old").await.unwrap());
        let stored = store.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.pending_reset.unwrap().token_hash, "new");

        assert!(store.clear_pending_reset_if(user.id, "new").await.unwrap());
        assert!(!store.find_by_id(user.id).await.unwrap().unwrap().has_pending_reset());
    }

    #[tokio::test]
    async fn expiry_boundary_is_exclusive() {
        let store = MemoryUserStore::new();
        let user = store.insert(new_user("a@x.com")).await.unwrap();
        let expires_at = OffsetDateTime::now_utc();
        store
            .set_pending_reset(user.id, &pending("h1", expires_at))
            .await
            .unwrap();
        assert!(store
            .find_by_reset_token_hash("h1", expires_at)
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_by_reset_token_hash("h1", expires_at - Duration::seconds(1))
            .await
            .unwrap()
            .is_some());
    }
}
