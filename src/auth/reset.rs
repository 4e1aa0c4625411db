//! Single-use password reset tokens.
//!
//! Only the SHA-256 of a token is stored. The plaintext leaves this module
//! once, for out-of-band delivery.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::auth::{
    password,
    repo::{StoreError, UserStore},
    repo_types::{PendingReset, User},
};

const TOKEN_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ResetError {
    /// Unknown and expired tokens are reported the same way.
    #[error("token is invalid or has expired")]
    Invalid,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Hash(#[from] anyhow::Error),
}

pub fn generate_token() -> String {
    let mut buf = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy)]
pub struct ResetTokens {
    ttl: Duration,
}

impl ResetTokens {
    pub fn new(ttl_minutes: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_minutes.max(0).saturating_mul(60)),
        }
    }

    pub fn ttl_minutes(&self) -> i64 {
        self.ttl.whole_minutes()
    }

    /// Start a reset for `user`, replacing any reset already pending.
    /// Only the reset columns are written. Returns the plaintext token.
    pub async fn begin(
        &self,
        store: &dyn UserStore,
        user: &User,
        now: OffsetDateTime,
    ) -> Result<String, StoreError> {
        let token = generate_token();
        let pending = PendingReset {
            token_hash: hash_token(&token),
            expires_at: now.saturating_add(self.ttl),
        };
        if !store.set_pending_reset(user.id, &pending).await? {
            return Err(StoreError::NotFound(user.id));
        }
        info!(
            user_id = %user.id,
            replaced = user.has_pending_reset(),
            "password reset started"
        );
        Ok(token)
    }

    /// Undo [`ResetTokens::begin`] when `token` never reached the user.
    /// A newer reset started in the meantime is left in place.
    pub async fn rollback(
        &self,
        store: &dyn UserStore,
        user_id: Uuid,
        token: &str,
    ) -> Result<(), StoreError> {
        let cleared = store
            .clear_pending_reset_if(user_id, &hash_token(token))
            .await?;
        warn!(user_id = %user_id, cleared, "password reset rolled back");
        Ok(())
    }

    /// Resolve `token` to the user it was issued for, if it is still live.
    pub async fn lookup(
        &self,
        store: &dyn UserStore,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<User, ResetError> {
        store
            .find_by_reset_token_hash(&hash_token(token), now)
            .await?
            .ok_or_else(|| {
                debug!("reset token not found or expired");
                ResetError::Invalid
            })
    }

    /// Set `new_password` for the holder of `token` and clear the reset.
    pub async fn consume(
        &self,
        store: &dyn UserStore,
        token: &str,
        new_password: &str,
        now: OffsetDateTime,
    ) -> Result<User, ResetError> {
        // Cheap lookup first so garbage tokens never reach argon2.
        self.lookup(store, token, now).await?;

        let password_hash = password::hash_password_blocking(new_password.to_string()).await?;
        let user = store
            .consume_reset_token(&hash_token(token), now, &password_hash)
            .await?
            .ok_or(ResetError::Invalid)?;
        info!(user_id = %user.id, "password reset completed");
        Ok(user)
    }
}
