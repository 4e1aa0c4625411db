use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tracing::debug;
use uuid::Uuid;

use crate::auth::repo_types::{NewUser, PendingReset, Role, UnknownRole, User, UserRow};

const USER_COLUMNS: &str = "id, name, email, password_hash, role, \
     reset_token_hash, reset_token_expires_at, created_at";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Unique constraint on `email` rejected the write.
    #[error("email already registered: {0}")]
    Conflict(String),
    #[error("user {0} not found")]
    NotFound(Uuid),
    #[error("corrupt user record: {0}")]
    Corrupt(#[from] UnknownRole),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence contract for user records.
///
/// Implementations own email uniqueness and the atomicity of
/// [`UserStore::consume_reset_token`].
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new user. Fails with [`StoreError::Conflict`] on a taken email.
    async fn insert(&self, new: NewUser) -> Result<User, StoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    /// Find the user holding `token_hash` whose reset expires strictly after `now`.
    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError>;
    async fn list(&self) -> Result<Vec<User>, StoreError>;
    /// Record a pending reset, replacing any previous one. Returns false if
    /// no user has `id`.
    async fn set_pending_reset(&self, id: Uuid, reset: &PendingReset) -> Result<bool, StoreError>;
    /// Clear the pending reset only while it is still `token_hash`, so a
    /// newer reset is never wiped. Returns whether anything was cleared.
    async fn clear_pending_reset_if(&self, id: Uuid, token_hash: &str) -> Result<bool, StoreError>;
    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError>;
    /// Replace the password and clear the pending reset in one step, but only
    /// if `token_hash` still matches and has not expired at `now`.
    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError>;
}

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

fn map_write_error(e: sqlx::Error, email: &str) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Conflict(email.to_string());
        }
    }
    StoreError::Database(e)
}

fn into_user(row: Option<UserRow>) -> Result<Option<User>, StoreError> {
    Ok(row.map(User::try_from).transpose()?)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            INSERT INTO users (name, email, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .fetch_one(&self.db)
        .await
        .map_err(|e| map_write_error(e, &new.email))?;
        Ok(User::try_from(row)?)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn find_by_reset_token_hash(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
    ) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            SELECT {USER_COLUMNS}
            FROM users
            WHERE reset_token_hash = $1 AND reset_token_expires_at > $2
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at"
        ))
        .fetch_all(&self.db)
        .await?;
        rows.into_iter()
            .map(|r| User::try_from(r).map_err(StoreError::from))
            .collect()
    }

    async fn set_pending_reset(&self, id: Uuid, reset: &PendingReset) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = $2, reset_token_expires_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&reset.token_hash)
        .bind(reset.expires_at)
        .execute(&self.db)
        .await?;
        debug!(user_id = %id, "pending reset stored");
        Ok(done.rows_affected() == 1)
    }

    async fn clear_pending_reset_if(&self, id: Uuid, token_hash: &str) -> Result<bool, StoreError> {
        let done = sqlx::query(
            r#"
            UPDATE users
            SET reset_token_hash = NULL, reset_token_expires_at = NULL
            WHERE id = $1 AND reset_token_hash = $2
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .execute(&self.db)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    async fn update_role(&self, id: Uuid, role: Role) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET role = $2
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(role.as_str())
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }

    async fn consume_reset_token(
        &self,
        token_hash: &str,
        now: OffsetDateTime,
        new_password_hash: &str,
    ) -> Result<Option<User>, StoreError> {
        // Single conditional UPDATE: concurrent consumers race on the row lock
        // and the loser sees the cleared columns.
        let row = sqlx::query_as::<_, UserRow>(&format!(
            r#"
            UPDATE users
            SET password_hash = $3,
                reset_token_hash = NULL,
                reset_token_expires_at = NULL
            WHERE reset_token_hash = $1 AND reset_token_expires_at > $2
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(token_hash)
        .bind(now)
        .bind(new_password_hash)
        .fetch_optional(&self.db)
        .await?;
        into_user(row)
    }
}
