use std::sync::Arc;

use axum::extract::FromRef;
use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtKeys,
        password,
        repo::UserStore,
        repo_types::{NewUser, Role, User},
        reset::ResetTokens,
    },
    error::AppError,
    mail::{Email, Mailer},
    state::AppState,
};

pub const MIN_PASSWORD_LEN: usize = 8;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

lazy_static! {
    /// Verified against when the login email is unknown, so that branch
    /// costs the same argon2 work as a wrong password.
    static ref DUMMY_HASH: String = password::hash_password("not-a-real-password")
        .unwrap_or_default();
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

#[derive(Debug)]
pub struct SignUp {
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
}

/// Account use cases: signup, login, password reset and role management.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    mailer: Arc<dyn Mailer>,
    keys: Arc<JwtKeys>,
    resets: ResetTokens,
    public_base_url: String,
}

impl FromRef<AppState> for AuthService {
    fn from_ref(state: &AppState) -> Self {
        Self {
            users: state.users.clone(),
            mailer: state.mailer.clone(),
            keys: state.keys.clone(),
            resets: ResetTokens::new(state.config.reset.ttl_minutes),
            public_base_url: state.config.reset.public_base_url.clone(),
        }
    }
}

impl AuthService {
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn sign_up(&self, input: SignUp) -> Result<User, AppError> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(AppError::Validation("Name is required".into()));
        }
        let email = normalize_email(&input.email);
        if !is_valid_email(&email) {
            warn!("invalid email");
            return Err(AppError::Validation("Invalid email".into()));
        }
        check_password(&input.password)?;

        let password_hash = password::hash_password_blocking(input.password).await?;
        let user = self
            .users
            .insert(NewUser {
                name,
                email,
                password_hash,
                role: input.role,
            })
            .await?;

        info!(user_id = %user.id, role = %user.role, "user registered");
        Ok(user)
    }

    #[instrument(skip(self, email, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<(String, User), AppError> {
        let email = normalize_email(email);
        let invalid = || AppError::Unauthenticated("Invalid email or password".into());

        let Some(user) = self.users.find_by_email(&email).await? else {
            let _ = password::verify_password_blocking(password.to_string(), DUMMY_HASH.clone())
                .await;
            warn!(email = %email, "login unknown email");
            return Err(invalid());
        };

        let ok =
            password::verify_password_blocking(password.to_string(), user.password_hash.clone())
                .await?;
        if !ok {
            warn!(user_id = %user.id, "login invalid password");
            return Err(invalid());
        }

        let token = self.keys.issue(user.id, user.role)?;
        info!(user_id = %user.id, "user logged in");
        Ok((token, user))
    }

    #[instrument(skip(self, email))]
    pub async fn forgot_password(&self, email: &str) -> Result<(), AppError> {
        let email = normalize_email(email);
        let user = self.users.find_by_email(&email).await?.ok_or_else(|| {
            AppError::NotFound("We could not find a user with the given email".into())
        })?;

        let token = self
            .resets
            .begin(self.users.as_ref(), &user, OffsetDateTime::now_utc())
            .await?;

        let message = self.reset_email(&user, &token);
        if let Err(e) = self.mailer.send(message).await {
            error!(user_id = %user.id, error = %e, "reset email delivery failed");
            if let Err(rollback) = self
                .resets
                .rollback(self.users.as_ref(), user.id, &token)
                .await {
                error!(user_id = %user.id, error = %rollback, "reset rollback failed");
            }
            return Err(AppError::Delivery(
                "There was an error sending the password reset email. Please try again later."
                    .into(),
            ));
        }

        info!(user_id = %user.id, "reset email sent");
        Ok(())
    }

    #[instrument(skip(self, token, new_password))]
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<User, AppError> {
        // Token first: a bad token is reported as such whatever the password.
        self.resets
            .lookup(self.users.as_ref(), token, OffsetDateTime::now_utc())
            .await?;
        check_password(new_password)?;
        let user = self
            .resets
            .consume(
                self.users.as_ref(),
                token,
                new_password,
                OffsetDateTime::now_utc(),
            )
            .await?;
        Ok(user)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<User, AppError> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AppError> {
        Ok(self.users.list().await?)
    }

    #[instrument(skip(self))]
    pub async fn change_role(&self, user_id: Uuid, role: Role) -> Result<User, AppError> {
        let user = self
            .users
            .update_role(user_id, role)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".into()))?;
        info!(user_id = %user.id, to = %role, "role changed");
        Ok(user)
    }

    fn reset_email(&self, user: &User, token: &str) -> Email {
        let url = format!("{}/auth/resetPassword/{}", self.public_base_url, token);
        Email {
            to: user.email.clone(),
            subject: "Password change request received".into(),
            body: format!(
                "We have received a password reset request. Please use the link below to reset your password:\n\n\
                 {url}\n\n\
                 This reset link is valid for {} minutes.",
                self.resets.ttl_minutes()
            ),
        }
    }
}
