use std::{marker::PhantomData, sync::Arc};

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::request::Parts,
};
use tracing::warn;

use super::{claims::Identity, extractors::AuthUser, jwt::JwtKeys, repo_types::Role};
use crate::error::AppError;

/// True iff `actual` is one of `required`.
pub fn is_authorized(required: &[Role], actual: Role) -> bool {
    required.iter().any(|r| match (*r, actual) {
        (Role::Owner, Role::Owner) | (Role::Admin, Role::Admin) | (Role::User, Role::User) => true,
        (Role::Owner | Role::Admin | Role::User, _) => false,
    })
}

/// Set of roles allowed through a [`RequireRole`] extractor.
pub trait RolePolicy: Send + Sync + 'static {
    const ALLOWED: &'static [Role];
}

/// OWNER only.
pub struct OwnerOnly;

impl RolePolicy for OwnerOnly {
    const ALLOWED: &'static [Role] = &[Role::Owner];
}

/// OWNER or ADMIN.
pub struct Staff;

impl RolePolicy for Staff {
    const ALLOWED: &'static [Role] = &[Role::Owner, Role::Admin];
}

/// Authenticated caller whose role satisfies `P`.
///
/// A missing or bad token rejects with 401 before the role is looked at;
/// a valid token with the wrong role rejects with 403.
pub struct RequireRole<P: RolePolicy> {
    pub identity: Identity,
    _policy: PhantomData<P>,
}

#[async_trait]
impl<S, P> FromRequestParts<S> for RequireRole<P>
where
    S: Send + Sync,
    Arc<JwtKeys>: FromRef<S>,
    P: RolePolicy,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(identity) = AuthUser::from_request_parts(parts, state).await?;

        if !is_authorized(P::ALLOWED, identity.role) {
            warn!(user_id = %identity.user_id, role = %identity.role, "role not permitted");
            return Err(AppError::Forbidden(
                "You do not have permission to perform this action".into(),
            ));
        }

        Ok(Self {
            identity,
            _policy: PhantomData,
        })
    }
}
