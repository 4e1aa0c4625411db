use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        dto::{
            ChangeRoleRequest, ForgotPasswordRequest, LoginRequest, LoginResponse,
            MessageResponse, PublicUser, ResetPasswordRequest, SignUpRequest, UserResponse,
            UsersResponse,
        },
        extractors::{AppJson, AppPath, AuthUser},
        gate::{OwnerOnly, RequireRole, Staff},
        services::{AuthService, SignUp},
    },
    error::AppError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(sign_up))
        .route("/login", post(login))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/:token", patch(reset_password))
}

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/profile", get(profile))
        .route("/allUsers", get(all_users))
        .route("/changeRule/:id", patch(change_role))
}

#[instrument(skip(auth, payload))]
pub async fn sign_up(
    State(auth): State<AuthService>,
    AppJson(payload): AppJson<SignUpRequest>,
) -> Result<(StatusCode, Json<UserResponse>), AppError> {
    let user = auth
        .sign_up(SignUp {
            name: payload.name,
            email: payload.email,
            password: payload.password,
            role: payload.role,
        })
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            status: "success",
            user: user.into(),
        }),
    ))
}

#[instrument(skip(auth, payload))]
pub async fn login(
    State(auth): State<AuthService>,
    AppJson(payload): AppJson<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let (token, user) = auth.login(&payload.email, &payload.password).await?;
    Ok(Json(LoginResponse {
        status: "success",
        token,
        user: user.into(),
    }))
}

#[instrument(skip(auth, payload))]
pub async fn forgot_password(
    State(auth): State<AuthService>,
    AppJson(payload): AppJson<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    auth.forgot_password(&payload.email).await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Password reset link sent to the user email",
    }))
}

#[instrument(skip(auth, token, payload))]
pub async fn reset_password(
    State(auth): State<AuthService>,
    AppPath(token): AppPath<String>,
    AppJson(payload): AppJson<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    auth.reset_password(&token, &payload.new_password).await?;
    Ok(Json(MessageResponse {
        status: "success",
        message: "Password reset successfully",
    }))
}

#[instrument(skip(auth))]
pub async fn profile(
    State(auth): State<AuthService>,
    AuthUser(identity): AuthUser,
) -> Result<Json<UserResponse>, AppError> {
    let user = auth.profile(identity.user_id).await?;
    Ok(Json(UserResponse {
        status: "success",
        user: user.into(),
    }))
}

#[instrument(skip(auth, caller))]
pub async fn all_users(
    State(auth): State<AuthService>,
    caller: RequireRole<Staff>,
) -> Result<Json<UsersResponse>, AppError> {
    tracing::debug!(user_id = %caller.identity.user_id, "listing users");
    let users: Vec<PublicUser> = auth
        .list_users()
        .await?
        .into_iter()
        .map(PublicUser::from)
        .collect();
    Ok(Json(UsersResponse {
        status: "success",
        results: users.len(),
        users,
    }))
}

#[instrument(skip(auth, caller, payload))]
pub async fn change_role(
    State(auth): State<AuthService>,
    caller: RequireRole<OwnerOnly>,
    AppPath(id): AppPath<Uuid>,
    AppJson(payload): AppJson<ChangeRoleRequest>,
) -> Result<Json<UserResponse>, AppError> {
    tracing::debug!(user_id = %caller.identity.user_id, target = %id, "changing role");
    let user = auth.change_role(id, payload.role).await?;
    Ok(Json(UserResponse {
        status: "success",
        user: user.into(),
    }))
}
