use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use validator::Validate;

use crate::auth::{generate_password, hash_password, verify_password};
use crate::error::{AppError, AppResult};
use crate::extract::{Json, Path, Query};
use crate::middleware::rate_limit::endpoint;
use crate::middleware::{AuthUser, RateLimitKey};
use crate::routes::{Middleware, Route, Routes};
use crate::state::AppState;
use crate::types::{
    new_id, now_ms, CreateUserRequest, CreateUserResponse, MessageResponse, NewUser, Page, PageQuery,
    UpdatePasswordRequest, User, ROLE_ADMIN, ROLE_USER,
};

const DEFAULT_PAGE_SIZE: i64 = 25;
const MAX_PAGE_SIZE: i64 = 100;
const USER_NOT_FOUND: &str = "The user you are looking for does not exist.";
const MIN_PASSWORD_LEN: usize = 6;
const MAX_PASSWORD_LEN: usize = 64;

pub struct Users;

impl Route for Users {
    fn path(&self) -> &'static str {
        "/users"
    }

    fn position(&self) -> u32 {
        1
    }

    fn middlewares(&self) -> &'static [Middleware] {
        &[Middleware::Auth]
    }

    fn routes(&self) -> Routes {
        Routes::guarded(
            Router::new()
                .route("/", get(list_users).post(create_user))
                .route("/@me", get(current_user))
                .route("/{id}", get(get_user))
                .route("/{id}/password/update", post(update_password)),
        )
    }
}

async fn list_users(State(state): State<AppState>, Query(query): Query<PageQuery>) -> AppResult<Json<Page<User>>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);

    let count = state.db.get_user_count().await?;
    let data = state.db.get_users_sorted((page - 1) * limit, limit).await?;
    let pages = (count + limit - 1) / limit;

    Ok(Json(Page { data, count, pages }))
}

/// `POST /users`: admins create accounts; the generated password is returned once.
async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    key: RateLimitKey,
    Json(body): Json<CreateUserRequest>,
) -> AppResult<(StatusCode, Json<CreateUserResponse>)> {
    state.rate_limiter.check_endpoint_limit(endpoint::CREATE_USER, &key).await?;
    auth.require_admin()?;
    let caller = auth.0;
    body.validate()?;

    let role = body.role.as_deref().unwrap_or(ROLE_USER);
    if role != ROLE_USER && role != ROLE_ADMIN {
        return Err(AppError::ValidationError {
            field: "role".to_string(),
            message: format!("The role must be '{}' or '{}'.", ROLE_USER, ROLE_ADMIN),
        });
    }
    if state.db.get_user_by_email(&body.email).await?.is_some() {
        return Err(AppError::Conflict("User already created.".to_string()));
    }

    let password = generate_password();
    let to_hash = password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&to_hash))
        .await
        .map_err(anyhow::Error::from)??;

    let user = NewUser {
        id: new_id(),
        first_name: body.first_name.trim().to_string(),
        last_name: body.last_name.trim().to_string(),
        email: body.email.trim().to_string(),
        role: role.to_string(),
        password_hash,
        created_at: now_ms(),
    };
    state.db.insert_user(&user).await.map_err(|e| match AppError::from(e) {
        AppError::Conflict(_) => AppError::Conflict("User already created.".to_string()),
        other => other,
    })?;

    tracing::info!(user = %user.id, role = %user.role, created_by = %caller.id, "User created");
    let created = state
        .db
        .get_user_by_id(&user.id)
        .await?
        .ok_or_else(|| AppError::Internal(anyhow::anyhow!("user {} vanished after insert", user.id)))?;
    Ok((StatusCode::CREATED, Json(CreateUserResponse { user: created, initial_password: password })))
}

async fn current_user(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    key: RateLimitKey,
) -> AppResult<Json<User>> {
    state.rate_limiter.check_endpoint_limit(endpoint::CURRENT_USER, &key).await?;
    Ok(Json(user))
}

/// Users may read their own account; admins may read any.
async fn get_user(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
) -> AppResult<Json<User>> {
    if id == "@me" || id == caller.id {
        return Ok(Json(caller));
    }
    if !caller.is_admin() {
        return Err(AppError::Forbidden("You do not have permission to perform this action.".to_string()));
    }
    if id.len() > 100 {
        return Err(AppError::NotFound(USER_NOT_FOUND.to_string()));
    }
    let user = state
        .db
        .get_user_by_id(&id)
        .await?
        .ok_or_else(|| AppError::NotFound(USER_NOT_FOUND.to_string()))?;
    Ok(Json(user))
}

/// Checks a password change request before any hashing happens.
fn check_password_change(body: &UpdatePasswordRequest) -> AppResult<(&str, &str)> {
    let (Some(password), Some(new_password)) = (body.password.as_deref(), body.new_password.as_deref()) else {
        return Err(AppError::BadRequest("Invalid body provided".to_string()));
    };
    if password.is_empty() || new_password.is_empty() {
        return Err(AppError::BadRequest("Invalid body provided".to_string()));
    }
    if password == new_password {
        return Err(AppError::BadRequest("Passwords have to be different".to_string()));
    }
    Ok((password, new_password))
}

/// `POST /users/{id}/password/update`: only for the caller's own account.
async fn update_password(
    State(state): State<AppState>,
    AuthUser(caller): AuthUser,
    Path(id): Path<String>,
    Json(body): Json<UpdatePasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    if id != "@me" && id != caller.id {
        return Err(AppError::Forbidden("You can only change your own password.".to_string()));
    }
    let (password, new_password) = check_password_change(&body)?;

    let stored = state.db.get_user_password_hash(&caller.id).await?.unwrap_or_default();
    let candidate = password.to_string();
    let matches = tokio::task::spawn_blocking(move || verify_password(&candidate, &stored))
        .await
        .map_err(anyhow::Error::from)?;
    if !matches {
        return Err(AppError::Unauthorized("Current password is incorrect".to_string()));
    }

    let length = new_password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&length) {
        return Err(AppError::BadRequest(format!(
            "Password must have {}-{} characters",
            MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
        )));
    }

    let to_hash = new_password.to_string();
    let hash = tokio::task::spawn_blocking(move || hash_password(&to_hash))
        .await
        .map_err(anyhow::Error::from)??;
    state.db.update_user_password(&caller.id, &hash).await?;

    tracing::info!(user = %caller.id, "Password changed");
    Ok(Json(MessageResponse { message: "The password was changed successfully".to_string() }))
}
