use axum::{
    extract::State,
    routing::{get, post},
    Router,
};
use validator::Validate;

use crate::auth::{issue_token, verify_password};
use crate::error::{AppError, AppResult};
use crate::extract::Json;
use crate::middleware::AuthUser;
use crate::routes::{Middleware, Route, Routes};
use crate::state::AppState;
use crate::types::{LoginRequest, LoginResponse, User};

const INVALID_CREDENTIALS: &str = "Invalid credentials.";

pub struct Authentication;

impl Route for Authentication {
    fn path(&self) -> &'static str {
        "/authentication"
    }

    fn middlewares(&self) -> &'static [Middleware] {
        &[Middleware::Auth]
    }

    fn routes(&self) -> Routes {
        Routes::guarded(Router::new().route("/verify", get(verify)))
            .with_open(Router::new().route("/login", post(login)))
    }
}

/// `POST /authentication/login`: exchanges email and password for a session token.
async fn login(State(state): State<AppState>, Json(body): Json<LoginRequest>) -> AppResult<Json<LoginResponse>> {
    body.validate()?;

    let Some(user) = state.db.get_user_by_email(&body.email).await? else {
        tracing::debug!("Login attempt for unknown account");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    };
    let stored = state.db.get_user_password_hash(&user.id).await?.unwrap_or_default();

    let password = body.password;
    let valid = tokio::task::spawn_blocking(move || verify_password(&password, &stored))
        .await
        .map_err(anyhow::Error::from)?;
    if !valid {
        tracing::debug!(user = %user.id, "Login attempt with a wrong password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.to_string()));
    }

    let token = issue_token(&state.config.auth, &user.id)
        .map_err(|e| AppError::Internal(anyhow::anyhow!("could not sign session token: {}", e)))?;
    tracing::info!(user = %user.id, "User logged in");
    Ok(Json(LoginResponse { token, user }))
}

async fn verify(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}
