use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};

use crate::auth::{bearer_token, verify_token};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::types::User;

const MISSING_TOKEN: &str = "No authorization header provided.";
const INVALID_TOKEN: &str = "Invalid authorization token.";

/// The authenticated user, attached to the request by [`require_auth`].
#[derive(Clone, Debug)]
pub struct AuthUser(pub User);

impl AuthUser {
    pub fn require_admin(&self) -> AppResult<()> {
        if self.0.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden("You do not have permission to perform this action.".to_string()))
        }
    }
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthUser>()
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(MISSING_TOKEN.to_string()))
    }
}

/// Rejects requests without a valid bearer token for an existing user.
///
/// The token must carry the configured issuer and must not be expired; its
/// subject is looked up so that deleted accounts lose access immediately.
pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> AppResult<Response> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized(MISSING_TOKEN.to_string()))?;
    let token = bearer_token(token).ok_or_else(|| AppError::Unauthorized(INVALID_TOKEN.to_string()))?;

    let claims = verify_token(&state.config.auth, token).map_err(|e| {
        tracing::debug!("Rejected token: {}", e);
        AppError::Unauthorized(INVALID_TOKEN.to_string())
    })?;

    let user = state
        .db
        .get_user_by_id(&claims.sub)
        .await?
        .ok_or_else(|| AppError::Unauthorized(INVALID_TOKEN.to_string()))?;

    req.extensions_mut().insert(AuthUser(user));
    Ok(next.run(req).await)
}
