use super::ip::client_ip;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, Extensions, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{
    collections::HashMap,
    convert::Infallible,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::RwLock;

use crate::auth::{bearer_token, verify_token};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Names of the endpoints with their own limits.
pub mod endpoint {
    pub const CREATE_ALBUM: &str = "POST /albums";
    pub const CREATE_USER: &str = "POST /users";
    pub const CURRENT_USER: &str = "GET /users/@me";
}

/// A thread-safe rate limiter based on the sliding window algorithm.
#[derive(Clone)]
pub struct RateLimiter {
    requests: Arc<RwLock<HashMap<String, Vec<Instant>>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    /// Creates a new `RateLimiter`.
    ///
    /// # Arguments
    ///
    /// * `max_requests` - The maximum number of requests allowed within the time window.
    /// * `window_seconds` - The duration of the time window in seconds.
    pub fn new(max_requests: usize, window_seconds: u64) -> Self {
        Self {
            requests: Arc::new(RwLock::new(HashMap::new())),
            max_requests,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Records a request for `key` if it fits in the window, otherwise returns
    /// `AppError::RateLimited` with the time until the oldest request expires.
    pub async fn check_rate_limit(&self, key: &str) -> AppResult<()> {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        let timestamps = requests.entry(key.to_string()).or_default();

        // On time skew keep the timestamp rather than letting requests through
        timestamps.retain(|&t| now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true));

        if timestamps.len() >= self.max_requests {
            let oldest = timestamps.first().copied().unwrap_or(now);
            let retry_after = match now.checked_duration_since(oldest) {
                Some(elapsed) => self.window.saturating_sub(elapsed),
                None => Duration::from_secs(1),
            };
            return Err(AppError::RateLimited { retry_after_seconds: retry_after.as_secs().max(1) });
        }

        timestamps.push(now);
        Ok(())
    }

    /// Drops timestamps outside the window and forgets keys with none left.
    pub async fn cleanup_old_entries(&self) {
        let now = Instant::now();
        let mut requests = self.requests.write().await;

        requests.retain(|_, timestamps| {
            timestamps.retain(|&t| now.checked_duration_since(t).map(|d| d < self.window).unwrap_or(true));
            !timestamps.is_empty()
        });
    }

    #[cfg(test)]
    pub(crate) async fn tracked_keys(&self) -> usize {
        self.requests.read().await.len()
    }
}

/// The identity a request is rate limited under: `user:<id>` for a valid bearer
/// token, `ip:<address>` otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitKey(pub String);

impl RateLimitKey {
    pub fn resolve(headers: &HeaderMap, extensions: &Extensions, config: &AppConfig) -> Self {
        let subject = headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token)
            .and_then(|token| verify_token(&config.auth, token).ok())
            .map(|claims| claims.sub);

        match subject {
            Some(sub) => RateLimitKey(format!("user:{}", sub)),
            None => RateLimitKey(format!("ip:{}", client_ip(headers, extensions, config.server.trust_proxy))),
        }
    }
}

impl<S> FromRequestParts<S> for RateLimitKey
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(key) = parts.extensions.get::<RateLimitKey>() {
            return Ok(key.clone());
        }
        // Routers built without the global middleware still get a usable key
        Ok(RateLimitKey(format!("ip:{}", client_ip(&parts.headers, &parts.extensions, false))))
    }
}

/// Global rate limiting. Resolves the request's [`RateLimitKey`], checks the global
/// limiter and stores the key on the request for per-endpoint checks.
pub async fn rate_limit_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let key = RateLimitKey::resolve(req.headers(), req.extensions(), &state.config);

    if let Err(e) = state.global_limiter.check_rate_limit(&key.0).await {
        tracing::debug!(key = %key.0, "Global rate limit exceeded");
        return e.into_response();
    }

    req.extensions_mut().insert(key);
    next.run(req).await
}

/// A manager for per-endpoint rate limiters.
#[derive(Clone)]
pub struct EndpointRateLimiter {
    limiters: Arc<HashMap<String, RateLimiter>>,
}

impl Default for EndpointRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl EndpointRateLimiter {
    /// Creates a new, empty `EndpointRateLimiter`.
    pub fn new() -> Self {
        Self { limiters: Arc::new(HashMap::new()) }
    }

    /// Adds or replaces endpoint limits given as `(endpoint, max_requests, window_seconds)`.
    pub fn with_limits(self, limits: Vec<(&str, usize, u64)>) -> Self {
        let mut limiters = Arc::try_unwrap(self.limiters).unwrap_or_else(|shared| (*shared).clone());
        for (endpoint, max_requests, window_seconds) in limits {
            limiters.insert(endpoint.to_string(), RateLimiter::new(max_requests, window_seconds));
        }
        Self { limiters: Arc::new(limiters) }
    }

    /// Checks `key` against the limit of `endpoint`. Endpoints without a limit always pass.
    pub async fn check_endpoint_limit(&self, endpoint: &str, key: &RateLimitKey) -> AppResult<()> {
        match self.limiters.get(endpoint) {
            Some(limiter) => limiter.check_rate_limit(&key.0).await,
            None => Ok(()),
        }
    }

    /// Cleans up old entries from all endpoint-specific rate limiters.
    pub async fn cleanup_all(&self) {
        for limiter in self.limiters.values() {
            limiter.cleanup_old_entries().await;
        }
    }
}
