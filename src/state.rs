use std::sync::Arc;

use crate::analytics::AnalyticsProvider;
use crate::config::AppConfig;
use crate::database::Database;
use crate::metrics::Metrics;
use crate::middleware::rate_limit::{endpoint, RateLimiter};
use crate::middleware::EndpointRateLimiter;
use crate::storage::Storage;

/// The shared application state handed to every handler and middleware.
///
/// Cloning is cheap: every field is a handle onto shared data.
#[derive(Clone)]
pub struct AppState {
    /// Data access layer over the SQLite pool.
    pub db: Database,
    pub config: Arc<AppConfig>,
    /// Media directories under the configured storage root.
    pub storage: Storage,
    pub metrics: Metrics,
    /// Limit applied to every request, keyed by user or client address.
    pub global_limiter: RateLimiter,
    /// Tighter limits for a few expensive or sensitive endpoints.
    pub rate_limiter: EndpointRateLimiter,
    /// Reporting backend; `None` when analytics are not configured.
    pub analytics: Option<Arc<dyn AnalyticsProvider>>,
}

impl AppState {
    /// Creates the state with the endpoint limits the API enforces:
    /// - `POST /albums`: 5 per 15 seconds
    /// - `POST /users`: 5 per second
    /// - `GET /users/@me`: 5 per second
    pub fn new(pool: sqlx::SqlitePool, config: AppConfig) -> Self {
        let rate_limiter = EndpointRateLimiter::new().with_limits(vec![
            (endpoint::CREATE_ALBUM, 5, 15),
            (endpoint::CREATE_USER, 5, 1),
            (endpoint::CURRENT_USER, 5, 1),
        ]);
        let global_limiter = RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window_seconds);
        let storage = Storage::new(config.storage.root.clone());

        Self {
            db: Database::new(pool),
            config: Arc::new(config),
            storage,
            metrics: Metrics::new(),
            global_limiter,
            rate_limiter,
            analytics: None,
        }
    }

    pub fn with_analytics(mut self, provider: Arc<dyn AnalyticsProvider>) -> Self {
        self.analytics = Some(provider);
        self
    }
}
