//! HTTP route modules.
//!
//! Every module implements [`Route`]: a mount path, a position deciding the mount
//! order, the named middlewares it needs, and its handlers split into guarded and
//! open routers. Middlewares only wrap the guarded router, which is how single
//! endpoints (downloads, image transforms, login) opt out of authentication.
//!
//! - `albums`: album CRUD, covers and archive downloads
//! - `analytics`: site analytics summary
//! - `authentication`: login and token verification
//! - `files`: uploads, listing, image transforms and downloads
//! - `health`: liveness, readiness, version and metrics
//! - `sitemap`: public albums for sitemap generation
//! - `users`: account management

pub mod albums;
pub mod analytics;
pub mod authentication;
pub mod files;
pub mod health;
pub mod sitemap;
pub mod uploads;
pub mod users;

use axum::middleware::from_fn_with_state;
use axum::Router;

use crate::middleware::auth::require_auth;
use crate::state::AppState;

/// Named middlewares a route module can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Middleware {
    Auth,
}

/// Handlers of one module. `guarded` receives the module's middlewares, `open` does not.
#[derive(Default)]
pub struct Routes {
    pub guarded: Option<Router<AppState>>,
    pub open: Option<Router<AppState>>,
}

impl Routes {
    pub fn guarded(router: Router<AppState>) -> Self {
        Self { guarded: Some(router), open: None }
    }

    pub fn open(router: Router<AppState>) -> Self {
        Self { guarded: None, open: Some(router) }
    }

    pub fn with_open(mut self, router: Router<AppState>) -> Self {
        self.open = Some(router);
        self
    }
}

pub trait Route: Send + Sync {
    /// Mount point, e.g. `/albums`.
    fn path(&self) -> &'static str;

    /// Lower positions are mounted first.
    fn position(&self) -> u32 {
        2
    }

    fn middlewares(&self) -> &'static [Middleware] {
        &[]
    }

    fn routes(&self) -> Routes;
}

/// All route modules of the API.
pub fn registry() -> Vec<Box<dyn Route>> {
    vec![
        Box::new(albums::Albums),
        Box::new(analytics::Analytics),
        Box::new(authentication::Authentication),
        Box::new(files::Files),
        Box::new(health::Health),
        Box::new(sitemap::Sitemap),
        Box::new(users::Users),
    ]
}

/// Nests every registered module under its path, in position order.
pub fn mount(state: &AppState) -> Router<AppState> {
    let mut modules = registry();
    modules.sort_by_key(|m| m.position());

    let mut router = Router::new();
    for module in &modules {
        let Routes { guarded, open } = module.routes();
        let mut combined = Router::new();

        if let Some(mut guarded) = guarded {
            for middleware in module.middlewares() {
                guarded = match middleware {
                    Middleware::Auth => guarded.route_layer(from_fn_with_state(state.clone(), require_auth)),
                };
            }
            combined = combined.merge(guarded);
        }
        // Merged last: on a shared path the open side's unguarded 405 fallback is the one kept.
        if let Some(open) = open {
            combined = combined.merge(open);
        }

        tracing::debug!(path = module.path(), position = module.position(), "Mounted route module");
        router = router.nest(module.path(), combined);
    }

    tracing::info!("Loaded {} routes.", modules.len());
    router
}
