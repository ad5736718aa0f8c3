use axum::{extract::State, routing::get, Router};

use crate::analytics::{summarize, AnalyticsSummary};
use crate::error::{AppError, AppResult};
use crate::extract::Json;
use crate::routes::{Middleware, Route, Routes};
use crate::state::AppState;

pub struct Analytics;

impl Route for Analytics {
    fn path(&self) -> &'static str {
        "/analytics"
    }

    fn middlewares(&self) -> &'static [Middleware] {
        &[Middleware::Auth]
    }

    fn routes(&self) -> Routes {
        Routes::guarded(Router::new().route("/", get(analytics)))
    }
}

async fn analytics(State(state): State<AppState>) -> AppResult<Json<AnalyticsSummary>> {
    let provider = state
        .analytics
        .as_ref()
        .ok_or_else(|| AppError::ServiceUnavailable("Analytics are not configured.".to_string()))?;
    Ok(Json(summarize(provider.as_ref()).await))
}
