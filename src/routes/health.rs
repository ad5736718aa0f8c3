use crate::routes::{Route, Routes};
use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};

pub struct Health;

impl Route for Health {
    fn path(&self) -> &'static str {
        "/health"
    }

    fn position(&self) -> u32 {
        1
    }

    fn routes(&self) -> Routes {
        Routes::open(
            Router::new()
                .route("/", get(healthz))
                .route("/ready", get(readyz))
                .route("/version", get(version))
                .route("/metrics", get(metrics))
                .route("/metrics/prometheus", get(metrics_prometheus)),
        )
    }
}

// Liveness probe, never cached by clients or proxies
pub async fn healthz() -> impl IntoResponse {
    let now = chrono::Utc::now();
    let expires = (now - chrono::Duration::seconds(1)).format("%a, %d %b %Y %H:%M:%S GMT").to_string();
    (
        [
            (header::CACHE_CONTROL, "private, max-age=0, no-cache, no-store, must-revalidate".to_string()),
            (header::EXPIRES, expires),
        ],
        Json(serde_json::json!({
            "status": "OK",
            "latestCheck": now.timestamp_millis(),
        })),
    )
}

// Readiness probe: checks DB connectivity with timeout protection
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    match tokio::time::timeout(std::time::Duration::from_secs(5), state.db.ping()).await {
        Ok(Ok(())) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.get_snapshot())
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let series: [(&str, &str, &str, u64); 9] = [
        ("uploads", "counter", "Files uploaded", m.uploads as u64),
        ("bytes_uploaded", "counter", "Bytes uploaded", m.bytes_uploaded),
        ("files_deleted", "counter", "Files deleted", m.files_deleted as u64),
        ("albums_deleted", "counter", "Albums deleted", m.albums_deleted as u64),
        ("transforms", "counter", "Image transforms served", m.transforms as u64),
        ("archives_built", "counter", "Album archives built", m.archives_built as u64),
        ("task_runs", "counter", "Scheduled task runs", m.task_runs as u64),
        ("task_failures", "counter", "Scheduled task failures", m.task_failures as u64),
        ("uptime_seconds", "gauge", "Uptime seconds", m.uptime_seconds),
    ];
    let mut body = String::new();
    for (name, kind, help, value) in series {
        body.push_str(&format!(
            "# HELP galleria_{name} {help}\n# TYPE galleria_{name} {kind}\ngalleria_{name} {value}\n"
        ));
    }
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
