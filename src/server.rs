//! Process-level composition: database, state, router, listener and background jobs.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{
    ACCEPT, ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, ORIGIN,
};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::from_fn_with_state;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::net::{TcpListener, TcpSocket};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;

use crate::analytics::GoogleAnalytics;
use crate::auth::{generate_password, hash_password};
use crate::config::{self, AppConfig, AuthConfig};
use crate::database::Database;
use crate::db;
use crate::middleware::{rate_limit::rate_limit_middleware, security_headers, validation};
use crate::routes;
use crate::state::AppState;
use crate::tasks::{self, TaskContext};
use crate::types::{new_id, now_ms, NewUser, ROLE_ADMIN};

/// How this process was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Single process, cluster disabled.
    Standalone,
    /// Started by the supervisor.
    Worker { id: u64, run_tasks: bool },
}

impl Role {
    fn runs_tasks(self) -> bool {
        match self {
            Role::Standalone => true,
            Role::Worker { run_tasks, .. } => run_tasks,
        }
    }
}

/// Opens (and creates if needed) the SQLite database with the connection pragmas
/// every connection gets.
pub async fn connect_pool(cfg: &AppConfig) -> anyhow::Result<SqlitePool> {
    let url = &cfg.database.url;
    config::ensure_sqlite_parent_dir(url)?;
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(cfg.database.max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA cache_size=-65536;").execute(&mut *conn).await; // ~64MB page cache
                let _ = sqlx::query("PRAGMA temp_store=MEMORY;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect_with(options)
        .await?;
    Ok(pool)
}

/// Everything a server needs before it can accept requests.
pub async fn build_state(cfg: AppConfig) -> anyhow::Result<AppState> {
    let pool = connect_pool(&cfg).await?;
    db::init_db(&pool).await?;
    info!("Successfully connected to database.");

    let analytics = match GoogleAnalytics::from_config(&cfg.analytics) {
        Ok(provider) => provider,
        Err(e) => {
            tracing::warn!("Analytics disabled: {:#}", e);
            None
        }
    };

    let mut state = AppState::new(pool, cfg);
    if let Some(provider) = analytics {
        state = state.with_analytics(provider);
    }
    state.storage.ensure_dirs().await?;
    bootstrap_admin(&state.db, &state.config.auth).await?;
    Ok(state)
}

/// Creates the first admin account when no user exists and an email is configured.
/// The generated password is logged once.
pub async fn bootstrap_admin(db: &Database, auth: &AuthConfig) -> anyhow::Result<()> {
    let Some(email) = auth.bootstrap_admin_email.as_deref().map(str::trim).filter(|e| !e.is_empty()) else {
        return Ok(());
    };
    if db.get_user_count().await? > 0 {
        return Ok(());
    }

    let password = generate_password();
    let to_hash = password.clone();
    let password_hash = tokio::task::spawn_blocking(move || hash_password(&to_hash)).await??;
    let admin = NewUser {
        id: new_id(),
        first_name: "Admin".to_string(),
        last_name: String::new(),
        email: email.to_string(),
        role: ROLE_ADMIN.to_string(),
        password_hash,
        created_at: now_ms(),
    };

    match db.insert_user(&admin).await {
        Ok(()) => {
            tracing::warn!("Created bootstrap admin {} with password: {}", email, password);
            Ok(())
        }
        // Another worker created it first.
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn cors_layer(cfg: &AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_origins()
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            ORIGIN,
            AUTHORIZATION,
            CACHE_CONTROL,
            HeaderName::from_static("x-requested-with"),
            CONTENT_TYPE,
        ])
}

/// The full application router with every cross-cutting layer.
pub fn build_router(state: AppState) -> Router {
    let cfg = state.config.clone();

    // Media is served straight from the storage root and never changes under a name.
    let static_files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*")))
        .layer(SetResponseHeaderLayer::overriding(
            CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000, immutable"),
        ))
        .service(ServeDir::new(state.storage.root()));

    routes::mount(&state)
        .fallback_service(static_files)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(cfg.storage.max_upload_bytes))
        .layer(from_fn_with_state(cfg.clone(), validation::validate_request_middleware))
        .layer(from_fn_with_state(state, rate_limit_middleware))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn_with_state(cfg.clone(), security_headers::security_headers_middleware))
        .layer(cors_layer(&cfg))
}

/// Binds the listen address so that several processes can share it.
pub fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() { TcpSocket::new_v4()? } else { TcpSocket::new_v6()? };
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

/// Serves HTTP until SIGINT/SIGTERM.
pub async fn run(cfg: AppConfig, role: Role) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", cfg.server.host, cfg.server.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", cfg.server.host, cfg.server.port, e))?;

    let state = build_state(cfg).await?;
    let shutdown = CancellationToken::new();

    // Periodic sweep of rate limiter windows to avoid memory growth
    {
        let global = state.global_limiter.clone();
        let endpoints = state.rate_limiter.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        global.cleanup_old_entries().await;
                        endpoints.cleanup_all().await;
                    }
                }
            }
        });
    }

    let task_handles = if state.config.tasks.enabled && role.runs_tasks() {
        let ctx = TaskContext { db: state.db.clone(), storage: state.storage.clone(), metrics: state.metrics.clone() };
        tasks::start(tasks::registry(&state.config), ctx, state.config.environment, shutdown.clone())
    } else {
        Vec::new()
    };

    let app = build_router(state);
    let listener = bind(addr)?;
    match role {
        Role::Standalone => info!("Galleria listening on http://{}", listener.local_addr()?),
        Role::Worker { id, .. } => info!("Worker #{} listening on http://{}", id, listener.local_addr()?),
    }

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.cancel();
        });
    }

    let stopped = shutdown.clone();
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { stopped.cancelled().await })
        .await?;

    shutdown.cancel();
    for handle in task_handles {
        let _ = handle.await;
    }
    Ok(())
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("Could not install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
