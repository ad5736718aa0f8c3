use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

const DEFAULT_SECRET: &str = "change-me";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn is_development(self) -> bool {
        self == Environment::Development
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Honour `X-Forwarded-For` / `X-Real-IP` when identifying clients.
    pub trust_proxy: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub secret: String,
    pub issuer: String,
    pub token_ttl_hours: i64,
    pub bootstrap_admin_email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    pub development_origins: Vec<String>,
    pub production_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub enabled: bool,
    /// Number of worker processes, `0` means one per CPU.
    pub workers: usize,
    pub restart_delay_ms: u64,
    pub max_restart_delay_ms: u64,
    pub stable_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TasksConfig {
    pub enabled: bool,
    pub album_covers: String,
    pub album_archives: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SitemapConfig {
    pub cdn_base_url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AnalyticsConfig {
    pub property_id: String,
    pub credentials_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
    pub cluster: ClusterConfig,
    pub rate_limit: RateLimitConfig,
    pub tasks: TasksConfig,
    pub sitemap: SitemapConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    pub security: Option<SecurityConfig>,
}

impl AppConfig {
    /// Origins allowed by CORS for the active environment.
    pub fn cors_origins(&self) -> &[String] {
        match self.environment {
            Environment::Production => &self.cors.production_origins,
            Environment::Development => &self.cors.development_origins,
        }
    }

    /// Worker processes to start. Without `SO_REUSEPORT` only one worker can bind the port.
    pub fn worker_count(&self) -> usize {
        if cfg!(not(unix)) {
            return 1;
        }
        if self.cluster.workers == 0 {
            num_cpus::get().max(1)
        } else {
            self.cluster.workers
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => panic!("Failed to deserialize default config: {}", e),
            },
            Err(e) => panic!("Failed to parse default config: {}", e),
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: galleria.toml (in CWD)
        .add_source(::config::File::with_name("galleria").required(false));

    if let Ok(custom_path) = std::env::var("GALLERIA_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("GALLERIA")
            .prefix_separator("__")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cors.development_origins")
            .with_list_parse_key("cors.production_origins")
            .try_parsing(true),
    );

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    if cfg.database.max_connections == 0 {
        return Err(anyhow::anyhow!("database.max_connections must be > 0"));
    }
    if cfg.storage.max_upload_bytes == 0 {
        return Err(anyhow::anyhow!("storage.max_upload_bytes must be > 0"));
    }

    if cfg.auth.secret.trim().is_empty() {
        return Err(anyhow::anyhow!("auth.secret must not be empty"));
    }
    if cfg.environment == Environment::Production && cfg.auth.secret == DEFAULT_SECRET {
        return Err(anyhow::anyhow!("auth.secret must be changed in production"));
    }
    if cfg.auth.token_ttl_hours <= 0 {
        return Err(anyhow::anyhow!("auth.token_ttl_hours must be > 0"));
    }

    if cfg.rate_limit.max_requests == 0 || cfg.rate_limit.window_seconds == 0 {
        return Err(anyhow::anyhow!("rate_limit.max_requests and rate_limit.window_seconds must be > 0"));
    }

    if cfg.cluster.max_restart_delay_ms < cfg.cluster.restart_delay_ms {
        return Err(anyhow::anyhow!("cluster.max_restart_delay_ms must be >= cluster.restart_delay_ms"));
    }

    for (key, expr) in [("tasks.album_covers", &cfg.tasks.album_covers), ("tasks.album_archives", &cfg.tasks.album_archives)] {
        if let Err(e) = cron::Schedule::from_str(expr) {
            return Err(anyhow::anyhow!("invalid cron expression for {}: '{}' ({})", key, expr, e));
        }
    }

    Ok(())
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    let path = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .map(|p| p.split('?').next().unwrap_or(p));
    if let Some(path) = path {
        if path.is_empty() || path.starts_with(":memory:") {
            return Ok(());
        }
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
    }
    Ok(())
}
