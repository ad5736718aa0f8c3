//! Scheduled maintenance tasks.
//!
//! Each task carries a cron expression (seconds first, six fields). Tasks without
//! one only run on demand through `galleria run-task <name>`.

pub mod archives;
pub mod covers;
pub mod metadata;

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, Environment};
use crate::database::Database;
use crate::metrics::Metrics;
use crate::storage::Storage;

/// What a task may touch.
#[derive(Clone)]
pub struct TaskContext {
    pub db: Database,
    pub storage: Storage,
    pub metrics: Metrics,
}

#[async_trait]
pub trait Task: Send + Sync {
    /// Identifier used on the command line, e.g. `album-covers`.
    fn name(&self) -> &'static str;

    /// Human readable name used in logs.
    fn title(&self) -> &'static str;

    /// Cron expression; `None` for tasks that only run on demand.
    fn schedule(&self) -> Option<&str>;

    /// Skipped by the scheduler in development.
    fn no_development(&self) -> bool {
        false
    }

    async fn execute(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

/// Every task known to the application, scheduled from `cfg.tasks`.
pub fn registry(cfg: &AppConfig) -> Vec<Arc<dyn Task>> {
    vec![
        Arc::new(covers::AlbumCovers::new(cfg.tasks.album_covers.clone())),
        Arc::new(archives::AlbumArchives::new(cfg.tasks.album_archives.clone())),
        Arc::new(metadata::FileMetadata),
    ]
}

/// Runs one task and records the outcome. Errors are logged, not returned.
pub async fn run(task: &dyn Task, ctx: &TaskContext) {
    tracing::info!("[Task] {} was executed.", task.title());
    ctx.metrics.inc_task_runs();
    let started = std::time::Instant::now();
    match task.execute(ctx).await {
        Ok(()) => tracing::debug!(task = task.name(), elapsed_ms = started.elapsed().as_millis() as u64, "Task finished"),
        Err(e) => {
            ctx.metrics.inc_task_failures();
            tracing::error!(task = task.name(), "[Task] {} failed: {:#}", task.title(), e);
        }
    }
}

/// Runs the task named `name` once, for the command line.
pub async fn run_once(tasks: &[Arc<dyn Task>], name: &str, ctx: &TaskContext) -> anyhow::Result<()> {
    let task = tasks.iter().find(|t| t.name() == name).with_context(|| {
        let known: Vec<&str> = tasks.iter().map(|t| t.name()).collect();
        format!("unknown task '{}', expected one of: {}", name, known.join(", "))
    })?;
    tracing::info!("[Task] {} was executed.", task.title());
    task.execute(ctx).await.with_context(|| format!("task '{}' failed", name))
}

/// Starts one loop per scheduled task. The loops end when `shutdown` is cancelled.
pub fn start(
    tasks: Vec<Arc<dyn Task>>,
    ctx: TaskContext,
    environment: Environment,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let total = tasks.len();
    let mut handles = Vec::new();

    for task in tasks {
        let Some(expression) = task.schedule() else { continue };
        if task.no_development() && environment.is_development() {
            tracing::debug!(task = task.name(), "Skipping task in development");
            continue;
        }
        let schedule = match Schedule::from_str(expression) {
            Ok(schedule) => schedule,
            Err(e) => {
                tracing::error!(task = task.name(), "Invalid schedule '{}': {}", expression, e);
                continue;
            }
        };

        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else { break };
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
                run(task.as_ref(), &ctx).await;
            }
            tracing::debug!(task = task.name(), "Task loop stopped");
        }));
    }

    tracing::info!("Loaded {}/{} tasks", handles.len(), total);
    handles
}
