//! Keeps `N` worker processes alive. Workers are this binary re-executed with
//! [`WORKER_ID_ENV`] set; their stdout carries [`WorkerMessage`] lines.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::message::{parse_line, MessageKind, WorkerMessage};
use super::worker::{RUN_TASKS_ENV, WORKER_ID_ENV};
use crate::config::{AppConfig, ClusterConfig};
use crate::server::shutdown_signal;

/// How long a worker gets to drain its connections after SIGTERM before it is killed.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Delay before restarting a worker: doubles while workers keep crashing quickly and
/// drops back to the base delay once a worker stayed up long enough.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    stable_after: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(cfg: &ClusterConfig) -> Self {
        let base = Duration::from_millis(cfg.restart_delay_ms);
        Self {
            base,
            max: Duration::from_millis(cfg.max_restart_delay_ms).max(base),
            stable_after: Duration::from_secs(cfg.stable_after_secs),
            current: base,
        }
    }

    /// Delay to wait after a worker exited having run for `uptime`.
    pub fn next_delay(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.stable_after {
            self.current = self.base;
        }
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

#[derive(Debug, Clone, Copy)]
struct WorkerInfo {
    id: u64,
    pid: Option<u32>,
}

#[derive(Clone)]
struct Shared {
    exe: PathBuf,
    args: Vec<OsString>,
    cluster: ClusterConfig,
    next_id: Arc<AtomicU64>,
    workers: Arc<Mutex<HashMap<usize, WorkerInfo>>>,
    shutdown: CancellationToken,
}

impl Shared {
    fn register(&self, slot: usize, info: Option<WorkerInfo>) {
        if let Ok(mut workers) = self.workers.lock() {
            match info {
                Some(info) => {
                    workers.insert(slot, info);
                }
                None => {
                    workers.remove(&slot);
                }
            }
        }
    }
}

/// Runs the supervisor until SIGINT/SIGTERM, then stops every worker.
pub async fn run(cfg: &AppConfig) -> anyhow::Result<()> {
    let count = cfg.worker_count();
    let shared = Shared {
        exe: std::env::current_exe()?,
        args: std::env::args_os().skip(1).collect(),
        cluster: cfg.cluster.clone(),
        next_id: Arc::new(AtomicU64::new(1)),
        workers: Arc::new(Mutex::new(HashMap::new())),
        shutdown: CancellationToken::new(),
    };
    tracing::info!("Supervisor {} starting {} workers", std::process::id(), count);

    let slots: Vec<_> = (0..count).map(|slot| tokio::spawn(run_slot(slot, shared.clone()))).collect();

    shutdown_signal().await;
    shared.shutdown.cancel();
    for slot in slots {
        let _ = slot.await;
    }
    tracing::info!("All workers stopped");
    Ok(())
}

async fn run_slot(slot: usize, shared: Shared) {
    let mut backoff = Backoff::new(&shared.cluster);

    loop {
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
        let mut command = Command::new(&shared.exe);
        command
            .args(&shared.args)
            .env(WORKER_ID_ENV, id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Scheduled tasks run in exactly one worker.
        if slot == 0 {
            command.env(RUN_TASKS_ENV, "1");
        } else {
            command.env_remove(RUN_TASKS_ENV);
        }

        let started = Instant::now();
        match command.spawn() {
            Ok(mut child) => {
                shared.register(slot, Some(WorkerInfo { id, pid: child.id() }));
                tracing::info!(pid = ?child.id(), "Worker #{} is online", id);

                if let Some(stdout) = child.stdout.take() {
                    tokio::spawn(relay(id, stdout, false));
                }
                if let Some(stderr) = child.stderr.take() {
                    tokio::spawn(relay(id, stderr, true));
                }

                let status = tokio::select! {
                    status = child.wait() => status,
                    _ = shared.shutdown.cancelled() => {
                        match stop_worker(&mut child, id, STOP_GRACE).await {
                            Ok(status) => {
                                let (code, signal) = describe_exit(status);
                                tracing::info!("Worker #{} stopped with code: {} and signal: {}", id, code, signal);
                            }
                            Err(e) => tracing::error!("Could not stop worker #{}: {}", id, e),
                        }
                        shared.register(slot, None);
                        return;
                    }
                };
                shared.register(slot, None);

                match status {
                    Ok(status) => {
                        let (code, signal) = describe_exit(status);
                        tracing::warn!("Worker #{} died with code: {} and signal: {}", id, code, signal);
                    }
                    Err(e) => tracing::error!("Lost track of worker #{}: {}", id, e),
                }
            }
            Err(e) => tracing::error!("Could not start worker #{}: {}", id, e),
        }

        let delay = backoff.next_delay(started.elapsed());
        tracing::info!(delay_ms = delay.as_millis() as u64, "Starting a new worker");
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Asks the worker to shut down gracefully and kills it once `grace` has passed.
async fn stop_worker(child: &mut Child, id: u64, grace: Duration) -> std::io::Result<ExitStatus> {
    if request_stop(child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => return status,
            Err(_) => tracing::warn!("Worker #{} did not stop within {:?}, killing it", id, grace),
        }
    }
    child.kill().await?;
    child.wait().await
}

#[cfg(unix)]
fn request_stop(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; `pid` is our own unreaped child.
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == 0 {
        true
    } else {
        tracing::warn!(pid, "Could not send SIGTERM: {}", std::io::Error::last_os_error());
        false
    }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) -> bool {
    false
}

/// Forwards a worker's output line by line. stderr lines are always errors.
async fn relay<R: AsyncRead + Unpin>(id: u64, output: R, is_stderr: bool) {
    let mut lines = BufReader::new(output).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let message =
            if is_stderr { WorkerMessage::new(MessageKind::Error, line) } else { parse_line(&line) };
        dispatch(id, &message);
    }
}

fn dispatch(id: u64, message: &WorkerMessage) {
    let worker = format!("Worker #{}", id);
    match message.kind {
        MessageKind::Log => tracing::info!(worker = %worker, "{}", message.content),
        MessageKind::Warn => tracing::warn!(worker = %worker, "{}", message.content),
        MessageKind::Error => tracing::error!(worker = %worker, "{}", message.content),
    }
}

fn describe_exit(status: ExitStatus) -> (String, String) {
    let code = status.code().map(|c| c.to_string()).unwrap_or_else(|| "none".to_string());
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal().map(|s| s.to_string()).unwrap_or_else(|| "none".to_string())
    };
    #[cfg(not(unix))]
    let signal = "none".to_string();
    (code, signal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster() -> ClusterConfig {
        ClusterConfig {
            enabled: true,
            workers: 2,
            restart_delay_ms: 100,
            max_restart_delay_ms: 1000,
            stable_after_secs: 30,
        }
    }

    #[test]
    fn quick_crashes_double_the_delay_up_to_the_cap() {
        let mut backoff = Backoff::new(&cluster());
        let quick = Duration::from_secs(1);
        let delays: Vec<u128> = (0..6).map(|_| backoff.next_delay(quick).as_millis()).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[cfg(unix)]
    fn shell(script: &str) -> Child {
        Command::new("sh").arg("-c").arg(script).kill_on_drop(true).spawn().unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_lets_the_worker_exit_on_sigterm() {
        let mut child = shell("trap 'exit 0' TERM; while true; do sleep 0.05; done");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = stop_worker(&mut child, 1, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.code(), Some(0));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_a_worker_that_ignores_sigterm() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = shell("trap '' TERM; while true; do sleep 0.05; done");
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = stop_worker(&mut child, 2, Duration::from_millis(300)).await.unwrap();
        assert_eq!(status.signal(), Some(9));
    }

    #[test]
    fn stable_worker_resets_the_delay() {
        let mut backoff = Backoff::new(&cluster());
        backoff.next_delay(Duration::from_secs(1));
        backoff.next_delay(Duration::from_secs(1));
        assert_eq!(backoff.next_delay(Duration::from_secs(60)), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(Duration::from_secs(1)), Duration::from_millis(200));
    }
}
