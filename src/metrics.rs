use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Process-local counters for monitoring. Each worker keeps its own set.
#[derive(Clone)]
pub struct Metrics {
    pub uploads: Arc<AtomicUsize>,
    pub bytes_uploaded: Arc<AtomicU64>,
    pub files_deleted: Arc<AtomicUsize>,
    pub albums_deleted: Arc<AtomicUsize>,
    pub transforms: Arc<AtomicUsize>,
    pub archives_built: Arc<AtomicUsize>,
    pub task_runs: Arc<AtomicUsize>,
    pub task_failures: Arc<AtomicUsize>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            uploads: Arc::new(AtomicUsize::new(0)),
            bytes_uploaded: Arc::new(AtomicU64::new(0)),
            files_deleted: Arc::new(AtomicUsize::new(0)),
            albums_deleted: Arc::new(AtomicUsize::new(0)),
            transforms: Arc::new(AtomicUsize::new(0)),
            archives_built: Arc::new(AtomicUsize::new(0)),
            task_runs: Arc::new(AtomicUsize::new(0)),
            task_failures: Arc::new(AtomicUsize::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn record_upload(&self, bytes: u64) {
        self.uploads.fetch_add(1, Ordering::Relaxed);
        self.bytes_uploaded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_files_deleted(&self, count: usize) {
        self.files_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_albums_deleted(&self, count: usize) {
        self.albums_deleted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn inc_transforms(&self) {
        self.transforms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_archives_built(&self) {
        self.archives_built.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_task_runs(&self) {
        self.task_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_task_failures(&self) {
        self.task_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uploads: self.uploads.load(Ordering::Relaxed),
            bytes_uploaded: self.bytes_uploaded.load(Ordering::Relaxed),
            files_deleted: self.files_deleted.load(Ordering::Relaxed),
            albums_deleted: self.albums_deleted.load(Ordering::Relaxed),
            transforms: self.transforms.load(Ordering::Relaxed),
            archives_built: self.archives_built.load(Ordering::Relaxed),
            task_runs: self.task_runs.load(Ordering::Relaxed),
            task_failures: self.task_failures.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub uploads: usize,
    pub bytes_uploaded: u64,
    pub files_deleted: usize,
    pub albums_deleted: usize,
    pub transforms: usize,
    pub archives_built: usize,
    pub task_runs: usize,
    pub task_failures: usize,
    pub uptime_seconds: u64,
}
