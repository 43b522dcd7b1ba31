//! Shared fixtures: every scenario runs against both store backends.

#![allow(dead_code)]

use jobq_core::application::{
    BackoffPolicy, EventBus, HandlerRegistry, QueueService, StallConfig, StalledJobSweeper,
    Worker, WorkerConfig,
};
use jobq_core::port::id_provider::mocks::SequentialIdProvider;
use jobq_core::port::time_provider::mocks::ManualClock;
use jobq_core::port::{InMemoryJobStore, JobStore, Maintenance};
use jobq_infra_sqlite::SqliteJobStore;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const START_MILLIS: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

pub struct Harness {
    pub backend: Backend,
    pub store: Arc<dyn JobStore>,
    pub maintenance: Arc<dyn Maintenance>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub queue: QueueService,
}

impl Harness {
    pub async fn new(backend: Backend) -> Self {
        match backend {
            Backend::Memory => Self::with_store(backend, Arc::new(InMemoryJobStore::new())),
            Backend::Sqlite => {
                let store = SqliteJobStore::connect("sqlite::memory:", 1).await.unwrap();
                Self::with_store(backend, Arc::new(store))
            }
        }
    }

    pub fn with_store<S>(backend: Backend, store: Arc<S>) -> Self
    where
        S: JobStore + Maintenance + 'static,
    {
        let clock = Arc::new(ManualClock::new(START_MILLIS));
        let events = EventBus::default();
        let queue = QueueService::new(
            store.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            clock.clone(),
            Arc::new(events.clone()),
        );
        Self {
            backend,
            store: store.clone(),
            maintenance: store,
            clock,
            events,
            queue,
        }
    }

    pub fn worker(&self, registry: HandlerRegistry) -> Worker {
        self.worker_with(registry, fast_worker_config())
    }

    pub fn worker_with(&self, registry: HandlerRegistry, config: WorkerConfig) -> Worker {
        Worker::new(
            self.store.clone(),
            Arc::new(registry),
            Arc::new(self.events.clone()),
            self.clock.clone(),
            BackoffPolicy::default(),
            config,
        )
    }

    pub fn sweeper(&self, config: StallConfig) -> StalledJobSweeper {
        StalledJobSweeper::new(
            self.store.clone(),
            Arc::new(self.events.clone()),
            self.clock.clone(),
            BackoffPolicy::default(),
            config,
        )
    }
}

/// Short real-time knobs so tests never wait on production defaults
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        concurrency: 2,
        poll_interval: Duration::from_millis(5),
        job_timeout: Duration::from_secs(5),
        heartbeat_interval: Duration::from_secs(1),
        drain_timeout: Duration::from_secs(5),
    }
}

/// Fresh SQLite file path under the temp dir
pub fn temp_db_path(tag: &str) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::SeqCst);
    let path = std::env::temp_dir().join(format!(
        "jobq-{}-{}-{}.db",
        tag,
        std::process::id(),
        n
    ));
    remove_db(&path);
    path
}

pub fn sqlite_url(path: &std::path::Path) -> String {
    format!("sqlite://{}", path.display())
}

pub fn remove_db(path: &std::path::Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(file));
    }
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
