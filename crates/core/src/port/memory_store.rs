// In-memory JobStore (tests and the `memory` backend)

use crate::domain::{Job, JobFilter, JobId, JobPage, JobState, QueueStats};
use crate::error::{AppError, Result};
use crate::port::job_store::{JobMutation, JobStore};
use crate::port::maintenance::Maintenance;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Job>,
    paused: bool,
}

/// Process-local store. A single write lock makes every mutation atomic.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
    closed: AtomicBool,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::StoreUnavailable("store is closed".to_string()));
        }
        Ok(())
    }

    /// Newest first, id as tie-break
    fn sort_newest_first(jobs: &mut [Job]) {
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn ping(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        self.ensure_open()?;
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("job {} already exists", job.id)));
        }
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        self.ensure_open()?;
        Ok(self.inner.read().await.jobs.get(id).cloned())
    }

    async fn list_jobs(&self, filter: &JobFilter, offset: i64, limit: i64) -> Result<JobPage> {
        self.ensure_open()?;
        let inner = self.inner.read().await;
        let mut matching: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        Self::sort_newest_first(&mut matching);

        let total = matching.len() as i64;
        let jobs = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok(JobPage { jobs, total })
    }

    async fn count_by_state(&self, owner_id: Option<&str>) -> Result<QueueStats> {
        self.ensure_open()?;
        let inner = self.inner.read().await;
        let mut stats = QueueStats::default();
        for job in inner.jobs.values() {
            if owner_id.map_or(true, |owner| owner == job.owner_id) {
                stats.add(job.state, 1);
            }
        }
        Ok(stats)
    }

    async fn update(&self, id: &JobId, mutation: JobMutation<'_>) -> Result<Job> {
        self.ensure_open()?;
        let mut inner = self.inner.write().await;
        let stored = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;

        // Mutate a copy so a rejected mutation leaves the record untouched
        let mut next = stored.clone();
        mutation(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }

    async fn claim(&self, id: &JobId, expected: JobState, now_millis: i64) -> Result<Job> {
        self.ensure_open()?;
        let mut inner = self.inner.write().await;
        let stored = inner
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;

        if stored.state != expected || !stored.is_eligible(now_millis) {
            return Err(AppError::Conflict(format!(
                "job {} is {}, expected claimable {}",
                id, stored.state, expected
            )));
        }
        if !stored.has_attempts_left() {
            return Err(AppError::Conflict(format!(
                "job {} has no attempts left",
                id
            )));
        }

        stored.claim(now_millis)?;
        Ok(stored.clone())
    }

    async fn next_candidates(&self, now_millis: i64, limit: i64) -> Result<Vec<Job>> {
        self.ensure_open()?;
        let inner = self.inner.read().await;
        let mut eligible: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.is_eligible(now_millis) && job.has_attempts_left())
            .cloned()
            .collect();
        eligible.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        eligible.truncate(limit.max(0) as usize);
        Ok(eligible)
    }

    async fn find_stalled(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
        self.ensure_open()?;
        let inner = self.inner.read().await;
        Ok(inner
            .jobs
            .values()
            .filter(|job| {
                job.state == JobState::Active
                    && job.heartbeat_at.map_or(true, |at| at < cutoff_millis)
            })
            .cloned()
            .collect())
    }

    async fn remove(&self, id: &JobId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.write().await.jobs.remove(id).is_some())
    }

    async fn clean(
        &self,
        state: JobState,
        finished_before: i64,
        limit: i64,
        owner_id: Option<&str>,
    ) -> Result<Vec<JobId>> {
        self.ensure_open()?;
        let mut inner = self.inner.write().await;
        let mut victims: Vec<(i64, JobId)> = inner
            .jobs
            .values()
            .filter(|job| job.state == state)
            .filter(|job| owner_id.map_or(true, |owner| owner == job.owner_id))
            .filter_map(|job| {
                job.finished_on
                    .filter(|finished| *finished < finished_before)
                    .map(|finished| (finished, job.id.clone()))
            })
            .collect();
        victims.sort();
        victims.truncate(limit.max(0) as usize);

        let ids: Vec<JobId> = victims.into_iter().map(|(_, id)| id).collect();
        for id in &ids {
            inner.jobs.remove(id);
        }
        Ok(ids)
    }

    async fn set_paused(&self, paused: bool) -> Result<u64> {
        self.ensure_open()?;
        let mut inner = self.inner.write().await;
        let (from, to) = if paused {
            (JobState::Waiting, JobState::Paused)
        } else {
            (JobState::Paused, JobState::Waiting)
        };

        let mut moved = 0;
        for job in inner.jobs.values_mut().filter(|job| job.state == from) {
            job.state = to;
            moved += 1;
        }
        inner.paused = paused;
        Ok(moved)
    }

    async fn is_paused(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.inner.read().await.paused)
    }
}

#[async_trait]
impl Maintenance for InMemoryJobStore {
    async fn trim_to_count(&self, state: JobState, keep: i64) -> Result<i64> {
        self.ensure_open()?;
        let mut inner = self.inner.write().await;
        let mut finished: Vec<(i64, JobId)> = inner
            .jobs
            .values()
            .filter(|job| job.state == state)
            .map(|job| (job.finished_on.unwrap_or(job.created_at), job.id.clone()))
            .collect();
        // Newest first, everything past `keep` goes
        finished.sort_by(|a, b| b.cmp(a));

        let mut removed = 0;
        for (_, id) in finished.into_iter().skip(keep.max(0) as usize) {
            inner.jobs.remove(&id);
            removed += 1;
        }
        Ok(removed)
    }
}
