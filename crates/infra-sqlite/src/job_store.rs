// SQLite JobStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use jobq_core::domain::{
    Job, JobFilter, JobId, JobMetadata, JobPage, JobPayload, JobState, QueueStats,
};
use jobq_core::error::{AppError, Result};
use jobq_core::port::{JobMutation, JobStore};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, info};

/// Optimistic write attempts before `update` gives up with Conflict
const MAX_UPDATE_RETRIES: usize = 8;

const PAUSED_KEY: &str = "paused";

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool and bring the schema up to date
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = crate::create_pool(database_url, max_connections).await?;
        crate::run_migrations(&pool).await?;
        info!(database_url, "SQLite job store ready");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_row(&self, id: &JobId) -> Result<Option<JobRow>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    /// Write every mutable column if nobody else wrote since `version`
    async fn write_if_unchanged(&self, job: &Job, version: i64) -> Result<bool> {
        let row = JobRow::encode_mutable(job)?;
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = ?, progress = ?, result = ?, error_message = ?,
                attempts_made = ?, max_attempts = ?, priority = ?,
                processed_on = ?, finished_on = ?, delay_until = ?,
                metadata = ?, heartbeat_at = ?, stalled_count = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(job.state.as_str())
        .bind(job.progress)
        .bind(row.result)
        .bind(&job.error_message)
        .bind(job.attempts_made)
        .bind(job.max_attempts)
        .bind(job.priority)
        .bind(job.processed_on)
        .bind(job.finished_on)
        .bind(job.delay_until)
        .bind(row.metadata)
        .bind(job.heartbeat_at)
        .bind(job.stalled_count)
        .bind(&job.id)
        .bind(version)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &JobFilter) {
    qb.push(" WHERE 1 = 1");
    if let Some(owner_id) = &filter.owner_id {
        qb.push(" AND owner_id = ").push_bind(owner_id.clone());
    }
    if !filter.states.is_empty() {
        qb.push(" AND state IN (");
        let mut states = qb.separated(", ");
        for state in &filter.states {
            states.push_bind(state.as_str());
        }
        states.push_unseparated(")");
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let row = JobRow::encode_mutable(job)?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, name, owner_id, state, progress,
                payload, result, error_message,
                attempts_made, max_attempts, priority,
                created_at, processed_on, finished_on, delay_until,
                metadata, heartbeat_at, stalled_count, version
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.owner_id)
        .bind(job.state.as_str())
        .bind(job.progress)
        .bind(job.payload.as_value().to_string())
        .bind(row.result)
        .bind(&job.error_message)
        .bind(job.attempts_made)
        .bind(job.max_attempts)
        .bind(job.priority)
        .bind(job.created_at)
        .bind(job.processed_on)
        .bind(job.finished_on)
        .bind(job.delay_until)
        .bind(row.metadata)
        .bind(job.heartbeat_at)
        .bind(job.stalled_count)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<Job>> {
        self.fetch_row(id).await?.map(JobRow::into_job).transpose()
    }

    async fn list_jobs(&self, filter: &JobFilter, offset: i64, limit: i64) -> Result<JobPage> {
        let mut count = QueryBuilder::<Sqlite>::new("SELECT COUNT(*) FROM jobs");
        push_filter(&mut count, filter);
        let total: i64 = count
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut select = QueryBuilder::<Sqlite>::new("SELECT * FROM jobs");
        push_filter(&mut select, filter);
        select
            .push(" ORDER BY created_at DESC, id DESC LIMIT ")
            .push_bind(limit.max(0))
            .push(" OFFSET ")
            .push_bind(offset.max(0));

        let rows: Vec<JobRow> = select
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let jobs = rows
            .into_iter()
            .map(JobRow::into_job)
            .collect::<Result<Vec<_>>>()?;

        Ok(JobPage { jobs, total })
    }

    async fn count_by_state(&self, owner_id: Option<&str>) -> Result<QueueStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT state, COUNT(*) FROM jobs
            WHERE (? IS NULL OR owner_id = ?)
            GROUP BY state
            "#,
        )
        .bind(owner_id)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let mut stats = QueueStats::default();
        for (state, count) in rows {
            stats.add(parse_state(&state)?, count);
        }
        Ok(stats)
    }

    async fn update(&self, id: &JobId, mutation: JobMutation<'_>) -> Result<Job> {
        for attempt in 1..=MAX_UPDATE_RETRIES {
            let row = self
                .fetch_row(id)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("job {}", id)))?;
            let version = row.version;
            let mut job = row.into_job()?;

            mutation(&mut job)?;

            if self.write_if_unchanged(&job, version).await? {
                return Ok(job);
            }
            debug!(job_id = %id, attempt, "Concurrent write detected, retrying update");
        }

        Err(AppError::Conflict(format!(
            "job {} kept changing under concurrent writers",
            id
        )))
    }

    async fn claim(&self, id: &JobId, expected: JobState, now_millis: i64) -> Result<Job> {
        let claimed = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET state = 'active',
                attempts_made = attempts_made + 1,
                progress = 0,
                processed_on = COALESCE(processed_on, ?),
                heartbeat_at = ?,
                delay_until = NULL,
                finished_on = NULL,
                version = version + 1
            WHERE id = ?
              AND state = ?
              AND state IN ('waiting', 'delayed')
              AND attempts_made < max_attempts
              AND (state = 'waiting' OR delay_until IS NULL OR delay_until <= ?)
            RETURNING *
            "#,
        )
        .bind(now_millis)
        .bind(now_millis)
        .bind(id)
        .bind(expected.as_str())
        .bind(now_millis)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match claimed {
            Some(row) => row.into_job(),
            None => match self.fetch_row(id).await? {
                None => Err(AppError::NotFound(format!("job {}", id))),
                Some(row) => Err(AppError::Conflict(format!(
                    "job {} is {}, expected claimable {}",
                    id, row.state, expected
                ))),
            },
        }
    }

    async fn next_candidates(&self, now_millis: i64, limit: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE (state = 'waiting'
                   OR (state = 'delayed' AND (delay_until IS NULL OR delay_until <= ?)))
              AND attempts_made < max_attempts
            ORDER BY priority ASC, created_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(now_millis)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn find_stalled(&self, cutoff_millis: i64) -> Result<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(
            r#"
            SELECT * FROM jobs
            WHERE state = 'active'
              AND (heartbeat_at IS NULL OR heartbeat_at < ?)
            ORDER BY heartbeat_at ASC
            "#,
        )
        .bind(cutoff_millis)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn remove(&self, id: &JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn clean(
        &self,
        state: JobState,
        finished_before: i64,
        limit: i64,
        owner_id: Option<&str>,
    ) -> Result<Vec<JobId>> {
        sqlx::query_scalar::<_, JobId>(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE state = ?
                  AND finished_on IS NOT NULL
                  AND finished_on < ?
                  AND (? IS NULL OR owner_id = ?)
                ORDER BY finished_on ASC, id ASC
                LIMIT ?
            )
            RETURNING id
            "#,
        )
        .bind(state.as_str())
        .bind(finished_before)
        .bind(owner_id)
        .bind(owner_id)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    async fn set_paused(&self, paused: bool) -> Result<u64> {
        let (from, to) = if paused {
            (JobState::Waiting, JobState::Paused)
        } else {
            (JobState::Paused, JobState::Waiting)
        };

        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let moved = sqlx::query(
            "UPDATE jobs SET state = ?, version = version + 1 WHERE state = ?",
        )
        .bind(to.as_str())
        .bind(from.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?
        .rows_affected();

        sqlx::query("INSERT OR REPLACE INTO queue_meta (key, value) VALUES (?, ?)")
            .bind(PAUSED_KEY)
            .bind(if paused { "1" } else { "0" })
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(moved)
    }

    async fn is_paused(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM queue_meta WHERE key = ?")
                .bind(PAUSED_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(value.as_deref() == Some("1"))
    }
}

fn parse_state(raw: &str) -> Result<JobState> {
    raw.parse::<JobState>()
        .map_err(|_| AppError::Database(format!("corrupt job state in store: {}", raw)))
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JobRow {
    id: String,
    name: String,
    owner_id: String,
    state: String,
    progress: i32,
    payload: String,
    result: Option<String>,
    error_message: Option<String>,
    attempts_made: i32,
    max_attempts: i32,
    priority: i32,
    created_at: i64,
    processed_on: Option<i64>,
    finished_on: Option<i64>,
    delay_until: Option<i64>,
    metadata: Option<String>,
    heartbeat_at: Option<i64>,
    stalled_count: i32,
    version: i64,
}

/// JSON-encoded columns of a job that may change after insert
struct EncodedColumns {
    result: Option<String>,
    metadata: Option<String>,
}

impl JobRow {
    fn encode_mutable(job: &Job) -> Result<EncodedColumns> {
        Ok(EncodedColumns {
            result: job.result.as_ref().map(serde_json::to_string).transpose()?,
            metadata: job.metadata.as_ref().map(serde_json::to_string).transpose()?,
        })
    }

    fn into_job(self) -> Result<Job> {
        let payload: serde_json::Value = serde_json::from_str(&self.payload)?;
        let result = self
            .result
            .as_deref()
            .map(serde_json::from_str::<serde_json::Value>)
            .transpose()?;
        let metadata = self
            .metadata
            .as_deref()
            .map(serde_json::from_str::<JobMetadata>)
            .transpose()?;

        Ok(Job {
            state: parse_state(&self.state)?,
            id: self.id,
            name: self.name,
            payload: JobPayload::new(payload),
            owner_id: self.owner_id,
            progress: self.progress,
            attempts_made: self.attempts_made,
            max_attempts: self.max_attempts,
            priority: self.priority,
            result,
            error_message: self.error_message,
            created_at: self.created_at,
            processed_on: self.processed_on,
            finished_on: self.finished_on,
            delay_until: self.delay_until,
            metadata,
            heartbeat_at: self.heartbeat_at,
            stalled_count: self.stalled_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use serde_json::json;

    async fn setup_store() -> SqliteJobStore {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    fn job(id: &str, created_at: i64, owner: &str) -> Job {
        Job::new(
            id,
            created_at,
            "echo",
            owner,
            JobPayload::new(json!({"msg": "hi"})),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get_round_trip() {
        let store = setup_store().await;
        let mut original = job("a", 1_000, "u1");
        original.metadata = Some(JobMetadata {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: None,
        });
        store.insert(&original).await.unwrap();

        let found = store.get(&"a".to_string()).await.unwrap().unwrap();
        assert_eq!(found, original);
        assert!(store.get(&"missing".to_string()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_conflict() {
        let store = setup_store().await;
        store.insert(&job("a", 1, "u1")).await.unwrap();

        let err = store.insert(&job("a", 2, "u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_claim_compare_and_swap() {
        let store = setup_store().await;
        store.insert(&job("a", 1, "u1")).await.unwrap();
        let id = "a".to_string();

        let claimed = store.claim(&id, JobState::Waiting, 50).await.unwrap();
        assert_eq!(claimed.state, JobState::Active);
        assert_eq!(claimed.attempts_made, 1);
        assert_eq!(claimed.processed_on, Some(50));
        assert_eq!(claimed.heartbeat_at, Some(50));

        let again = store.claim(&id, JobState::Waiting, 51).await.unwrap_err();
        assert!(matches!(again, AppError::Conflict(_)));

        let ghost = store
            .claim(&"ghost".to_string(), JobState::Waiting, 51)
            .await
            .unwrap_err();
        assert!(matches!(ghost, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delayed_job_claimable_only_when_due() {
        let store = setup_store().await;
        let mut delayed = job("d", 1, "u1");
        delayed.state = JobState::Delayed;
        delayed.delay_until = Some(1_000);
        store.insert(&delayed).await.unwrap();

        assert!(store.next_candidates(999, 10).await.unwrap().is_empty());
        assert!(store.claim(&delayed.id, JobState::Delayed, 999).await.is_err());

        assert_eq!(store.next_candidates(1_000, 10).await.unwrap().len(), 1);
        let claimed = store
            .claim(&delayed.id, JobState::Delayed, 1_000)
            .await
            .unwrap();
        assert!(claimed.delay_until.is_none());
    }

    #[tokio::test]
    async fn test_next_candidates_order() {
        let store = setup_store().await;
        let mut low = job("low", 1, "u1");
        low.priority = 5;
        let mut urgent_new = job("urgent-new", 3, "u1");
        urgent_new.priority = 0;
        let mut urgent_old = job("urgent-old", 2, "u1");
        urgent_old.priority = 0;
        let mut spent = job("spent", 0, "u1");
        spent.attempts_made = spent.max_attempts;

        for j in [&low, &urgent_new, &urgent_old, &spent] {
            store.insert(j).await.unwrap();
        }

        let ids: Vec<String> = store
            .next_candidates(10, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.id)
            .collect();
        assert_eq!(ids, vec!["urgent-old", "urgent-new", "low"]);
    }

    #[tokio::test]
    async fn test_update_applies_mutation_and_rejects() {
        let store = setup_store().await;
        store.insert(&job("a", 1, "u1")).await.unwrap();
        let id = "a".to_string();
        store.claim(&id, JobState::Waiting, 5).await.unwrap();

        let done = store
            .update(&id, &|j: &mut Job| {
                j.complete(json!({"echo": "hi"}), 9)?;
                Ok(())
            })
            .await
            .unwrap();
        assert_eq!(done.state, JobState::Completed);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.result, Some(json!({"echo": "hi"})));
        assert_eq!(stored.finished_on, Some(9));

        // Illegal transition leaves the row untouched
        let err = store
            .update(&id, &|j: &mut Job| {
                j.promote()?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));

        let missing = store
            .update(&"nope".to_string(), &|_j: &mut Job| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(missing, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_and_count_filters() {
        let store = setup_store().await;
        for i in 0..5 {
            store.insert(&job(&format!("u1-{}", i), i, "u1")).await.unwrap();
        }
        let mut failed = job("u2-0", 10, "u2");
        failed.state = JobState::Failed;
        failed.finished_on = Some(11);
        store.insert(&failed).await.unwrap();

        let page = store
            .list_jobs(&JobFilter::owner("u1"), 1, 2)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<&str> = page.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["u1-3", "u1-2"]);

        let failed_only = store
            .list_jobs(
                &JobFilter::default().with_states([JobState::Failed, JobState::Completed]),
                0,
                10,
            )
            .await
            .unwrap();
        assert_eq!(failed_only.total, 1);

        let all = store.count_by_state(None).await.unwrap();
        assert_eq!(all.waiting, 5);
        assert_eq!(all.failed, 1);
        assert_eq!(all.total, 6);
        assert_eq!(store.count_by_state(Some("u2")).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_remove_and_clean() {
        let store = setup_store().await;
        for i in 0..3 {
            let mut done = job(&format!("done-{}", i), i, "u1");
            done.state = JobState::Completed;
            done.finished_on = Some(100 + i);
            store.insert(&done).await.unwrap();
        }

        let mut removed = store
            .clean(JobState::Completed, 102, 10, None)
            .await
            .unwrap();
        removed.sort();
        assert_eq!(removed, vec!["done-0".to_string(), "done-1".to_string()]);

        assert!(store.remove(&"done-2".to_string()).await.unwrap());
        assert!(!store.remove(&"done-2".to_string()).await.unwrap());
    }

    #[tokio::test]
    async fn test_pause_flag_persists_with_move() {
        let store = setup_store().await;
        store.insert(&job("a", 1, "u1")).await.unwrap();

        assert_eq!(store.set_paused(true).await.unwrap(), 1);
        assert!(store.is_paused().await.unwrap());
        assert_eq!(store.count_by_state(None).await.unwrap().paused, 1);
        assert!(store.next_candidates(10, 10).await.unwrap().is_empty());

        assert_eq!(store.set_paused(false).await.unwrap(), 1);
        assert!(!store.is_paused().await.unwrap());
    }

    #[tokio::test]
    async fn test_find_stalled() {
        let store = setup_store().await;
        store.insert(&job("old", 1, "u1")).await.unwrap();
        store.insert(&job("fresh", 2, "u1")).await.unwrap();
        store.claim(&"old".to_string(), JobState::Waiting, 100).await.unwrap();
        store.claim(&"fresh".to_string(), JobState::Waiting, 900).await.unwrap();

        let stalled = store.find_stalled(500).await.unwrap();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, "old");
    }

    #[tokio::test]
    async fn test_closed_store_is_unavailable() {
        let store = setup_store().await;
        store.close().await;
        assert!(store.ping().await.unwrap_err().is_store_unavailable());
    }
}
