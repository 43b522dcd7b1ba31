// SQLite Maintenance Implementation
use crate::error::map_sqlx_error;
use crate::SqliteJobStore;
use async_trait::async_trait;
use jobq_core::domain::JobState;
use jobq_core::error::Result;
use jobq_core::port::Maintenance;
use tracing::debug;

#[async_trait]
impl Maintenance for SqliteJobStore {
    async fn trim_to_count(&self, state: JobState, keep: i64) -> Result<i64> {
        // LIMIT -1 means "no limit" in SQLite, so OFFSET skips the newest `keep`
        let result = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE id IN (
                SELECT id FROM jobs
                WHERE state = ?
                ORDER BY COALESCE(finished_on, created_at) DESC, id DESC
                LIMIT -1 OFFSET ?
            )
            "#,
        )
        .bind(state.as_str())
        .bind(keep.max(0))
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let deleted = result.rows_affected() as i64;
        debug!(state = %state, keep, deleted, "Trimmed finished jobs");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{create_pool, run_migrations};
    use jobq_core::domain::{Job, JobPayload};
    use jobq_core::port::{JobStore, RetentionPolicy};

    const HOUR_MS: i64 = 60 * 60 * 1000;

    async fn setup_store() -> SqliteJobStore {
        let pool = create_pool("sqlite::memory:", 1).await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqliteJobStore::new(pool)
    }

    async fn insert_finished(store: &SqliteJobStore, id: &str, state: JobState, finished_on: i64) {
        let mut job = Job::new(id, 0, "echo", "u1", JobPayload::empty());
        job.state = state;
        job.finished_on = Some(finished_on);
        store.insert(&job).await.unwrap();
    }

    #[tokio::test]
    async fn test_trim_keeps_newest() {
        let store = setup_store().await;
        for i in 0..5 {
            insert_finished(&store, &format!("f-{}", i), JobState::Failed, 100 + i).await;
        }

        assert_eq!(store.trim_to_count(JobState::Failed, 3).await.unwrap(), 2);
        assert!(store.get(&"f-0".to_string()).await.unwrap().is_none());
        assert!(store.get(&"f-4".to_string()).await.unwrap().is_some());
        assert_eq!(store.trim_to_count(JobState::Failed, 3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retention_leaves_unfinished_jobs() {
        let store = setup_store().await;
        let now = 48 * HOUR_MS;
        insert_finished(&store, "old-done", JobState::Completed, now - 25 * HOUR_MS).await;
        insert_finished(&store, "new-done", JobState::Completed, now - HOUR_MS).await;
        store
            .insert(&Job::new("waiting", 0, "echo", "u1", JobPayload::empty()))
            .await
            .unwrap();

        let report = store
            .apply_retention(&RetentionPolicy::default(), now)
            .await
            .unwrap();
        assert_eq!(report.removed_completed, 1);
        assert_eq!(report.removed_failed, 0);

        let stats = store.count_by_state(None).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.waiting, 1);
    }
}
