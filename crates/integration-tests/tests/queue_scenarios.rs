//! Queue lifecycle scenarios
//!
//! Each scenario runs against the in-memory store and SQLite.

mod common;

use common::{Backend, Harness, BACKENDS, START_MILLIS};
use jobq_core::application::queue::{EnqueueRequest, ListJobsRequest};
use jobq_core::application::{EventFilter, HandlerError, HandlerRegistry};
use jobq_core::domain::{JobQueueAction, JobState};
use jobq_core::error::AppError;
use jobq_core::port::TimeProvider;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

fn echo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("echo", |ctx| async move {
            ctx.progress(50).await?;
            Ok(json!({ "echo": ctx.payload().as_value()["msg"] }))
        })
        .unwrap();
    registry
}

fn failing_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register_fn("flaky", |_ctx| async move {
            Err(HandlerError::retryable("downstream unavailable"))
        })
        .unwrap();
    registry
}

/// Happy path: enqueue -> claim -> progress -> completed, with events
#[tokio::test]
async fn test_happy_path() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let mut events = h.events.subscribe(EventFilter::Owner("u1".to_string()));
        let worker = h.worker(echo_registry());

        let job = h
            .queue
            .enqueue(EnqueueRequest::new("echo", "u1", json!({ "msg": "hello" })))
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Waiting);

        assert!(worker.process_next_job().await.unwrap());

        let done = h.queue.get_job(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed, "{:?}", backend);
        assert_eq!(done.progress, 100);
        assert_eq!(done.attempts_made, 1);
        assert_eq!(done.result, Some(json!({ "echo": "hello" })));
        assert_eq!(done.processed_on, Some(START_MILLIS));
        assert_eq!(done.finished_on, Some(START_MILLIS));

        let mut seen = Vec::new();
        for _ in 0..4 {
            let event = events.recv().await.unwrap();
            seen.push((event.from, event.to));
        }
        assert_eq!(
            seen,
            vec![
                (None, Some(JobState::Waiting)),
                (Some(JobState::Waiting), Some(JobState::Active)),
                (Some(JobState::Active), Some(JobState::Active)),
                (Some(JobState::Active), Some(JobState::Completed)),
            ]
        );
    }
}

/// Exhaustion: a job that always fails runs exactly max_attempts times with
/// doubling backoff, then fails for good
#[tokio::test]
async fn test_attempts_exhausted() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let worker = h.worker(failing_registry());

        let job = h
            .queue
            .enqueue(EnqueueRequest::new("flaky", "u1", json!({})).with_max_attempts(3))
            .await
            .unwrap();

        let mut delays = Vec::new();
        for attempt in 1..=3 {
            assert!(worker.process_next_job().await.unwrap(), "attempt {}", attempt);
            let after = h.queue.get_job(&job.id).await.unwrap();
            assert_eq!(after.attempts_made, attempt);

            if attempt < 3 {
                assert_eq!(after.state, JobState::Delayed);
                let delay = after.delay_until.unwrap() - h.clock.now_millis();
                delays.push(delay);

                // Not claimable before the backoff elapses
                h.clock.advance(delay - 1);
                assert!(!worker.process_next_job().await.unwrap());
                h.clock.advance(1);
            } else {
                assert_eq!(after.state, JobState::Failed, "{:?}", backend);
                assert_eq!(after.error_message.as_deref(), Some("downstream unavailable"));
            }
        }

        assert_eq!(delays, vec![2_000, 4_000]);
        assert!(!worker.process_next_job().await.unwrap());
    }
}

/// Retry resets: an exhausted job retried by its owner gets a fresh budget
#[tokio::test]
async fn test_retry_resets_attempts() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let healthy = Arc::new(AtomicBool::new(false));

        let mut registry = HandlerRegistry::new();
        let flag = healthy.clone();
        registry
            .register_fn("sync", move |_ctx| {
                let flag = flag.clone();
                async move {
                    if flag.load(Ordering::SeqCst) {
                        Ok(json!({ "synced": true }))
                    } else {
                        Err(HandlerError::fatal("remote rejected credentials"))
                    }
                }
            })
            .unwrap();
        let worker = h.worker(registry);

        let job = h
            .queue
            .enqueue(EnqueueRequest::new("sync", "u1", json!({})))
            .await
            .unwrap();
        worker.process_next_job().await.unwrap();

        let failed = h.queue.get_job(&job.id).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts_made, 1);

        let resp = h
            .queue
            .perform_action(&job.id, JobQueueAction::Retry, "u1")
            .await
            .unwrap();
        assert!(resp.success);
        let requeued = resp.job.unwrap();
        assert_eq!(requeued.state, JobState::Waiting);
        assert_eq!(requeued.attempts_made, 0);
        assert_eq!(requeued.error_message, None);

        healthy.store(true, Ordering::SeqCst);
        worker.process_next_job().await.unwrap();

        let done = h.queue.get_job(&job.id).await.unwrap();
        assert_eq!(done.state, JobState::Completed, "{:?}", backend);
        assert_eq!(done.attempts_made, 1);
    }
}

/// Ownership: only the owner may act on a job, and a refused action changes nothing
#[tokio::test]
async fn test_ownership_enforced() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let job = h
            .queue
            .enqueue(EnqueueRequest::new("echo", "alice", json!({})).with_delay_ms(60_000))
            .await
            .unwrap();

        for action in [
            JobQueueAction::Promote,
            JobQueueAction::Retry,
            JobQueueAction::Remove,
        ] {
            let err = h
                .queue
                .perform_action(&job.id, action, "mallory")
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Forbidden(_)), "{:?} {:?}", backend, action);
        }
        assert!(matches!(
            h.queue.remove_job(&job.id, "mallory").await,
            Err(AppError::Forbidden(_))
        ));

        let unchanged = h.queue.get_job(&job.id).await.unwrap();
        assert_eq!(unchanged, job);

        // The owner is still bound by the state machine
        let err = h
            .queue
            .perform_action(&job.id, JobQueueAction::Retry, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }
}

/// Pagination: newest first, totals reflect the filter
#[tokio::test]
async fn test_pagination() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        for i in 0..25 {
            h.clock.advance(1);
            h.queue
                .enqueue(EnqueueRequest::new("echo", "u1", json!({ "i": i })))
                .await
                .unwrap();
        }
        for _ in 0..5 {
            h.clock.advance(1);
            h.queue
                .enqueue(EnqueueRequest::new("echo", "u2", json!({})))
                .await
                .unwrap();
        }

        let request = |page| ListJobsRequest {
            owner_id: Some("u1".to_string()),
            page,
            page_size: 10,
            ..Default::default()
        };

        let first = h.queue.list_jobs(request(1)).await.unwrap();
        assert_eq!(first.total, 25, "{:?}", backend);
        assert_eq!(first.jobs.len(), 10);
        assert_eq!(first.jobs[0].payload.as_value()["i"], 24);
        assert!(first
            .jobs
            .windows(2)
            .all(|w| w[0].created_at >= w[1].created_at));

        let last = h.queue.list_jobs(request(3)).await.unwrap();
        assert_eq!(last.jobs.len(), 5);
        assert_eq!(last.jobs[4].payload.as_value()["i"], 0);

        let beyond = h.queue.list_jobs(request(4)).await.unwrap();
        assert!(beyond.jobs.is_empty());
        assert_eq!(beyond.total, 25);

        let everyone = h
            .queue
            .list_jobs(ListJobsRequest::default())
            .await
            .unwrap();
        assert_eq!(everyone.total, 30);

        let stats = h.queue.queue_stats(Some("u2")).await.unwrap();
        assert_eq!(stats.waiting, 5);
        assert_eq!(stats.total, 5);
    }
}

/// Priority: lower value first, FIFO within one priority
#[tokio::test]
async fn test_priority_then_fifo() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut registry = HandlerRegistry::new();
        let seen = order.clone();
        registry
            .register_fn("record", move |ctx| {
                let seen = seen.clone();
                async move {
                    seen.lock().unwrap().push(ctx.payload().as_value()["tag"].clone());
                    Ok(json!(null))
                }
            })
            .unwrap();
        let worker = h.worker(registry);

        for (tag, priority) in [("low-a", 10), ("high", 0), ("low-b", 10), ("mid", 5)] {
            h.clock.advance(1);
            h.queue
                .enqueue(
                    EnqueueRequest::new("record", "u1", json!({ "tag": tag }))
                        .with_priority(priority),
                )
                .await
                .unwrap();
        }

        while worker.process_next_job().await.unwrap() {}

        let order = order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec![json!("high"), json!("mid"), json!("low-a"), json!("low-b")],
            "{:?}",
            backend
        );
    }
}

/// Idempotent remove: the second remove is a successful no-op
#[tokio::test]
async fn test_remove_twice() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let job = h
            .queue
            .enqueue(EnqueueRequest::new("echo", "u1", json!({})))
            .await
            .unwrap();

        let first = h.queue.remove_job(&job.id, "u1").await.unwrap();
        assert!(first.success);
        let second = h.queue.remove_job(&job.id, "u1").await.unwrap();
        assert!(second.success);
        assert_eq!(second.message, "Job already removed");

        assert!(matches!(
            h.queue.get_job(&job.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}

/// Delayed jobs wait for their time unless promoted
#[tokio::test]
async fn test_delay_and_promote() {
    for backend in BACKENDS {
        let h = Harness::new(backend).await;
        let worker = h.worker(echo_registry());

        let job = h
            .queue
            .enqueue(EnqueueRequest::new("echo", "u1", json!({})).with_delay_ms(30_000))
            .await
            .unwrap();
        assert_eq!(job.state, JobState::Delayed);
        assert_eq!(job.delay_until, Some(START_MILLIS + 30_000));
        assert!(!worker.process_next_job().await.unwrap());

        let resp = h
            .queue
            .perform_action(&job.id, JobQueueAction::Promote, "u1")
            .await
            .unwrap();
        assert_eq!(resp.job.unwrap().state, JobState::Waiting);

        // Promoting again is illegal: the job is no longer delayed
        assert!(matches!(
            h.queue
                .perform_action(&job.id, JobQueueAction::Promote, "u1")
                .await,
            Err(AppError::InvalidState(_))
        ));

        assert!(worker.process_next_job().await.unwrap());
        assert_eq!(
            h.queue.get_job(&job.id).await.unwrap().state,
            JobState::Completed,
            "{:?}",
            backend
        );
    }
}

/// Jobs for a name nobody handles fail without retry
#[tokio::test]
async fn test_unknown_handler_fails_fast() {
    for backend in [Backend::Memory, Backend::Sqlite] {
        let h = Harness::new(backend).await;
        let worker = h.worker(echo_registry());

        let job = h
            .queue
            .enqueue(EnqueueRequest::new("resize-image", "u1", json!({})))
            .await
            .unwrap();
        worker.process_next_job().await.unwrap();

        let failed = h.queue.get_job(&job.id).await.unwrap();
        assert_eq!(failed.state, JobState::Failed);
        assert_eq!(failed.attempts_made, 1);
        assert!(failed.error_message.unwrap().contains("no handler"));
    }
}
