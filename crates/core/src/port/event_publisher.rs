// Event Publisher Port (best-effort fan-out of job events)

use crate::domain::JobEvent;

/// Sink for job state-change events.
///
/// Delivery is best effort: publishing never blocks and never fails the
/// operation that produced the event. The job store stays the source of truth.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: JobEvent);
}

/// Publisher that drops every event (no observers configured)
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: JobEvent) {}
}
