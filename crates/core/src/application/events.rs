// Event Bus - in-process fan-out of job events

use crate::domain::{JobEvent, JobId, OwnerId};
use crate::port::EventPublisher;
use futures::Stream;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default number of events buffered per subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Which events a subscriber wants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    All,
    Job(JobId),
    Owner(OwnerId),
}

impl EventFilter {
    pub fn matches(&self, event: &JobEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Job(id) => &event.job_id == id,
            EventFilter::Owner(owner) => &event.owner_id == owner,
        }
    }
}

/// Broadcast-backed publisher. Events are a latency optimisation only;
/// a subscriber that falls behind skips what it missed.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<JobEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self, filter: EventFilter) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: JobEvent) {
        trace!(event = %event.description(), "Publishing job event");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

pub struct EventSubscription {
    rx: broadcast::Receiver<JobEvent>,
    filter: EventFilter,
}

impl EventSubscription {
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Next matching event, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<JobEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, filter = ?self.filter, "Event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = JobEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
    }
}
