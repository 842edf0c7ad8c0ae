#![forbid(unsafe_code)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Core event bus for ferry workers.
//!
//! The bus provides a typed event enum, sequential identifiers, and support for
//! replaying recent events when subscribers reconnect late (e.g. a status
//! reporter that restarts and resumes from its last acknowledged id). Internally
//! it uses `tokio::broadcast` with a bounded buffer; when the channel overflows,
//! the oldest events are dropped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

/// Identifier assigned to each event emitted by a worker.
pub type EventId = u64;

/// Default buffer size for the in-memory replay ring.
const DEFAULT_REPLAY_CAPACITY: usize = 1_024;

/// Typed domain events surfaced by workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Work on an expectation was accepted and scheduled.
    WorkStarted {
        /// Identifier of the work-in-progress handle.
        work_id: Uuid,
        /// Expectation being worked on.
        expectation_id: String,
        /// Expectation type discriminator.
        expectation_type: String,
    },
    /// Intermediate progress for running work, in the range `0.0..=1.0`.
    WorkProgress {
        /// Identifier of the work-in-progress handle.
        work_id: Uuid,
        /// Expectation being worked on.
        expectation_id: String,
        /// Fraction of work done.
        progress: f64,
    },
    /// Work finished successfully.
    WorkCompleted {
        /// Identifier of the work-in-progress handle.
        work_id: Uuid,
        /// Expectation that was worked on.
        expectation_id: String,
        /// Human readable summary.
        reason: String,
        /// Wall-clock duration of the work.
        duration_ms: u64,
    },
    /// Work failed during execution.
    WorkFailed {
        /// Identifier of the work-in-progress handle.
        work_id: Uuid,
        /// Expectation that was worked on.
        expectation_id: String,
        /// User-facing failure text.
        reason: String,
    },
    /// Work was cancelled by the caller.
    WorkCancelled {
        /// Identifier of the work-in-progress handle.
        work_id: Uuid,
        /// Expectation that was worked on.
        expectation_id: String,
    },
    /// A fulfilled expectation triggered eager re-evaluation of others.
    ExpectationTriggered {
        /// Expectation that became fulfilled.
        fulfilled_id: String,
        /// Expectations that listed it in `triggerByFullfilledIds`.
        triggered_ids: Vec<String>,
    },
    /// A package container monitor observed a change.
    PackageContainerChanged {
        /// Container whose contents changed.
        container_id: String,
        /// Monitor that observed the change.
        monitor_id: String,
        /// Paths relative to the container root.
        paths: Vec<String>,
    },
    /// A network share was mapped onto a drive letter.
    DriveMapped {
        /// Drive letter used for the mapping.
        letter: char,
        /// Remote path that was mounted.
        remote: String,
    },
    /// Set of degraded components changed.
    HealthChanged {
        /// Components currently degraded.
        degraded: Vec<String>,
    },
}

impl Event {
    /// Machine-friendly discriminator for consumers and metrics labels.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::WorkStarted { .. } => "work_started",
            Self::WorkProgress { .. } => "work_progress",
            Self::WorkCompleted { .. } => "work_completed",
            Self::WorkFailed { .. } => "work_failed",
            Self::WorkCancelled { .. } => "work_cancelled",
            Self::ExpectationTriggered { .. } => "expectation_triggered",
            Self::PackageContainerChanged { .. } => "package_container_changed",
            Self::DriveMapped { .. } => "drive_mapped",
            Self::HealthChanged { .. } => "health_changed",
        }
    }
}

/// Metadata wrapper around events. Each envelope tracks the event id and
/// emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    buffer: Arc<Mutex<VecDeque<EventEnvelope>>>,
    next_id: Arc<AtomicU64>,
    replay_capacity: usize,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("last_event_id", &self.last_event_id())
            .field("replay_capacity", &self.replay_capacity)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Construct a new bus with the provided broadcast capacity.
    ///
    /// The broadcast channel uses the same capacity as the in-memory replay
    /// buffer, so dropped events impact both structures consistently. A zero
    /// capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            next_id: Arc::new(AtomicU64::new(1)),
            replay_capacity: capacity,
        }
    }

    /// Construct a bus with the default in-memory buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_REPLAY_CAPACITY)
    }

    /// Publish a new event to the bus, assigning it a sequential identifier.
    ///
    /// Publishing never fails; events sent while nobody is subscribed are still
    /// kept in the replay buffer.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let envelope = EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        };

        {
            let mut buffer = self.lock_buffer();
            if buffer.len() == self.replay_capacity {
                buffer.pop_front();
            }
            buffer.push_back(envelope.clone());
        }

        let _ = self.sender.send(envelope);
        id
    }

    /// Subscribe to the bus, replaying any buffered events newer than `since_id`.
    #[must_use]
    pub fn subscribe(&self, since_id: Option<EventId>) -> EventStream {
        let mut backlog = VecDeque::new();
        if let Some(since) = since_id {
            let buffer = self.lock_buffer();
            backlog.extend(buffer.iter().filter(|item| item.id > since).cloned());
        }

        let receiver = self.sender.subscribe();
        EventStream { backlog, receiver }
    }

    /// Returns the last assigned identifier, if any events have been published.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.lock_buffer().back().map(|event| event.id)
    }

    fn lock_buffer(&self) -> MutexGuard<'_, VecDeque<EventEnvelope>> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream wrapper that yields events either from the replay backlog or from the
/// live broadcast channel.
pub struct EventStream {
    backlog: VecDeque<EventEnvelope>,
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, respecting the replay backlog first.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        if let Some(event) = self.backlog.pop_front() {
            return Some(event);
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream`, skipping over any lagged gaps.
    pub fn into_stream(self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        let Self { backlog, receiver } = self;
        tokio_stream::iter(backlog)
            .chain(BroadcastStream::new(receiver).filter_map(Result::ok))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;
    use tokio::task;
    use tokio::time::timeout;

    const PUBLISH_TIMEOUT: Duration = Duration::from_secs(1);

    fn sample_progress_event(index: usize) -> Event {
        Event::WorkProgress {
            work_id: Uuid::from_u128(index as u128 + 1),
            expectation_id: format!("exp-{index}"),
            progress: 0.5,
        }
    }

    #[test]
    fn debug_output_shows_position_not_payloads() {
        let bus = EventBus::with_capacity(4);
        bus.publish(sample_progress_event(0));
        let rendered = format!("{bus:?}");
        assert!(rendered.starts_with("EventBus"));
        assert!(rendered.contains("last_event_id: Some(1)"));
        assert!(!rendered.contains("exp-0"));
    }

    #[tokio::test]
    async fn sequential_ids_and_replay() {
        let bus = EventBus::with_capacity(16);

        let mut last_id = 0;
        for i in 0..5 {
            last_id = bus.publish(sample_progress_event(i));
        }
        assert_eq!(last_id, 5);
        assert_eq!(bus.last_event_id(), Some(5));

        let mut stream = bus.subscribe(Some(2));
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }

        assert_eq!(received, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn replay_buffer_drops_oldest_when_full() {
        let bus = EventBus::with_capacity(2);
        for i in 0..4 {
            let _ = bus.publish(sample_progress_event(i));
        }
        let mut stream = bus.subscribe(Some(0));
        let first = stream.next().await.map(|event| event.id);
        let second = stream.next().await.map(|event| event.id);
        assert_eq!((first, second), (Some(3), Some(4)));
    }

    #[tokio::test]
    async fn into_stream_yields_backlog_then_live_events() -> anyhow::Result<()> {
        let bus = EventBus::with_capacity(8);
        let _ = bus.publish(Event::HealthChanged {
            degraded: vec!["container-a".into()],
        });
        let stream = bus.subscribe(Some(0)).into_stream();
        tokio::pin!(stream);
        let _ = bus.publish(Event::HealthChanged { degraded: vec![] });

        let first = timeout(PUBLISH_TIMEOUT, stream.next()).await?;
        let second = timeout(PUBLISH_TIMEOUT, stream.next()).await?;
        assert_eq!(first.map(|event| event.id), Some(1));
        assert_eq!(second.map(|event| event.id), Some(2));
        Ok(())
    }

    #[test]
    fn event_kind_matches_serialized_tag() -> anyhow::Result<()> {
        let event = Event::DriveMapped {
            letter: 'Z',
            remote: r"\\server\share".into(),
        };
        let value = serde_json::to_value(&event)?;
        assert_eq!(value["type"], event.kind());
        Ok(())
    }

    #[tokio::test]
    async fn load_test_does_not_stall_publishers() -> anyhow::Result<()> {
        let bus = Arc::new(EventBus::with_capacity(512));
        let mut stream = bus.subscribe(None);

        let publisher = {
            let bus = bus.clone();
            task::spawn(async move {
                for i in 0..500 {
                    let publish_bus = bus.clone();
                    let published = timeout(PUBLISH_TIMEOUT, async move {
                        let _ = publish_bus.publish(sample_progress_event(i));
                    })
                    .await;
                    assert!(published.is_ok(), "publish timed out");
                }
            })
        };

        let consumer = task::spawn(async move {
            let mut ids = HashSet::new();
            while ids.len() < 500 {
                if let Some(event) = stream.next().await {
                    ids.insert(event.id);
                }
            }
            ids
        });

        publisher.await?;
        let ids = consumer.await?;
        assert_eq!(ids.len(), 500);
        Ok(())
    }
}
