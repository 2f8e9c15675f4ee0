//! # Event Bus System
//!
//! Typed progress events for mirror runs, published over a broadcast channel.
//!
//! ## Overview
//!
//! The orchestrator and collection workers emit [`SyncEvent`]s as they move
//! through a cycle. Subscribers (the CLI progress reporter, tests) listen
//! independently; emitting never blocks and never fails the run.
//!
//! ```text
//! ┌──────────────┐     emit      ┌───────────┐    subscribe    ┌────────────┐
//! │ Orchestrator ├──────────────>│ EventBus  ├────────────────>│ Subscriber │
//! └──────────────┘               │ (broadcast│                 └────────────┘
//! ┌──────────────┐     emit      │  channel) │    subscribe    ┌────────────┐
//! │   Workers    ├──────────────>│           ├────────────────>│ Subscriber │
//! └──────────────┘               └───────────┘                 └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::events::{EventBus, SyncEvent};
//!
//! let bus = EventBus::new(100);
//! let mut stream = bus.subscribe();
//!
//! bus.emit(SyncEvent::CycleStarted { cycle: 1, collections: 3 }).ok();
//!
//! while let Ok(event) = stream.recv().await {
//!     println!("{}", event.description());
//! }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber was too slow and missed `n`
//!   events. It can keep receiving.
//! - **`RecvError::Closed`**: all senders are gone; treat as shutdown.

use core_async::sync::broadcast;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use core_async::sync::broadcast::error::{RecvError, SendError};
pub use core_async::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

/// Events emitted while mirroring collections.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum SyncEvent {
    /// A cycle over all selected collections began.
    CycleStarted {
        /// 1-based cycle counter within this process.
        cycle: u64,
        /// Number of collections selected for this cycle.
        collections: usize,
    },
    /// This worker now holds the collection's lease.
    LeaseAcquired { collection: String, owner: String },
    /// Another live worker holds the lease; the collection is skipped.
    LeaseDenied { collection: String },
    /// A page came back from the data endpoint.
    PageFetched {
        collection: String,
        items: usize,
        deleted: usize,
        has_more: bool,
    },
    /// A page was committed to the local store.
    PagePersisted {
        collection: String,
        cursor: Option<String>,
    },
    /// A retryable upstream status was seen and the request will be re-sent.
    RetryScheduled {
        collection: String,
        attempt: u32,
        delay_ms: u64,
        status: u16,
    },
    /// The remaining request quota fell below the threshold.
    QuotaThrottled {
        collection: String,
        remaining: u64,
        limit: u64,
        delay_ms: u64,
    },
    /// The collection reached its last page.
    CollectionCompleted { collection: String, pages: u64 },
    /// The collection stopped with an error. Other collections continue.
    CollectionFailed {
        collection: String,
        message: String,
    },
    /// The lease was handed back.
    LeaseReleased { collection: String },
    /// A cycle finished (some collections may have failed).
    CycleCompleted {
        cycle: u64,
        succeeded: usize,
        skipped: usize,
        failed: usize,
    },
    /// A cycle could not run at all (e.g., schema unavailable).
    CycleFailed { cycle: u64, message: String },
}

impl SyncEvent {
    /// Collection the event refers to, if any.
    pub fn collection(&self) -> Option<&str> {
        match self {
            SyncEvent::LeaseAcquired { collection, .. }
            | SyncEvent::LeaseDenied { collection }
            | SyncEvent::PageFetched { collection, .. }
            | SyncEvent::PagePersisted { collection, .. }
            | SyncEvent::RetryScheduled { collection, .. }
            | SyncEvent::QuotaThrottled { collection, .. }
            | SyncEvent::CollectionCompleted { collection, .. }
            | SyncEvent::CollectionFailed { collection, .. }
            | SyncEvent::LeaseReleased { collection } => Some(collection),
            SyncEvent::CycleStarted { .. }
            | SyncEvent::CycleCompleted { .. }
            | SyncEvent::CycleFailed { .. } => None,
        }
    }

    /// Short human-readable description.
    pub fn description(&self) -> &'static str {
        match self {
            SyncEvent::CycleStarted { .. } => "Cycle started",
            SyncEvent::LeaseAcquired { .. } => "Lease acquired",
            SyncEvent::LeaseDenied { .. } => "Lease held by another worker",
            SyncEvent::PageFetched { .. } => "Page fetched",
            SyncEvent::PagePersisted { .. } => "Page persisted",
            SyncEvent::RetryScheduled { .. } => "Retry scheduled",
            SyncEvent::QuotaThrottled { .. } => "Quota low, throttling",
            SyncEvent::CollectionCompleted { .. } => "Collection completed",
            SyncEvent::CollectionFailed { .. } => "Collection failed",
            SyncEvent::LeaseReleased { .. } => "Lease released",
            SyncEvent::CycleCompleted { .. } => "Cycle completed",
            SyncEvent::CycleFailed { .. } => "Cycle failed",
        }
    }

    /// Whether the event reports a failure.
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SyncEvent::CollectionFailed { .. } | SyncEvent::CycleFailed { .. }
        )
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.collection() {
            Some(collection) => write!(f, "[{}] {}", collection, self.description()),
            None => f.write_str(self.description()),
        }
    }
}

/// Central broadcast channel for [`SyncEvent`]s.
///
/// Cloning the bus is cheap; all clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// A subscriber that falls behind by more than `capacity` events receives
    /// `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Publishers ignore the error with `.ok()`.
    pub fn emit(&self, event: SyncEvent) -> Result<usize, SendError<SyncEvent>> {
        self.sender.send(event)
    }

    /// Creates a new subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetched(collection: &str) -> SyncEvent {
        SyncEvent::PageFetched {
            collection: collection.to_string(),
            items: 2,
            deleted: 0,
            has_more: true,
        }
    }

    #[core_async::test]
    async fn test_event_bus_creation() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);

        let _sub1 = bus.subscribe();
        let _sub2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[core_async::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::default();
        assert!(bus.emit(fetched("widgets")).is_err());
    }

    #[core_async::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = SyncEvent::CycleStarted {
            cycle: 1,
            collections: 3,
        };
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[core_async::test]
    async fn test_cloned_bus_shares_subscribers() {
        let bus = EventBus::new(10);
        let mut sub = bus.subscribe();
        let clone = bus.clone();

        clone.emit(fetched("gadgets")).unwrap();
        assert_eq!(sub.recv().await.unwrap().collection(), Some("gadgets"));
    }

    #[core_async::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut sub = bus.subscribe();

        for _ in 0..5 {
            bus.emit(fetched("widgets")).unwrap();
        }

        assert!(matches!(sub.recv().await, Err(RecvError::Lagged(_))));
        assert!(sub.recv().await.is_ok());
    }

    #[test]
    fn test_event_serialization() {
        let event = SyncEvent::LeaseDenied {
            collection: "widgets".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event"], "LeaseDenied");
        assert_eq!(json["collection"], "widgets");

        let back: SyncEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_display_includes_collection() {
        assert_eq!(fetched("widgets").to_string(), "[widgets] Page fetched");
        let cycle = SyncEvent::CycleFailed {
            cycle: 2,
            message: "schema".to_string(),
        };
        assert_eq!(cycle.to_string(), "Cycle failed");
    }
}
