#![expect(
    clippy::module_name_repetitions,
    reason = "Registry types deliberately include the module name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_stream::stream;
use dashmap::{DashMap, DashSet};
use futures::Stream;
use tokio::sync::mpsc;

use crate::Result;
use crate::error::Error;
use crate::types::{ConsumerId, OutboundMessage};

/// Delivers a single message to a single consumer.
///
/// Implementations must not block: a consumer that cannot take the message
/// right now is reported as unreachable and will be deregistered.
pub trait MessageSink: Send + Sync + 'static {
    fn deliver(&self, consumer: ConsumerId, message: &OutboundMessage) -> Result<()>;
}

/// Outcome of a [`SubscriberRegistry::broadcast`].
#[non_exhaustive]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of consumers the message reached
    pub delivered: usize,
    /// Consumers that failed delivery and were removed
    pub removed: Vec<ConsumerId>,
}

/// Set of consumers interested in engine output.
///
/// Membership is mutated from subscribe/unsubscribe requests, consumer teardown
/// and failed deliveries. Broadcasting iterates a snapshot, so concurrent
/// mutation never observes a half-updated set and never deadlocks.
pub struct SubscriberRegistry {
    members: DashSet<ConsumerId>,
    sink: Arc<dyn MessageSink>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>) -> Self {
        Self {
            members: DashSet::new(),
            sink,
        }
    }

    /// Register a consumer. Returns `false` if it was already registered.
    pub fn add(&self, consumer: ConsumerId) -> bool {
        let inserted = self.members.insert(consumer);
        #[cfg(feature = "tracing")]
        tracing::debug!(%consumer, inserted, total = self.members.len(), "Consumer subscribed");
        inserted
    }

    /// Deregister a consumer. Returns `false` if it was not registered.
    pub fn remove(&self, consumer: ConsumerId) -> bool {
        let removed = self.members.remove(&consumer).is_some();
        #[cfg(feature = "tracing")]
        tracing::debug!(%consumer, removed, total = self.members.len(), "Consumer unsubscribed");
        removed
    }

    #[must_use]
    pub fn contains(&self, consumer: ConsumerId) -> bool {
        self.members.contains(&consumer)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current members, in no particular order.
    #[must_use]
    pub fn members(&self) -> Vec<ConsumerId> {
        self.members.iter().map(|entry| *entry.key()).collect()
    }

    /// Deliver `message` to every member independently.
    ///
    /// A failed delivery never aborts the others and never surfaces to the
    /// caller: the failing member is removed once every delivery was attempted.
    pub fn broadcast(&self, message: &OutboundMessage) -> BroadcastReport {
        // Snapshot first: no shard lock is held while the sink runs
        let snapshot = self.members();

        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        for consumer in snapshot {
            match self.sink.deliver(consumer, message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(%consumer, error = %e, "Delivery failed, removing consumer");
                    #[cfg(not(feature = "tracing"))]
                    let _: &Error = &e;
                    failed.push(consumer);
                }
            }
        }

        for consumer in failed {
            if self.members.remove(&consumer).is_some() {
                report.removed.push(consumer);
            }
        }

        #[cfg(feature = "tracing")]
        tracing::trace!(
            ?message,
            delivered = report.delivered,
            removed = report.removed.len(),
            "Broadcast complete"
        );

        report
    }
}

/// In-process [`MessageSink`] with one unbounded channel per consumer.
///
/// [`ConsumerChannels::open`] allocates a fresh [`ConsumerId`] together with
/// the receiving half; dropping that receiver makes the consumer unreachable,
/// and the first failed delivery forgets it.
#[derive(Debug, Default)]
pub struct ConsumerChannels {
    senders: DashMap<ConsumerId, mpsc::UnboundedSender<OutboundMessage>>,
    next_id: AtomicU64,
}

impl ConsumerChannels {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a consumer and return its identity and inbox.
    pub fn open(&self) -> (ConsumerId, mpsc::UnboundedReceiver<OutboundMessage>) {
        let id = ConsumerId::new(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.insert(id, tx);
        (id, rx)
    }

    /// Like [`ConsumerChannels::open`], exposing the inbox as a [`Stream`].
    pub fn open_stream(&self) -> (ConsumerId, impl Stream<Item = OutboundMessage> + use<>) {
        let (id, mut rx) = self.open();
        let messages = stream! {
            while let Some(message) = rx.recv().await {
                yield message;
            }
        };
        (id, messages)
    }

    /// Forget a consumer. Later deliveries to it fail.
    pub fn close(&self, consumer: ConsumerId) {
        self.senders.remove(&consumer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

impl MessageSink for ConsumerChannels {
    fn deliver(&self, consumer: ConsumerId, message: &OutboundMessage) -> Result<()> {
        let delivered = match self.senders.get(&consumer) {
            Some(sender) => sender.send(message.clone()).is_ok(),
            None => return Err(Error::unreachable(consumer)),
        };

        if !delivered {
            // Receiver dropped: the sender is dead for good
            self.senders.remove(&consumer);
            return Err(Error::unreachable(consumer));
        }
        Ok(())
    }
}
