//! Channel Sinks
//!
//! Bounded per-subscriber queues. Each downstream consumer owns one
//! `ChannelSink`; the subscription registry only holds a weak reference.
//!
//! Offers never wait: when the queue is full the newest event is dropped
//! and the subscriber sees a gap.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::domain::streaming::FeedEvent;
use crate::domain::subscription::{Delivery, RecordSink, SinkId, new_sink_id};

/// `RecordSink` backed by a bounded `mpsc` channel.
#[derive(Debug)]
pub struct ChannelSink {
    id: SinkId,
    tx: mpsc::Sender<FeedEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its consumer reads from.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<FeedEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: new_sink_id(),
                tx,
            },
            rx,
        )
    }

    /// Whether the consumer has dropped its receiver.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl RecordSink for ChannelSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn offer(&self, event: FeedEvent) -> Delivery {
        match self.tx.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}
