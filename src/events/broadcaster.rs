//! Event broadcaster
//!
//! Fan-out over a bounded tokio broadcast channel. A slow subscriber loses
//! its oldest events instead of blocking the publisher; the loss shows up as
//! a sequence gap and in `EventSubscription::dropped`.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use futures::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use super::event::{Event, EventDraft};

/// Default per-subscriber queue length
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Event>,
    /// Last sequence handed out; also serializes publishers
    sequence: Mutex<u64>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                tx,
                sequence: Mutex::new(0),
            }),
        }
    }

    /// Stamp and deliver an event, returning its sequence number
    pub fn publish(&self, draft: EventDraft) -> u64 {
        let mut sequence = self.inner.sequence.lock().unwrap_or_else(PoisonError::into_inner);
        *sequence += 1;
        let event = Event {
            sequence: *sequence,
            kind: draft.kind,
            payload: draft.payload,
            timestamp: Utc::now(),
        };
        // Err only means nobody is listening
        let delivered = self.inner.tx.send(event).unwrap_or(0);
        tracing::trace!(sequence = *sequence, delivered, "Published event");
        *sequence
    }

    /// New subscription; sees only events published after this call
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.inner.tx.subscribe(),
            dropped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    pub fn last_sequence(&self) -> u64 {
        *self.inner.sequence.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("last_sequence", &self.last_sequence())
            .finish()
    }
}

/// One subscriber's view of the event stream. Dropping it unsubscribes.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<Event>,
    dropped: u64,
}

impl EventSubscription {
    /// Next event in sequence order, skipping past any overflow.
    ///
    /// Returns `None` only once the broadcaster itself is gone.
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already queued
    pub fn try_next(&mut self) -> Option<Event> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    /// Events lost to overflow so far
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn into_stream(self) -> impl Stream<Item = Event> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            subscription.next().await.map(|event| (event, subscription))
        })
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        tracing::warn!(skipped, total_dropped = self.dropped, "Event subscriber lagged, oldest events dropped");
    }
}
