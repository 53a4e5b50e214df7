//! Fan-out channel of message mutations, addressed by conversation
//!
//! Writers call [`EventBus::publish`]; every open conversation holds a
//! [`Subscription`]. Each subscriber owns an unbounded queue, so a slow
//! reader never stalls a writer and never loses events. Publishing happens
//! under one lock, so all subscribers observe the same global order.

use futures::Stream;
use inline_store::{Message, MessageKey, Peer};
use parking_lot::Mutex;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// A mutation that affected one conversation
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    Add { messages: Vec<Message>, peer: Peer },
    Update { message: Message, peer: Peer },
    Delete { ids: Vec<MessageKey>, peer: Peer },
    /// Arbitrary upstream changes, listeners must re-query
    Reload { peer: Peer },
}

impl MessageEvent {
    pub fn peer(&self) -> Peer {
        match self {
            MessageEvent::Add { peer, .. }
            | MessageEvent::Update { peer, .. }
            | MessageEvent::Delete { peer, .. }
            | MessageEvent::Reload { peer } => *peer,
        }
    }

    pub fn is_reload(&self) -> bool {
        matches!(self, MessageEvent::Reload { .. })
    }
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<(u64, mpsc::UnboundedSender<MessageEvent>)>,
}

/// Shared handle to the event bus. Clones publish to the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every live subscriber. Never blocks on readers and
    /// never fails; closed subscriptions are dropped along the way.
    /// Returns the number of subscribers the event was queued for.
    pub fn publish(&self, event: MessageEvent) -> usize {
        let mut inner = self.inner.lock();

        inner
            .subscribers
            .retain(|(_, sender)| sender.send(event.clone()).is_ok());

        let delivered = inner.subscribers.len();
        trace!("Published {:?} to {} subscribers", event, delivered);
        delivered
    }

    /// Start receiving every event published from now on
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, sender));
        debug!("Event bus subscriber {} added", id);

        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }
}

/// Ordered stream of events for one subscriber. Unsubscribes on drop.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<MessageEvent>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is gone or the
    /// subscription was cancelled.
    pub async fn recv(&mut self) -> Option<MessageEvent> {
        self.receiver.recv().await
    }

    /// Next already-queued event, if any
    pub fn try_recv(&mut self) -> Option<MessageEvent> {
        self.receiver.try_recv().ok()
    }

    /// Everything queued right now, in publish order
    pub fn drain(&mut self) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn cancel(self) {
        drop(self);
    }

    fn detach(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().subscribers.retain(|(id, _)| *id != self.id);
            debug!("Event bus subscriber {} removed", self.id);
        }
        self.receiver.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl Stream for Subscription {
    type Item = MessageEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
