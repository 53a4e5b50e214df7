//! Live, paginated window over one conversation
//!
//! A [`ConversationCache`] loads the newest messages of a peer, pages further
//! history in on demand and applies [`MessageEvent`]s from the bus, turning
//! each into at most one [`ChangeSet`] for its observer.
//!
//! Store failures never escape: they are logged with the peer and leave the
//! window as it was.

use crate::change_set::{ChangeSet, ChangeSetObserver, ObserverSlot, ObserverToken};
use crate::config::{batch_size_for, CacheConfig};
use crate::event_bus::{EventBus, MessageEvent, Subscription};
use crate::window::{MessageWindow, UpdateOutcome};
use chrono::{DateTime, Utc};
use inline_store::{DateBound, Message, MessageKey, MessageQuery, MessageRepository, Peer, SortOrder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheState {
    Initializing,
    Ready,
    Closed,
}

/// Which edge of the window to extend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadDirection {
    /// Before `min_date`
    Older,
    /// After `max_date`
    Newer,
}

pub struct ConversationCache<S> {
    peer: Peer,
    store: Arc<S>,
    config: CacheConfig,
    state: CacheState,
    window: MessageWindow,
    at_bottom: bool,
    subscription: Option<Subscription>,
    observer: ObserverSlot,
}

impl<S: MessageRepository> ConversationCache<S> {
    /// Create a cache for `peer` and subscribe it to `bus`. The subscription
    /// starts before the first load, so events published meanwhile are
    /// queued and applied by the next [`process_pending`](Self::process_pending).
    pub fn open(peer: Peer, store: Arc<S>, bus: &EventBus, config: CacheConfig) -> Self {
        let subscription = bus.subscribe();
        info!("Opening conversation cache for {}", peer);

        Self {
            peer,
            store,
            window: MessageWindow::new(config.reversed),
            config,
            state: CacheState::Initializing,
            at_bottom: true,
            subscription: Some(subscription),
            observer: ObserverSlot::default(),
        }
    }

    /// Open and load the initial window in one step
    pub async fn open_ready(peer: Peer, store: Arc<S>, bus: &EventBus, config: CacheConfig) -> Self {
        let mut cache = Self::open(peer, store, bus, config);
        cache.initialize().await;
        cache
    }

    /// Load the newest `initial_limit` messages and become Ready. A failed
    /// query still makes the cache Ready with an empty window.
    pub async fn initialize(&mut self) {
        if self.state == CacheState::Closed {
            return;
        }

        self.load_initial().await;
        self.state = CacheState::Ready;
        debug!(
            "Conversation {} ready with {} messages",
            self.peer,
            self.window.len()
        );
    }

    /// Extend the window by one page. Returns the number of merged rows.
    pub async fn load_batch(&mut self, direction: LoadDirection) -> usize {
        if self.state == CacheState::Closed {
            return 0;
        }

        if self.window.is_empty() {
            let before = self.window.len();
            self.load_initial().await;
            return self.window.len() - before;
        }

        let limit = batch_size_for(self.window.len());
        let query = self.page_query(direction, limit);
        debug!(
            "Loading {:?} batch of {} for {} at {:?}",
            direction, limit, self.peer, query.bound
        );

        let Some(rows) = self.fetch(&query).await else {
            return 0;
        };
        let full_page = rows.len() == limit;

        let prepend = (direction == LoadDirection::Older) != self.window.is_reversed();
        let mut merged = self.window.merge_page(rows, prepend);

        // a full page of rows already held means the cursor date alone covers
        // more than a page; ask again past the rows held at that date
        if merged == 0 && full_page {
            let cursor = match direction {
                LoadDirection::Older => self.window.min_date(),
                LoadDirection::Newer => self.window.max_date(),
            };
            let held = self.window.messages().iter().filter(|m| m.date == cursor).count();
            let query = self.page_query(direction, limit + held);
            debug!(
                "Page of {} stalled at {}, retrying with limit {}",
                self.peer, cursor, query.limit
            );

            let Some(rows) = self.fetch(&query).await else {
                return 0;
            };
            merged = self.window.merge_page(rows, prepend);
        }

        trace!(
            "Merged {} rows into {}, range {} - {}",
            merged,
            self.peer,
            self.window.min_date(),
            self.window.max_date()
        );
        merged
    }

    fn page_query(&self, direction: LoadDirection, limit: usize) -> MessageQuery {
        match direction {
            LoadDirection::Older => MessageQuery {
                peer: self.peer,
                order: SortOrder::Descending,
                bound: DateBound::AtOrBefore(self.window.min_date()),
                limit,
            },
            LoadDirection::Newer => MessageQuery {
                peer: self.peer,
                order: SortOrder::Ascending,
                bound: DateBound::AtOrAfter(self.window.max_date()),
                limit,
            },
        }
    }

    pub async fn load_more_older(&mut self) -> usize {
        self.load_batch(LoadDirection::Older).await
    }

    pub async fn load_more_newer(&mut self) -> usize {
        self.load_batch(LoadDirection::Newer).await
    }

    /// Whether the UI shows the newest message. Picks the reload strategy.
    pub fn set_at_bottom(&mut self, at_bottom: bool) {
        if self.state != CacheState::Closed {
            self.at_bottom = at_bottom;
        }
    }

    /// Register the observer, replacing any previous one
    pub fn observe<O>(&mut self, observer: O) -> ObserverToken
    where
        O: ChangeSetObserver + 'static,
    {
        self.observe_boxed(Box::new(observer))
    }

    pub(crate) fn observe_boxed(&mut self, observer: Box<dyn ChangeSetObserver>) -> ObserverToken {
        self.observer.register(observer)
    }

    /// Apply one event and notify the observer. Events for other peers and
    /// events that change nothing yield `None`.
    pub async fn handle_event(&mut self, event: &MessageEvent) -> Option<ChangeSet> {
        if self.state == CacheState::Closed || event.peer() != self.peer {
            return None;
        }
        trace!("Applying {:?} to {}", event, self.peer);

        let change = match event {
            MessageEvent::Add { messages, .. } => self
                .window
                .insert(messages.clone())
                .map(|(messages, positions)| ChangeSet::Added { messages, positions }),
            MessageEvent::Delete { ids, .. } => self
                .window
                .remove(ids)
                .map(|(ids, positions)| ChangeSet::Deleted { ids, positions }),
            MessageEvent::Update { message, .. } => match self.window.replace(message.clone()) {
                UpdateOutcome::Missing => None,
                UpdateOutcome::InPlace(position) => Some(ChangeSet::Updated {
                    messages: vec![self.window.messages()[position].clone()],
                    positions: vec![position],
                }),
                UpdateOutcome::Moved { from, to } => {
                    debug!("Update moved a message of {} from {} to {}", self.peer, from, to);
                    Some(ChangeSet::Reload)
                }
                UpdateOutcome::Collapsed { position, removed } => {
                    debug!(
                        "Update at {} of {} collapsed {} duplicate entries",
                        position, self.peer, removed
                    );
                    Some(ChangeSet::Reload)
                }
            },
            MessageEvent::Reload { .. } => {
                self.reload().await;
                Some(ChangeSet::Reload)
            }
        };

        if let Some(change) = &change {
            self.observer.notify(change.clone());
        }
        change
    }

    /// Apply a run of events in order. Own-peer events preceding the last
    /// own-peer Reload are skipped since the reload supersedes them.
    /// Returns the number of change-sets emitted.
    pub async fn apply_events(&mut self, events: Vec<MessageEvent>) -> usize {
        let last_reload = events
            .iter()
            .rposition(|e| e.is_reload() && e.peer() == self.peer);

        let mut emitted = 0;
        for (i, event) in events.iter().enumerate() {
            if matches!(last_reload, Some(reload) if i < reload) && event.peer() == self.peer {
                trace!("Skipping {:?}, superseded by reload", event);
                continue;
            }
            if self.handle_event(event).await.is_some() {
                emitted += 1;
            }
        }
        emitted
    }

    /// Apply every event already queued on the subscription
    pub async fn process_pending(&mut self) -> usize {
        let events = self.drain_pending();
        if events.is_empty() {
            return 0;
        }
        self.apply_events(events).await
    }

    /// Wait for the next bus event without applying it. `None` once closed.
    pub async fn next_event(&mut self) -> Option<MessageEvent> {
        match self.subscription.as_mut() {
            Some(subscription) => subscription.recv().await,
            None => None,
        }
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<MessageEvent> {
        self.subscription
            .as_mut()
            .map(Subscription::drain)
            .unwrap_or_default()
    }

    /// Unsubscribe, drop the observer and the window
    pub fn close(&mut self) {
        if self.state == CacheState::Closed {
            return;
        }

        self.state = CacheState::Closed;
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.observer.clear();
        self.window = MessageWindow::new(self.config.reversed);
        info!("Closed conversation cache for {}", self.peer);
    }

    pub fn messages(&self) -> &[Message] {
        self.window.messages()
    }

    pub fn messages_by_key(&self) -> HashMap<MessageKey, Message> {
        self.window.by_key()
    }

    /// Lookup by any key the message answers to
    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        self.window.get(key)
    }

    pub fn min_date(&self) -> DateTime<Utc> {
        self.window.min_date()
    }

    pub fn max_date(&self) -> DateTime<Utc> {
        self.window.max_date()
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    pub fn is_reversed(&self) -> bool {
        self.window.is_reversed()
    }

    pub fn is_at_bottom(&self) -> bool {
        self.at_bottom
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    async fn load_initial(&mut self) {
        let query = MessageQuery::latest(self.peer, self.config.initial_limit);
        if let Some(rows) = self.fetch(&query).await {
            self.window.replace_all(rows);
        }
    }

    /// At the bottom the initial window is fetched again. Otherwise rows
    /// within the current date range are re-queried, capped at the current
    /// size; this can miss changes that push rows past the cap.
    async fn reload(&mut self) {
        if self.at_bottom || self.window.is_empty() {
            debug!("Reloading initial window of {}", self.peer);
            self.load_initial().await;
            return;
        }

        let query = MessageQuery {
            peer: self.peer,
            order: SortOrder::Descending,
            bound: DateBound::Between(self.window.min_date(), self.window.max_date()),
            limit: self.window.len(),
        };
        debug!("Reloading range {:?} of {}", query.bound, self.peer);

        if let Some(rows) = self.fetch(&query).await {
            self.window.replace_all(rows);
        }
    }

    async fn fetch(&self, query: &MessageQuery) -> Option<Vec<Message>> {
        match self.store.query_messages(query).await {
            Ok(rows) => Some(rows),
            Err(e) => {
                error!("Failed to load messages for {}: {}", self.peer, e);
                None
            }
        }
    }
}
