//! Write path: persist a mutation, then announce it on the bus
//!
//! Nothing is published when the store rejects a write.

use crate::error::Result;
use crate::event_bus::{EventBus, MessageEvent};
use chrono::Utc;
use inline_store::{
    to_millis_precision, Message, MessageKey, MessageMutation, MessageRepository, MessageStatus,
    Peer, Reaction,
};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

pub struct MessageWriter<S> {
    store: Arc<S>,
    bus: EventBus,
}

impl<S> Clone for MessageWriter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            bus: self.bus.clone(),
        }
    }
}

/// Random positive 63-bit correlation id
pub fn generate_random_id() -> i64 {
    rand::thread_rng().gen_range(1..=i64::MAX)
}

impl<S: MessageRepository> MessageWriter<S> {
    pub fn new(store: Arc<S>, bus: EventBus) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Store an optimistic outgoing message and show it right away. The
    /// returned placeholder carries the correlation id to confirm or fail
    /// it later.
    pub async fn send_text(&self, peer: Peer, from_id: i64, text: impl Into<String>) -> Result<Message> {
        let random_id = generate_random_id();
        let placeholder = Message {
            id: -random_id,
            global_id: None,
            random_id: Some(random_id),
            peer,
            from_id,
            date: to_millis_precision(Utc::now()),
            text: Some(text.into()),
            out: true,
            status: MessageStatus::Sending,
            reactions: Vec::new(),
        };

        let stored = self.write(MessageMutation::Insert(placeholder)).await?;
        debug!("Queued outgoing message {} in {}", random_id, peer);
        self.publish(MessageEvent::Add {
            messages: stored.clone(),
            peer,
        });
        first(stored)
    }

    /// Mark an optimistic message as delivered under its server id
    pub async fn confirm_sent(&self, peer: Peer, random_id: i64, global_id: i64) -> Result<Message> {
        self.set_status(peer, random_id, MessageStatus::Sent, Some(global_id))
            .await
    }

    pub async fn mark_failed(&self, peer: Peer, random_id: i64) -> Result<Message> {
        info!("Message {} in {} failed to send", random_id, peer);
        self.set_status(peer, random_id, MessageStatus::Failed, None)
            .await
    }

    /// Persist messages from the server. Echoes of optimistic writes merge
    /// into their placeholder rows and are filtered out by caches.
    pub async fn ingest_remote(&self, peer: Peer, messages: Vec<Message>) -> Result<Vec<Message>> {
        let mut stored = Vec::with_capacity(messages.len());
        for message in messages {
            stored.extend(self.write(MessageMutation::Upsert(message)).await?);
        }

        if !stored.is_empty() {
            self.publish(MessageEvent::Add {
                messages: stored.clone(),
                peer,
            });
        }
        Ok(stored)
    }

    /// Persist an edited message from the server
    pub async fn ingest_update(&self, peer: Peer, message: Message) -> Result<Message> {
        let stored = first(self.write(MessageMutation::Upsert(message)).await?)?;
        self.publish(MessageEvent::Update {
            message: stored.clone(),
            peer,
        });
        Ok(stored)
    }

    /// Delete messages. The event carries the requested keys; the removed
    /// rows are returned.
    pub async fn delete(&self, peer: Peer, keys: Vec<MessageKey>) -> Result<Vec<Message>> {
        let removed = self.write(MessageMutation::Delete(keys.clone())).await?;
        self.publish(MessageEvent::Delete { ids: keys, peer });
        Ok(removed)
    }

    pub async fn react(&self, peer: Peer, key: MessageKey, reaction: Reaction) -> Result<Message> {
        let stored = first(self.write(MessageMutation::React { key, reaction }).await?)?;
        self.publish(MessageEvent::Update {
            message: stored.clone(),
            peer,
        });
        Ok(stored)
    }

    pub async fn unreact(
        &self,
        peer: Peer,
        key: MessageKey,
        user_id: i64,
        emoji: impl Into<String>,
    ) -> Result<Message> {
        let stored = first(
            self.write(MessageMutation::Unreact {
                key,
                user_id,
                emoji: emoji.into(),
            })
            .await?,
        )?;
        self.publish(MessageEvent::Update {
            message: stored.clone(),
            peer,
        });
        Ok(stored)
    }

    /// Tell every cache of `peer` to re-query, after changes too broad to
    /// describe one by one
    pub fn reload(&self, peer: Peer) {
        self.publish(MessageEvent::Reload { peer });
    }

    async fn set_status(
        &self,
        peer: Peer,
        random_id: i64,
        status: MessageStatus,
        global_id: Option<i64>,
    ) -> Result<Message> {
        let stored = first(
            self.write(MessageMutation::SetStatus {
                random_id,
                status,
                global_id,
            })
            .await?,
        )?;
        self.publish(MessageEvent::Update {
            message: stored.clone(),
            peer,
        });
        Ok(stored)
    }

    async fn write(&self, mutation: MessageMutation) -> Result<Vec<Message>> {
        Ok(self.store.write(mutation).await?)
    }

    fn publish(&self, event: MessageEvent) {
        let delivered = self.bus.publish(event);
        debug!("Event delivered to {} subscribers", delivered);
    }
}

fn first(rows: Vec<Message>) -> Result<Message> {
    rows.into_iter().next().ok_or_else(|| {
        inline_store::StoreError::Unavailable("write returned no rows".to_string()).into()
    })
}
