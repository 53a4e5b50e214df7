//! In-memory message store with the same query semantics as `MessageStore`

use crate::error::{Result, StoreError};
use crate::repository::MessageRepository;
use crate::types::{Message, MessageKey, MessageMutation, MessageQuery, MessageStatus, SortOrder};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tracing::debug;

/// Message store backed by a `BTreeMap` keyed by local row id
#[derive(Default)]
pub struct MemoryMessageStore {
    rows: RwLock<BTreeMap<i64, Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with rows exactly as given
    pub fn with_messages(messages: impl IntoIterator<Item = Message>) -> Self {
        let rows = messages.into_iter().map(|m| (m.id, m)).collect();
        Self {
            rows: RwLock::new(rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    pub fn get(&self, key: &MessageKey) -> Option<Message> {
        self.rows
            .read()
            .values()
            .find(|m| m.answers_to(key))
            .cloned()
    }

    fn upsert(rows: &mut BTreeMap<i64, Message>, mut message: Message) -> Message {
        let existing = message
            .global_id
            .and_then(|id| find_id(rows, &MessageKey::Global(id)))
            .or_else(|| {
                message
                    .random_id
                    .and_then(|id| find_id(rows, &MessageKey::Correlation(id)))
            });

        match existing.and_then(|id| rows.get(&id)) {
            Some(current) => {
                message.id = current.id;
                message.global_id = message.global_id.or(current.global_id);
                message.random_id = message.random_id.or(current.random_id);
            }
            None => {
                let highest = rows.keys().next_back().copied().unwrap_or(0);
                message.id = highest.max(0) + 1;
            }
        }

        rows.insert(message.id, message.clone());
        message
    }

    fn set_status(
        rows: &mut BTreeMap<i64, Message>,
        random_id: i64,
        status: MessageStatus,
        global_id: Option<i64>,
    ) -> Result<Message> {
        let key = MessageKey::Correlation(random_id);
        let id = find_id(rows, &key).ok_or(StoreError::NotFound(key))?;
        let row = rows.get_mut(&id).ok_or(StoreError::NotFound(key))?;

        row.status = status;
        if global_id.is_some() {
            row.global_id = global_id;
        }
        Ok(row.clone())
    }

    fn row_mut<'a>(
        rows: &'a mut BTreeMap<i64, Message>,
        key: &MessageKey,
    ) -> Result<&'a mut Message> {
        let id = find_id(rows, key).ok_or(StoreError::NotFound(*key))?;
        rows.get_mut(&id).ok_or(StoreError::NotFound(*key))
    }
}

fn find_id(rows: &BTreeMap<i64, Message>, key: &MessageKey) -> Option<i64> {
    rows.values().find(|m| m.answers_to(key)).map(|m| m.id)
}

#[async_trait]
impl MessageRepository for MemoryMessageStore {
    async fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>> {
        let rows = self.rows.read();

        let mut matches: Vec<Message> = rows
            .values()
            .filter(|m| m.peer == query.peer && query.bound.contains(&m.date))
            .cloned()
            .collect();

        match query.order {
            SortOrder::Ascending => matches.sort_by(|a, b| (a.date, a.id).cmp(&(b.date, b.id))),
            SortOrder::Descending => matches.sort_by(|a, b| (b.date, b.id).cmp(&(a.date, a.id))),
        }
        matches.truncate(query.limit);

        debug!(
            "Retrieved {} messages for {} ({:?})",
            matches.len(),
            query.peer,
            query.bound
        );
        Ok(matches)
    }

    async fn write(&self, mutation: MessageMutation) -> Result<Vec<Message>> {
        let mut rows = self.rows.write();

        match mutation {
            MessageMutation::Insert(message) => {
                rows.insert(message.id, message.clone());
                Ok(vec![message])
            }
            MessageMutation::Upsert(message) => Ok(vec![Self::upsert(&mut rows, message)]),
            MessageMutation::SetStatus {
                random_id,
                status,
                global_id,
            } => Ok(vec![Self::set_status(
                &mut rows, random_id, status, global_id,
            )?]),
            MessageMutation::Delete(keys) => {
                let ids: Vec<i64> = rows
                    .values()
                    .filter(|m| keys.iter().any(|key| m.answers_to(key)))
                    .map(|m| m.id)
                    .collect();
                Ok(ids.iter().filter_map(|id| rows.remove(id)).collect())
            }
            MessageMutation::React { key, reaction } => {
                let row = Self::row_mut(&mut rows, &key)?;
                row.reactions
                    .retain(|r| !(r.user_id == reaction.user_id && r.emoji == reaction.emoji));
                row.reactions.push(reaction);
                Ok(vec![row.clone()])
            }
            MessageMutation::Unreact {
                key,
                user_id,
                emoji,
            } => {
                let row = Self::row_mut(&mut rows, &key)?;
                row.reactions
                    .retain(|r| !(r.user_id == user_id && r.emoji == emoji));
                Ok(vec![row.clone()])
            }
        }
    }
}
