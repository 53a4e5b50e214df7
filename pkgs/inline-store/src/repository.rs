//! Read/write contract consumed by the sync layer

use crate::error::Result;
use crate::types::{Message, MessageMutation, MessageQuery};
use async_trait::async_trait;

/// A durable, queryable table of messages.
///
/// Implementations serialize their own writes; callers only rely on each
/// query being consistent at the moment it runs.
#[async_trait]
pub trait MessageRepository: Send + Sync {
    /// Ordered range query over one conversation.
    async fn query_messages(&self, query: &MessageQuery) -> Result<Vec<Message>>;

    /// Apply a mutation and return the affected rows as they are after the
    /// write. Deletions return the rows that were removed.
    async fn write(&self, mutation: MessageMutation) -> Result<Vec<Message>>;
}
