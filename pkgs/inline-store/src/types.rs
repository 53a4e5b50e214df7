//! Message data model shared by the store and the sync layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversation identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id")]
pub enum Peer {
    /// Direct chat with a user
    User(i64),
    /// Thread or group chat
    Thread(i64),
}

impl Peer {
    pub fn id(&self) -> i64 {
        match self {
            Peer::User(id) | Peer::Thread(id) => *id,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Peer::User(_))
    }

    pub fn is_thread(&self) -> bool {
        matches!(self, Peer::Thread(_))
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::User(id) => write!(f, "user:{}", id),
            Peer::Thread(id) => write!(f, "thread:{}", id),
        }
    }
}

/// Delivery status of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageStatus {
    Sending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "Sending",
            MessageStatus::Sent => "Sent",
            MessageStatus::Failed => "Failed",
        }
    }

    /// Unknown values decode as `Sent`, rows written by older clients had no status.
    pub fn parse(value: &str) -> Self {
        match value {
            "Sending" => MessageStatus::Sending,
            "Failed" => MessageStatus::Failed,
            _ => MessageStatus::Sent,
        }
    }
}

/// Emoji reaction attached to a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: i64,
    pub emoji: String,
    pub date: DateTime<Utc>,
}

/// One of the identifiers a message can be addressed by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKey {
    /// Local row id
    Local(i64),
    /// Server-assigned id
    Global(i64),
    /// Client-generated correlation id of an optimistic write
    Correlation(i64),
}

/// A chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Local row id, negative while the message is an optimistic placeholder
    pub id: i64,
    pub global_id: Option<i64>,
    /// Correlation id used to match an optimistic write with its server echo
    pub random_id: Option<i64>,
    pub peer: Peer,
    pub from_id: i64,
    pub date: DateTime<Utc>,
    pub text: Option<String>,
    pub out: bool,
    pub status: MessageStatus,
    pub reactions: Vec<Reaction>,
}

impl Message {
    /// The identity used for deduplication: global id when known, else the
    /// correlation id, else the local row id.
    pub fn key(&self) -> MessageKey {
        if let Some(global_id) = self.global_id {
            MessageKey::Global(global_id)
        } else if let Some(random_id) = self.random_id {
            MessageKey::Correlation(random_id)
        } else {
            MessageKey::Local(self.id)
        }
    }

    /// Every key this message answers to.
    pub fn aliases(&self) -> Vec<MessageKey> {
        let mut keys = Vec::with_capacity(3);
        if let Some(global_id) = self.global_id {
            keys.push(MessageKey::Global(global_id));
        }
        if let Some(random_id) = self.random_id {
            keys.push(MessageKey::Correlation(random_id));
        }
        keys.push(MessageKey::Local(self.id));
        keys
    }

    pub fn answers_to(&self, key: &MessageKey) -> bool {
        match key {
            MessageKey::Local(id) => self.id == *id,
            MessageKey::Global(id) => self.global_id == Some(*id),
            MessageKey::Correlation(id) => self.random_id == Some(*id),
        }
    }

    /// Two messages are the same if they share any key.
    pub fn same_identity(&self, other: &Message) -> bool {
        other.aliases().iter().any(|key| self.answers_to(key))
    }
}

/// Sort direction on the `date` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Date filter applied to a message query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DateBound {
    /// No filter
    Latest,
    /// `date <= cursor`
    AtOrBefore(DateTime<Utc>),
    /// `date >= cursor`
    AtOrAfter(DateTime<Utc>),
    /// `min <= date <= max`
    Between(DateTime<Utc>, DateTime<Utc>),
}

impl DateBound {
    pub fn contains(&self, date: &DateTime<Utc>) -> bool {
        match self {
            DateBound::Latest => true,
            DateBound::AtOrBefore(cursor) => date <= cursor,
            DateBound::AtOrAfter(cursor) => date >= cursor,
            DateBound::Between(min, max) => date >= min && date <= max,
        }
    }
}

/// Ordered range query over one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageQuery {
    pub peer: Peer,
    pub order: SortOrder,
    pub bound: DateBound,
    pub limit: usize,
}

impl MessageQuery {
    /// The newest `limit` messages, newest first.
    pub fn latest(peer: Peer, limit: usize) -> Self {
        Self {
            peer,
            order: SortOrder::Descending,
            bound: DateBound::Latest,
            limit,
        }
    }
}

/// A write against the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageMutation {
    /// Insert a row exactly as given (optimistic placeholders)
    Insert(Message),
    /// Insert or merge a server message, matching existing rows by global or
    /// correlation id and keeping their local id
    Upsert(Message),
    /// Change delivery status of an optimistic write
    SetStatus {
        random_id: i64,
        status: MessageStatus,
        global_id: Option<i64>,
    },
    Delete(Vec<MessageKey>),
    React {
        key: MessageKey,
        reaction: Reaction,
    },
    Unreact {
        key: MessageKey,
        user_id: i64,
        emoji: String,
    },
}

/// Truncate to millisecond precision, the resolution the store keeps.
pub fn to_millis_precision(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: i64, global_id: Option<i64>, random_id: Option<i64>) -> Message {
        Message {
            id,
            global_id,
            random_id,
            peer: Peer::User(1),
            from_id: 1,
            date: Utc::now(),
            text: Some("hi".to_string()),
            out: true,
            status: MessageStatus::Sent,
            reactions: Vec::new(),
        }
    }

    #[test]
    fn test_key_prefers_global_then_correlation() {
        assert_eq!(message(3, Some(9), Some(7)).key(), MessageKey::Global(9));
        assert_eq!(message(3, None, Some(7)).key(), MessageKey::Correlation(7));
        assert_eq!(message(3, None, None).key(), MessageKey::Local(3));
    }

    #[test]
    fn test_echo_shares_identity_with_optimistic_write() {
        let optimistic = message(-7, None, Some(7));
        let echo = message(12, Some(500), Some(7));
        let other = message(13, Some(501), Some(8));

        assert!(optimistic.same_identity(&echo));
        assert!(echo.same_identity(&optimistic));
        assert!(!echo.same_identity(&other));
    }

    #[test]
    fn test_peer_equality_respects_tag() {
        assert_eq!(Peer::User(1), Peer::User(1));
        assert_ne!(Peer::User(1), Peer::Thread(1));
        assert_eq!(Peer::Thread(4).to_string(), "thread:4");
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            MessageStatus::Sending,
            MessageStatus::Sent,
            MessageStatus::Failed,
        ] {
            assert_eq!(MessageStatus::parse(status.as_str()), status);
        }
        assert_eq!(MessageStatus::parse("garbage"), MessageStatus::Sent);
    }

    #[test]
    fn test_date_bound_is_inclusive() {
        let now = to_millis_precision(Utc::now());
        assert!(DateBound::AtOrBefore(now).contains(&now));
        assert!(DateBound::AtOrAfter(now).contains(&now));
        assert!(DateBound::Between(now, now).contains(&now));
        assert!(!DateBound::AtOrAfter(now).contains(&(now - chrono::Duration::milliseconds(1))));
    }
}
