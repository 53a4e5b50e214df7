//! Inline Store - persistent message storage for Inline chat clients
//!
//! This crate provides the local message table that conversation views read
//! from. It exposes one contract, [`MessageRepository`], and two
//! implementations:
//!
//! - **MessageStore**: Sea-ORM over SQLite, used by the apps
//! - **MemoryMessageStore**: a `BTreeMap` with identical query semantics,
//!   used in tests and previews
//!
//! # Database Schema
//!
//! - `messages`: one row per message, keyed by local row id. Optimistic
//!   writes use negative ids until the server echo is merged into them.
//!   Indexed by `(peer_user_id, date)`, `(peer_thread_id, date)`,
//!   `global_id` and `random_id`.
//! - `reactions`: emoji reactions, cascading with their message.
//!
//! # Identity
//!
//! A message answers to its local id, its server id and its correlation id.
//! See [`MessageKey`] and [`Message::same_identity`].
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use inline_store::{MessageQuery, MessageRepository, MessageStore, Peer};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MessageStore::new("inline.db".into()).await?;
//! let latest = store
//!     .query_messages(&MessageQuery::latest(Peer::User(42), 50))
//!     .await?;
//! println!("{} messages", latest.len());
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod error;
pub mod memory_store;
pub mod message_store;
pub mod migration;
pub mod repository;
pub mod types;

pub use error::StoreError;
pub use memory_store::MemoryMessageStore;
pub use message_store::MessageStore;
pub use repository::MessageRepository;
pub use types::{
    to_millis_precision, DateBound, Message, MessageKey, MessageMutation, MessageQuery,
    MessageStatus, Peer, Reaction, SortOrder,
};

/// Configuration for persistence layer
#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    /// Path to the SQLite database file
    pub db_path: std::path::PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            db_path: std::path::PathBuf::from("inline-store.db"),
        }
    }
}
