//! Inline Sync - live conversation windows over the local message store
//!
//! Keeps an in-memory, paginated and continuously updated view of each open
//! conversation consistent with the store and with the mutations written to
//! it.
//!
//! # Architecture
//!
//! - **EventBus**: fan-out of message mutations, addressed by peer. Injected
//!   explicitly; every cache holds its own subscription.
//! - **ConversationCache**: one per open conversation. Owns the ordered
//!   window, pages history in by date cursor and turns bus events into
//!   change-sets.
//! - **ChangeSet / ChangeSetObserver**: the minimal diffs a UI applies.
//! - **ConversationHandle**: runs a cache on its own task and talks to it
//!   over a command channel.
//! - **MessageWriter**: optimistic sends and server ingestion. Writes to the
//!   store, then publishes the matching event.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use inline_store::{MemoryMessageStore, Peer};
//! use inline_sync::{CacheConfig, ChangeSet, ConversationCache, EventBus, MessageWriter};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryMessageStore::new());
//! let bus = EventBus::new();
//! let writer = MessageWriter::new(store.clone(), bus.clone());
//!
//! let peer = Peer::User(42);
//! let mut cache = ConversationCache::open_ready(peer, store, &bus, CacheConfig::default()).await;
//! let _token = cache.observe(|change: ChangeSet| println!("{:?}", change));
//!
//! writer.send_text(peer, 1, "Hello!").await?;
//! cache.process_pending().await;
//! assert_eq!(cache.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod change_set;
pub mod config;
pub mod conversation_cache;
pub mod error;
pub mod event_bus;
pub mod handle;
pub mod window;
pub mod writer;

pub use change_set::{ChangeSet, ChangeSetObserver, ObserverToken};
pub use config::{batch_size_for, CacheConfig};
pub use conversation_cache::{CacheState, ConversationCache, LoadDirection};
pub use error::{Result, SyncError};
pub use event_bus::{EventBus, MessageEvent, Subscription};
pub use handle::{ConversationHandle, WindowSnapshot};
pub use window::{distant_future, distant_past, MessageWindow, UpdateOutcome};
pub use writer::{generate_random_id, MessageWriter};
