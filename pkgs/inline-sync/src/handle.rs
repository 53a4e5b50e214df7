//! Conversation cache running on its own task
//!
//! [`ConversationHandle::spawn`] moves a cache onto a tokio task that owns it
//! exclusively. The task serves commands from the handle and applies bus
//! events as they arrive, so window mutations are never concurrent.

use crate::change_set::{ChangeSetObserver, ObserverToken};
use crate::conversation_cache::{CacheState, ConversationCache, LoadDirection};
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use inline_store::{Message, MessageRepository, Peer};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Read-only copy of a cache at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub peer: Peer,
    pub state: CacheState,
    pub messages: Vec<Message>,
    pub min_date: DateTime<Utc>,
    pub max_date: DateTime<Utc>,
    pub at_bottom: bool,
}

impl<S: MessageRepository> From<&ConversationCache<S>> for WindowSnapshot {
    fn from(cache: &ConversationCache<S>) -> Self {
        Self {
            peer: cache.peer(),
            state: cache.state(),
            messages: cache.messages().to_vec(),
            min_date: cache.min_date(),
            max_date: cache.max_date(),
            at_bottom: cache.is_at_bottom(),
        }
    }
}

enum Command {
    LoadBatch(LoadDirection, oneshot::Sender<usize>),
    SetAtBottom(bool),
    Observe(Box<dyn ChangeSetObserver>, oneshot::Sender<ObserverToken>),
    Snapshot(oneshot::Sender<WindowSnapshot>),
}

pub struct ConversationHandle {
    peer: Peer,
    command_sender: mpsc::Sender<Command>,
    task: JoinHandle<()>,
    closed: AtomicBool,
}

impl ConversationHandle {
    /// Run `cache` on a new task. A cache that was not initialized yet is
    /// initialized first; commands sent meanwhile wait for it.
    pub fn spawn<S>(cache: ConversationCache<S>) -> Self
    where
        S: MessageRepository + 'static,
    {
        let peer = cache.peer();
        let (command_sender, command_receiver) = mpsc::channel(cache.config().command_capacity.max(1));
        let task = tokio::spawn(run(cache, command_receiver));

        Self {
            peer,
            command_sender,
            task,
            closed: AtomicBool::new(false),
        }
    }

    pub fn peer(&self) -> Peer {
        self.peer
    }

    /// Extend the window by one page. Returns the number of merged rows.
    pub async fn load_batch(&self, direction: LoadDirection) -> Result<usize> {
        let (sender, receiver) = oneshot::channel();
        self.send(Command::LoadBatch(direction, sender)).await?;
        receiver.await.map_err(|_| SyncError::Closed)
    }

    pub async fn set_at_bottom(&self, at_bottom: bool) -> Result<()> {
        self.send(Command::SetAtBottom(at_bottom)).await
    }

    /// Register the observer of the cache, replacing any previous one
    pub async fn observe<O>(&self, observer: O) -> Result<ObserverToken>
    where
        O: ChangeSetObserver + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.send(Command::Observe(Box::new(observer), sender))
            .await?;
        receiver.await.map_err(|_| SyncError::Closed)
    }

    pub async fn snapshot(&self) -> Result<WindowSnapshot> {
        let (sender, receiver) = oneshot::channel();
        self.send(Command::Snapshot(sender)).await?;
        receiver.await.map_err(|_| SyncError::Closed)
    }

    /// Stop the task. Loads in flight are dropped without being applied; the
    /// bus subscription and the observer are released with the cache.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.task.abort();
            info!("Closed conversation handle for {}", self.peer);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.task.is_finished()
    }

    async fn send(&self, command: Command) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Closed);
        }
        self.command_sender
            .send(command)
            .await
            .map_err(|_| SyncError::Closed)
    }
}

async fn run<S: MessageRepository>(
    mut cache: ConversationCache<S>,
    mut command_receiver: mpsc::Receiver<Command>,
) {
    if cache.state() == CacheState::Initializing {
        cache.initialize().await;
    }
    cache.process_pending().await;
    debug!("Conversation task for {} running", cache.peer());

    loop {
        tokio::select! {
            command = command_receiver.recv() => match command {
                Some(command) => execute(&mut cache, command).await,
                None => break,
            },
            event = cache.next_event() => match event {
                Some(event) => {
                    let mut events = vec![event];
                    events.extend(cache.drain_pending());
                    cache.apply_events(events).await;
                }
                None => break,
            },
        }
    }

    cache.close();
}

async fn execute<S: MessageRepository>(cache: &mut ConversationCache<S>, command: Command) {
    match command {
        Command::LoadBatch(direction, reply) => {
            let merged = cache.load_batch(direction).await;
            let _ = reply.send(merged);
        }
        Command::SetAtBottom(at_bottom) => cache.set_at_bottom(at_bottom),
        Command::Observe(observer, reply) => {
            let token = cache.observe_boxed(observer);
            let _ = reply.send(token);
        }
        Command::Snapshot(reply) => {
            let _ = reply.send(WindowSnapshot::from(&*cache));
        }
    }
}
