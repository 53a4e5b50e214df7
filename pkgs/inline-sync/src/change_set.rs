//! Diffs delivered to the single observer of a conversation cache

use inline_store::{Message, MessageKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use tracing::{error, warn};

/// How the window changed after one event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeSet {
    /// New messages at their final positions, ascending
    Added {
        messages: Vec<Message>,
        positions: Vec<usize>,
    },
    Updated {
        messages: Vec<Message>,
        positions: Vec<usize>,
    },
    /// Removed ids with the positions they held before removal, descending
    Deleted {
        ids: Vec<MessageKey>,
        positions: Vec<usize>,
    },
    /// Window was recomputed, no positional diff available
    Reload,
}

/// Receiver of change-sets. Any `FnMut(ChangeSet) + Send` closure works.
pub trait ChangeSetObserver: Send {
    fn on_change(&mut self, change: ChangeSet);
}

impl<F> ChangeSetObserver for F
where
    F: FnMut(ChangeSet) + Send,
{
    fn on_change(&mut self, change: ChangeSet) {
        self(change)
    }
}

struct Registered {
    id: u64,
    // taken out while the observer runs
    observer: Option<Box<dyn ChangeSetObserver>>,
}

type Slot = Arc<Mutex<Option<Registered>>>;

/// Holds at most one observer
#[derive(Default)]
pub(crate) struct ObserverSlot {
    slot: Slot,
    next_id: u64,
}

impl ObserverSlot {
    pub(crate) fn register(&mut self, observer: Box<dyn ChangeSetObserver>) -> ObserverToken {
        let id = self.next_id;
        self.next_id += 1;

        let previous = self.slot.lock().replace(Registered {
            id,
            observer: Some(observer),
        });
        if previous.is_some() {
            warn!("Observer already set, replacing it invalidates the previous token");
        }

        ObserverToken {
            id,
            slot: Arc::downgrade(&self.slot),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub(crate) fn clear(&mut self) {
        self.slot.lock().take();
    }

    /// Deliver `change` to the observer, if any. A panicking observer is
    /// logged and stays registered. Returns false if it panicked.
    pub(crate) fn notify(&self, change: ChangeSet) -> bool {
        // the lock is not held while the observer runs, so it may cancel its
        // own token from inside the callback
        let (id, mut observer) = {
            let mut guard = self.slot.lock();
            match guard.as_mut() {
                Some(registered) => match registered.observer.take() {
                    Some(observer) => (registered.id, observer),
                    None => return true,
                },
                None => return true,
            }
        };

        let outcome = catch_unwind(AssertUnwindSafe(|| observer.on_change(change)));

        let mut guard = self.slot.lock();
        if let Some(registered) = guard.as_mut() {
            if registered.id == id && registered.observer.is_none() {
                registered.observer = Some(observer);
            }
        }

        match outcome {
            Ok(()) => true,
            Err(panic) => {
                error!("Observer panicked: {}", panic_message(panic.as_ref()));
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Registration of an observer. Dropping the token keeps the observer
/// attached; call [`ObserverToken::cancel`] to detach it.
#[derive(Debug)]
pub struct ObserverToken {
    id: u64,
    slot: Weak<Mutex<Option<Registered>>>,
}

impl ObserverToken {
    /// Detach the observer. No-op if it was already replaced or the cache
    /// is gone.
    pub fn cancel(self) {
        if let Some(slot) = self.slot.upgrade() {
            let mut guard = slot.lock();
            if guard.as_ref().map(|r| r.id) == Some(self.id) {
                guard.take();
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.slot
            .upgrade()
            .map(|slot| slot.lock().as_ref().map(|r| r.id) == Some(self.id))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, Box<dyn ChangeSetObserver>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let observer: Box<dyn ChangeSetObserver> = Box::new(move |_change: ChangeSet| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (count, observer)
    }

    #[test]
    fn test_notify_reaches_observer() {
        let mut slot = ObserverSlot::default();
        let (count, observer) = counter();
        let _token = slot.register(observer);

        assert!(slot.notify(ChangeSet::Reload));
        assert!(slot.notify(ChangeSet::Reload));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reregistration_invalidates_previous_token() {
        let mut slot = ObserverSlot::default();
        let (first_count, first) = counter();
        let (second_count, second) = counter();

        let first_token = slot.register(first);
        let second_token = slot.register(second);
        assert!(!first_token.is_active());
        assert!(second_token.is_active());

        // cancelling a stale token leaves the current observer alone
        first_token.cancel();
        slot.notify(ChangeSet::Reload);
        assert_eq!(first_count.load(Ordering::SeqCst), 0);
        assert_eq!(second_count.load(Ordering::SeqCst), 1);

        second_token.cancel();
        assert!(!slot.is_set());
    }

    #[test]
    fn test_dropping_token_keeps_observer() {
        let mut slot = ObserverSlot::default();
        let (count, observer) = counter();
        drop(slot.register(observer));

        slot.notify(ChangeSet::Reload);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_observer_is_contained() {
        let mut slot = ObserverSlot::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let _token = slot.register(Box::new(move |_change: ChangeSet| {
            seen.fetch_add(1, Ordering::SeqCst);
            panic!("observer failure");
        }));

        assert!(!slot.notify(ChangeSet::Reload));
        assert!(!slot.notify(ChangeSet::Reload));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_observer_can_cancel_itself() {
        let mut slot = ObserverSlot::default();
        let token_cell: Arc<Mutex<Option<ObserverToken>>> = Arc::new(Mutex::new(None));
        let cell = token_cell.clone();

        let token = slot.register(Box::new(move |_change: ChangeSet| {
            if let Some(token) = cell.lock().take() {
                token.cancel();
            }
        }));
        *token_cell.lock() = Some(token);

        slot.notify(ChangeSet::Reload);
        assert!(!slot.is_set());
    }
}
