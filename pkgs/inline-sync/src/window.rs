//! Ordered, duplicate-free slice of one conversation's messages
//!
//! Every mutation re-sorts, rebuilds the alias index and recomputes the date
//! range in O(n). Windows stay in the hundreds of rows, so this is cheaper
//! than keeping a sorted index up to date; revisit if windows grow unbounded.

use chrono::{DateTime, Utc};
use inline_store::{Message, MessageKey};
use std::collections::{HashMap, HashSet};

/// `min_date` of an empty window
pub fn distant_future() -> DateTime<Utc> {
    DateTime::<Utc>::MAX_UTC
}

/// `max_date` of an empty window
pub fn distant_past() -> DateTime<Utc> {
    DateTime::<Utc>::MIN_UTC
}

/// Result of replacing a message in place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Not part of the window
    Missing,
    /// Replaced, position unchanged
    InPlace(usize),
    /// Replaced and re-sorted to a different position
    Moved { from: usize, to: usize },
    /// Replaced, and other entries sharing a key with the new copy were
    /// dropped. `removed` is how many.
    Collapsed { position: usize, removed: usize },
}

#[derive(Debug, Clone)]
pub struct MessageWindow {
    reversed: bool,
    messages: Vec<Message>,
    // every alias of every message -> position
    index: HashMap<MessageKey, usize>,
    min_date: DateTime<Utc>,
    max_date: DateTime<Utc>,
}

impl MessageWindow {
    pub fn new(reversed: bool) -> Self {
        Self {
            reversed,
            messages: Vec::new(),
            index: HashMap::new(),
            min_date: distant_future(),
            max_date: distant_past(),
        }
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn min_date(&self) -> DateTime<Utc> {
        self.min_date
    }

    pub fn max_date(&self) -> DateTime<Utc> {
        self.max_date
    }

    pub fn position(&self, key: &MessageKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Position of the entry sharing any key with `message`
    pub fn position_of(&self, message: &Message) -> Option<usize> {
        message
            .aliases()
            .iter()
            .find_map(|key| self.position(key))
    }

    pub fn contains(&self, message: &Message) -> bool {
        self.position_of(message).is_some()
    }

    pub fn get(&self, key: &MessageKey) -> Option<&Message> {
        self.position(key).map(|i| &self.messages[i])
    }

    /// Snapshot keyed by each message's primary key
    pub fn by_key(&self) -> HashMap<MessageKey, Message> {
        self.messages.iter().map(|m| (m.key(), m.clone())).collect()
    }

    /// Drop everything and hold `batch` instead. `batch` may come in any order.
    pub fn replace_all(&mut self, batch: Vec<Message>) {
        self.messages.clear();
        self.index.clear();
        self.messages = self.unknown(batch);
        self.restore();
    }

    /// Add live messages. Messages already held are filtered out. Returns the
    /// added messages and their final positions, ascending.
    pub fn insert(&mut self, incoming: Vec<Message>) -> Option<(Vec<Message>, Vec<usize>)> {
        let fresh = self.unknown(incoming);
        if fresh.is_empty() {
            return None;
        }

        if self.reversed {
            self.messages.splice(0..0, fresh.iter().cloned());
        } else {
            self.messages.extend(fresh.iter().cloned());
        }
        self.restore();

        let mut positions: Vec<usize> = fresh.iter().filter_map(|m| self.position_of(m)).collect();
        positions.sort_unstable();
        Some((fresh, positions))
    }

    /// Merge one page of history at the front or the back. Returns the
    /// number of rows that were not already held.
    pub fn merge_page(&mut self, batch: Vec<Message>, prepend: bool) -> usize {
        let mut fresh = self.unknown(batch);
        if fresh.is_empty() {
            return 0;
        }

        self.sort_batch(&mut fresh);
        let merged = fresh.len();
        if prepend {
            self.messages.splice(0..0, fresh);
        } else {
            self.messages.extend(fresh);
        }
        self.restore();
        merged
    }

    /// Remove every message answering to one of `ids`. Positions are the
    /// indices at call time, descending; ids are those that matched.
    pub fn remove(&mut self, ids: &[MessageKey]) -> Option<(Vec<MessageKey>, Vec<usize>)> {
        let mut positions: Vec<usize> = ids
            .iter()
            .filter_map(|key| self.position(key))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        if positions.is_empty() {
            return None;
        }
        positions.sort_unstable_by(|a, b| b.cmp(a));

        let mut matched = Vec::new();
        for key in ids {
            if self.index.contains_key(key) && !matched.contains(key) {
                matched.push(*key);
            }
        }

        for &position in &positions {
            self.messages.remove(position);
        }
        self.restore();

        Some((matched, positions))
    }

    /// Swap in a newer copy of a held message
    pub fn replace(&mut self, message: Message) -> UpdateOutcome {
        let Some(from) = self.position_of(&message) else {
            return UpdateOutcome::Missing;
        };

        // the new copy may carry a key that another entry already answers to
        let mut duplicates: Vec<usize> = message
            .aliases()
            .iter()
            .filter_map(|key| self.position(key))
            .filter(|&i| i != from)
            .collect();
        duplicates.sort_unstable_by(|a, b| b.cmp(a));
        duplicates.dedup();

        let date_changed = self.messages[from].date != message.date;
        self.messages[from] = message.clone();

        if duplicates.is_empty() && !date_changed {
            self.reindex();
            self.update_range();
            return UpdateOutcome::InPlace(from);
        }

        let removed = duplicates.len();
        for position in duplicates {
            self.messages.remove(position);
        }
        self.restore();

        match self.position_of(&message) {
            Some(position) if removed > 0 => UpdateOutcome::Collapsed { position, removed },
            Some(to) if to == from => UpdateOutcome::InPlace(to),
            Some(to) => UpdateOutcome::Moved { from, to },
            None => UpdateOutcome::Missing,
        }
    }

    /// Messages from `batch` that share no key with the window or with an
    /// earlier message of the batch
    fn unknown(&self, batch: Vec<Message>) -> Vec<Message> {
        let mut seen: HashSet<MessageKey> = HashSet::new();
        batch
            .into_iter()
            .filter(|m| {
                let aliases = m.aliases();
                let known = aliases
                    .iter()
                    .any(|key| self.index.contains_key(key) || seen.contains(key));
                if !known {
                    seen.extend(aliases);
                }
                !known
            })
            .collect()
    }

    fn sort_batch(&self, batch: &mut [Message]) {
        if self.reversed {
            batch.sort_by(|a, b| b.date.cmp(&a.date));
        } else {
            batch.sort_by(|a, b| a.date.cmp(&b.date));
        }
    }

    fn restore(&mut self) {
        let mut messages = std::mem::take(&mut self.messages);
        self.sort_batch(&mut messages);
        self.messages = messages;
        self.reindex();
        self.update_range();
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (i, message) in self.messages.iter().enumerate() {
            for key in message.aliases() {
                self.index.insert(key, i);
            }
        }
    }

    fn update_range(&mut self) {
        let mut lowest = distant_future();
        let mut highest = distant_past();

        for message in &self.messages {
            if message.date < lowest {
                lowest = message.date;
            }
            if message.date > highest {
                highest = message.date;
            }
        }

        self.min_date = lowest;
        self.max_date = highest;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inline_store::{MessageStatus, Peer};
    use rand::Rng;

    fn msg(global_id: i64, secs: i64) -> Message {
        Message {
            id: global_id,
            global_id: Some(global_id),
            random_id: None,
            peer: Peer::User(1),
            from_id: 1,
            date: DateTime::from_timestamp(secs, 0).unwrap(),
            text: None,
            out: false,
            status: MessageStatus::Sent,
            reactions: Vec::new(),
        }
    }

    fn globals(window: &MessageWindow) -> Vec<i64> {
        window
            .messages()
            .iter()
            .filter_map(|m| m.global_id)
            .collect()
    }

    fn assert_invariants(window: &MessageWindow) {
        let messages = window.messages();
        for pair in messages.windows(2) {
            if window.is_reversed() {
                assert!(pair[0].date >= pair[1].date);
            } else {
                assert!(pair[0].date <= pair[1].date);
            }
        }
        for (i, a) in messages.iter().enumerate() {
            for b in &messages[i + 1..] {
                assert!(!a.same_identity(b), "duplicate {:?}", a.key());
            }
        }
        match messages.iter().map(|m| m.date).min() {
            Some(min) => assert_eq!(window.min_date(), min),
            None => assert_eq!(window.min_date(), distant_future()),
        }
        match messages.iter().map(|m| m.date).max() {
            Some(max) => assert_eq!(window.max_date(), max),
            None => assert_eq!(window.max_date(), distant_past()),
        }
    }

    #[test]
    fn test_empty_window_uses_sentinels() {
        let window = MessageWindow::new(false);
        assert_eq!(window.min_date(), distant_future());
        assert_eq!(window.max_date(), distant_past());
    }

    #[test]
    fn test_replace_all_sorts_and_dedups() {
        let mut window = MessageWindow::new(false);
        window.replace_all(vec![msg(3, 30), msg(1, 10), msg(2, 20), msg(1, 10)]);

        assert_eq!(globals(&window), vec![1, 2, 3]);
        assert_invariants(&window);

        let mut reversed = MessageWindow::new(true);
        reversed.replace_all(vec![msg(1, 10), msg(3, 30), msg(2, 20)]);
        assert_eq!(globals(&reversed), vec![3, 2, 1]);
    }

    #[test]
    fn test_insert_skips_known_and_reports_final_positions() {
        let mut window = MessageWindow::new(false);
        window.replace_all(vec![msg(1, 10), msg(3, 30)]);

        let (added, positions) = window.insert(vec![msg(3, 30), msg(2, 20)]).unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(positions, vec![1]);
        assert_eq!(globals(&window), vec![1, 2, 3]);

        assert!(window.insert(vec![msg(2, 20)]).is_none());
    }

    #[test]
    fn test_insert_in_reversed_window_goes_to_head() {
        let mut window = MessageWindow::new(true);
        window.replace_all(vec![msg(1, 10), msg(2, 20)]);

        let (_, positions) = window.insert(vec![msg(3, 30)]).unwrap();
        assert_eq!(positions, vec![0]);
        assert_eq!(globals(&window), vec![3, 2, 1]);
    }

    #[test]
    fn test_remove_reports_original_positions_descending() {
        let mut window = MessageWindow::new(false);
        window.replace_all((1..=10).map(|i| msg(i, i * 10)).collect());

        let (ids, positions) = window
            .remove(&[
                MessageKey::Global(3),
                MessageKey::Global(7),
                MessageKey::Global(99),
            ])
            .unwrap();

        assert_eq!(ids, vec![MessageKey::Global(3), MessageKey::Global(7)]);
        assert_eq!(positions, vec![6, 2]);
        assert_eq!(globals(&window), vec![1, 2, 4, 5, 6, 8, 9, 10]);
        assert_eq!(window.min_date(), msg(1, 10).date);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut window = MessageWindow::new(false);
        window.replace_all(vec![msg(1, 10)]);
        assert!(window.remove(&[MessageKey::Global(2)]).is_none());
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_replace_in_place_and_moved() {
        let mut window = MessageWindow::new(false);
        window.replace_all(vec![msg(1, 10), msg(2, 20), msg(3, 30)]);

        let mut edited = msg(2, 20);
        edited.text = Some("edited".to_string());
        assert_eq!(window.replace(edited), UpdateOutcome::InPlace(1));
        assert_eq!(window.messages()[1].text.as_deref(), Some("edited"));

        assert_eq!(
            window.replace(msg(1, 40)),
            UpdateOutcome::Moved { from: 0, to: 2 }
        );
        assert_eq!(globals(&window), vec![2, 3, 1]);
        assert_eq!(window.max_date(), msg(1, 40).date);

        assert_eq!(window.replace(msg(9, 5)), UpdateOutcome::Missing);
        assert_invariants(&window);
    }

    #[test]
    fn test_replace_adopts_new_aliases() {
        let mut window = MessageWindow::new(false);
        let mut optimistic = msg(0, 10);
        optimistic.id = -4;
        optimistic.global_id = None;
        optimistic.random_id = Some(4);
        window.replace_all(vec![optimistic]);

        let mut sent = msg(40, 10);
        sent.id = -4;
        sent.random_id = Some(4);
        assert_eq!(window.replace(sent), UpdateOutcome::InPlace(0));
        assert!(window.get(&MessageKey::Global(40)).is_some());
        assert!(window.get(&MessageKey::Correlation(4)).is_some());
    }

    #[test]
    fn test_replace_collapsing_duplicates_is_not_in_place() {
        let mut window = MessageWindow::new(false);
        let mut optimistic = msg(0, 30);
        optimistic.id = -5;
        optimistic.global_id = None;
        optimistic.random_id = Some(5);
        window.replace_all(vec![msg(1, 10), msg(2, 20), optimistic]);

        // the echo of the optimistic write was stored under global id 1
        let mut merged = msg(1, 10);
        merged.random_id = Some(5);

        assert_eq!(
            window.replace(merged),
            UpdateOutcome::Collapsed {
                position: 0,
                removed: 1
            }
        );
        assert_eq!(window.len(), 2);
        assert_eq!(window.position(&MessageKey::Correlation(5)), Some(0));
        assert_eq!(window.max_date(), msg(2, 20).date);
    }

    #[test]
    fn test_merge_page_prepends_older_rows() {
        let mut window = MessageWindow::new(false);
        window.replace_all(vec![msg(5, 50), msg(6, 60)]);

        let merged = window.merge_page(vec![msg(5, 50), msg(4, 40), msg(3, 30)], true);
        assert_eq!(merged, 2);
        assert_eq!(globals(&window), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_random_operations_keep_invariants() {
        let mut rng = rand::thread_rng();

        for reversed in [false, true] {
            let mut window = MessageWindow::new(reversed);
            for _ in 0..500 {
                let id = rng.gen_range(1..60);
                let secs = rng.gen_range(0..40);
                match rng.gen_range(0..4) {
                    0 => {
                        window.insert(vec![msg(id, secs), msg(id + 1, secs)]);
                    }
                    1 => {
                        window.remove(&[MessageKey::Global(id)]);
                    }
                    2 => {
                        window.replace(msg(id, secs));
                    }
                    _ => {
                        window.merge_page(vec![msg(id, secs)], rng.gen());
                    }
                }
                assert_invariants(&window);
            }
        }
    }
}
