//! Conversation cache configuration

use serde::{Deserialize, Serialize};

/// Configuration for a conversation cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Number of messages loaded when the conversation opens (default: 50)
    pub initial_limit: usize,

    /// Keep the window newest-first instead of oldest-first (default: false)
    pub reversed: bool,

    /// Capacity of the command channel of a spawned conversation (default: 64)
    pub command_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_limit: 50,
            reversed: false,
            command_capacity: 64,
        }
    }
}

impl CacheConfig {
    pub fn reversed(mut self, reversed: bool) -> Self {
        self.reversed = reversed;
        self
    }

    pub fn initial_limit(mut self, initial_limit: usize) -> Self {
        self.initial_limit = initial_limit;
        self
    }
}

/// Rows fetched by one pagination step. Grows with the window so deep
/// history is walked in fewer queries.
pub fn batch_size_for(window_len: usize) -> usize {
    match window_len {
        0..=200 => 100,
        201..=300 => 200,
        _ => 400,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_tiers() {
        assert_eq!(batch_size_for(0), 100);
        assert_eq!(batch_size_for(150), 100);
        assert_eq!(batch_size_for(200), 100);
        assert_eq!(batch_size_for(201), 200);
        assert_eq!(batch_size_for(300), 200);
        assert_eq!(batch_size_for(301), 400);
        assert_eq!(batch_size_for(5_000), 400);
    }

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.initial_limit, 50);
        assert!(!config.reversed);
    }
}
