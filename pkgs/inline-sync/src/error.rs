//! Error types for the sync layer

use inline_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the write path and by conversation handles
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Conversation closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, SyncError>;
