//! Error types for store operations

use crate::types::MessageKey;
use sea_orm::DbErr;
use thiserror::Error;

/// Errors that can occur while reading or writing messages
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
    #[error("Invalid timestamp in row: {0}")]
    InvalidTimestamp(i64),
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
    #[error("Message not found: {0:?}")]
    NotFound(MessageKey),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
