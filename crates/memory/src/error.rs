//! Error types for the memory crate.
//!
//! Only the write path and explicit compatibility checks return errors.
//! Retrieval, ranking, traversal and assembly degrade instead.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::RecordKind;

/// A record rejected at the store-write boundary. Never stored.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("record id must not be empty")]
    EmptyId,

    #[error("record '{id}' ({kind}) has no primary content")]
    MissingContent { id: String, kind: RecordKind },

    #[error("fact record '{id}' has an empty fact")]
    EmptyFact { id: String },

    #[error(
        "record '{id}' is not atomic: {chars} chars / {newlines} newlines \
         (limit {max_chars} chars / {max_newlines} newlines)"
    )]
    NonAtomic {
        id: String,
        chars: usize,
        newlines: usize,
        max_chars: usize,
        max_newlines: usize,
    },

    #[error("record '{id}' timestamp {timestamp} is after its ingestion time {ingested_at}")]
    TimestampAfterIngestion {
        id: String,
        timestamp: DateTime<Utc>,
        ingested_at: DateTime<Utc>,
    },

    #[error("record '{id}' carries an empty embedding")]
    EmptyEmbedding { id: String },

    #[error("record '{id}' embedding contains non-finite values")]
    NonFiniteEmbedding { id: String },

    #[error("record '{id}' has a relationship with an empty target id")]
    EmptyRelationshipTarget { id: String },
}

/// Errors from the memory store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Conflict: record '{id}' already exists with different content")]
    Conflict { id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A classifier could not handle one record. The assembler degrades that
/// record to `Other` with no artifacts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("record '{id}' has no text to classify")]
    NoText { id: String },

    #[error("classifier failed on record '{id}': {reason}")]
    Failed { id: String, reason: String },
}
