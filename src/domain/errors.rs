use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failure to record an event. Fatal to the enclosing business transaction.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("Failed to serialize event payload: {0}")]
    Serialization(#[source] serde_json::Error),
    #[error("Invalid event: {0}")]
    InvalidInput(String),
    #[error("Duplicate event id: {0}")]
    DuplicateEventId(Uuid),
    #[error("Outbox write failed: {0}")]
    Store(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Outbox record {0} not found")]
    NotFound(i64),
    #[error("Corrupt outbox record {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Unknown aggregate type: {0}")]
    UnknownAggregateType(String),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("No acknowledgement within {0:?}")]
    Timeout(Duration),
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
    #[error("Send rejected: {0}")]
    Rejected(String),
    #[error("Could not build event envelope: {0}")]
    Envelope(String),
}

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Part not found")]
    NotFound,
    #[error("Version conflict: expected {expected}, found {actual}")]
    Conflict { expected: i64, actual: i64 },
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Outbox(#[from] WriteError),
    #[error("Internal error: {0}")]
    Internal(String),
}
