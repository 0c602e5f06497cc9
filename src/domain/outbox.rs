use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::errors::WriteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Ready,
    Published,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Ready => "READY",
            OutboxStatus::Published => "PUBLISHED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY" => Ok(OutboxStatus::Ready),
            "PUBLISHED" => Ok(OutboxStatus::Published),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(format!("unknown outbox status '{}'", other)),
        }
    }
}

/// A stored outbox row.
///
/// Only `status`, `retry_count` and `published_at` ever change after insert,
/// and only through the relay.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub id: i64,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub event_type: String,
    pub payload: Value,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub retry_count: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Whether the relay may still select this record.
    pub fn is_eligible(&self, max_retries: i32) -> bool {
        match self.status {
            OutboxStatus::Ready => true,
            OutboxStatus::Failed => self.retry_count < max_retries,
            OutboxStatus::Published => false,
        }
    }

    /// Failed on every allowed attempt; waits for manual intervention.
    pub fn is_parked(&self, max_retries: i32) -> bool {
        self.status == OutboxStatus::Failed && self.retry_count >= max_retries
    }
}

/// An event that has been validated and serialized, ready to insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxRecord {
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub event_type: String,
    pub payload: Value,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
}

impl NewOutboxRecord {
    /// Serialize `payload` and stamp a fresh event id and occurrence time.
    ///
    /// Nothing is written here; a serialization failure leaves the caller free
    /// to abort its transaction before any row exists.
    pub fn prepare<P: Serialize + ?Sized>(
        aggregate_type: &str,
        aggregate_id: i64,
        event_type: &str,
        version: i64,
        payload: &P,
    ) -> Result<Self, WriteError> {
        if aggregate_type.trim().is_empty() {
            return Err(WriteError::InvalidInput("aggregate type is empty".to_string()));
        }
        if event_type.trim().is_empty() {
            return Err(WriteError::InvalidInput("event type is empty".to_string()));
        }
        let payload = serde_json::to_value(payload).map_err(WriteError::Serialization)?;

        Ok(Self {
            event_id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
            event_type: event_type.to_string(),
            payload,
            version,
            occurred_at: Utc::now(),
        })
    }
}

/// The message body published to the bus, one JSON object per message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: String,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub payload: Value,
}

impl EventEnvelope {
    /// Envelope for `record` carrying an already decoded payload.
    pub fn for_record(record: &OutboxRecord, payload: Value) -> Self {
        Self {
            event_id: record.event_id,
            event_type: record.event_type.clone(),
            version: record.version,
            occurred_at: record.occurred_at,
            payload,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// Counts of outbox records per operational state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxStats {
    pub ready: i64,
    pub published: i64,
    /// Failed but still under the retry cap.
    pub failed: i64,
    pub parked: i64,
}
