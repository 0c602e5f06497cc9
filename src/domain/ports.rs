use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::errors::{DomainError, PublishError, StoreError};
use super::outbox::{OutboxRecord, OutboxStats};
use super::part::{NewPart, Part, PartChanges};

/// Relay-side access to the outbox table.
///
/// Every mutating call runs in its own transaction, so one record's status
/// update never shares fate with another's.
pub trait OutboxStore: Send + Sync + 'static {
    /// Up to `limit` records that are `READY`, or `FAILED` with
    /// `retry_count < max_retries`, oldest first.
    fn fetch_eligible(&self, limit: i64, max_retries: i32)
        -> Result<Vec<OutboxRecord>, StoreError>;

    fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Marks the record `FAILED` and returns its incremented retry count.
    fn mark_failed(&self, id: i64) -> Result<i32, StoreError>;

    fn stats(&self, max_retries: i32) -> Result<OutboxStats, StoreError>;

    /// Records that exhausted their retries, oldest first.
    fn list_parked(&self, max_retries: i32, limit: i64) -> Result<Vec<OutboxRecord>, StoreError>;

    fn find_by_event_id(&self, event_id: Uuid) -> Result<Option<OutboxRecord>, StoreError>;
}

/// A message ready to go out on the bus.
#[derive(Debug, Clone, Copy)]
pub struct BusMessage<'a> {
    pub topic: &'a str,
    /// Ordering / partition key.
    pub key: &'a str,
    pub body: &'a [u8],
}

pub trait EventBus: Send + Sync + 'static {
    /// Send `message` and block until the broker acknowledges it or `timeout`
    /// elapses.
    fn publish(&self, message: &BusMessage<'_>, timeout: Duration) -> Result<(), PublishError>;
}

pub trait PartRepository: Send + Sync + 'static {
    fn create(&self, part: NewPart) -> Result<Part, DomainError>;
    fn update(&self, id: i64, expected_version: i64, changes: PartChanges)
        -> Result<Part, DomainError>;
    fn delete(&self, id: i64, expected_version: i64) -> Result<Part, DomainError>;
    fn find_by_id(&self, id: i64) -> Result<Option<Part>, DomainError>;
}
