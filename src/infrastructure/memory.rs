//! In-process implementations of the outbox ports.
//!
//! Used by the relay and processor tests, and handy for running the pipeline
//! without Postgres or Kafka. Cloning shares the underlying state.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::errors::{PublishError, StoreError, WriteError};
use crate::domain::outbox::{EventEnvelope, NewOutboxRecord, OutboxRecord, OutboxStats, OutboxStatus};
use crate::domain::ports::{BusMessage, EventBus, OutboxStore};

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    records: Vec<OutboxRecord>,
    next_id: i64,
}

#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Database("in-memory outbox lock poisoned".to_string()))
    }

    pub fn append<P: Serialize + ?Sized>(
        &self,
        aggregate_type: &str,
        aggregate_id: i64,
        event_type: &str,
        version: i64,
        payload: &P,
    ) -> Result<OutboxRecord, WriteError> {
        let record =
            NewOutboxRecord::prepare(aggregate_type, aggregate_id, event_type, version, payload)?;
        self.insert(record)
    }

    pub fn insert(&self, record: NewOutboxRecord) -> Result<OutboxRecord, WriteError> {
        let mut state = self.state().map_err(|e| WriteError::Store(e.to_string()))?;
        if state.records.iter().any(|r| r.event_id == record.event_id) {
            return Err(WriteError::DuplicateEventId(record.event_id));
        }

        state.next_id += 1;
        let stored = OutboxRecord {
            id: state.next_id,
            event_id: record.event_id,
            aggregate_type: record.aggregate_type,
            aggregate_id: record.aggregate_id,
            event_type: record.event_type,
            payload: record.payload,
            version: record.version,
            occurred_at: record.occurred_at,
            status: OutboxStatus::Ready,
            retry_count: 0,
            published_at: None,
            created_at: Utc::now(),
        };
        state.records.push(stored.clone());
        Ok(stored)
    }

    pub fn get(&self, id: i64) -> Option<OutboxRecord> {
        self.state()
            .ok()
            .and_then(|s| s.records.iter().find(|r| r.id == id).cloned())
    }

    pub fn len(&self) -> usize {
        self.state().map(|s| s.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sorted(mut records: Vec<OutboxRecord>) -> Vec<OutboxRecord> {
        records.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        records
    }

    fn update<T>(
        &self,
        id: i64,
        apply: impl FnOnce(&mut OutboxRecord) -> T,
    ) -> Result<T, StoreError> {
        let mut state = self.state()?;
        let record = state
            .records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StoreError::NotFound(id))?;
        Ok(apply(record))
    }
}

impl OutboxStore for InMemoryOutboxStore {
    fn fetch_eligible(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let eligible: Vec<OutboxRecord> = self
            .state()?
            .records
            .iter()
            .filter(|r| r.is_eligible(max_retries))
            .cloned()
            .collect();
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(Self::sorted(eligible).into_iter().take(limit).collect())
    }

    fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.update(id, |r| {
            r.status = OutboxStatus::Published;
            r.published_at = Some(published_at);
        })
    }

    fn mark_failed(&self, id: i64) -> Result<i32, StoreError> {
        self.update(id, |r| {
            r.status = OutboxStatus::Failed;
            r.retry_count += 1;
            r.retry_count
        })
    }

    fn stats(&self, max_retries: i32) -> Result<OutboxStats, StoreError> {
        let state = self.state()?;
        let mut stats = OutboxStats::default();
        for record in &state.records {
            match record.status {
                OutboxStatus::Ready => stats.ready += 1,
                OutboxStatus::Published => stats.published += 1,
                OutboxStatus::Failed if record.is_parked(max_retries) => stats.parked += 1,
                OutboxStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    fn list_parked(&self, max_retries: i32, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let parked: Vec<OutboxRecord> = self
            .state()?
            .records
            .iter()
            .filter(|r| r.is_parked(max_retries))
            .cloned()
            .collect();
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(Self::sorted(parked).into_iter().take(limit).collect())
    }

    fn find_by_event_id(&self, event_id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        Ok(self
            .state()?
            .records
            .iter()
            .find(|r| r.event_id == event_id)
            .cloned())
    }
}

// ── Bus ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub topic: String,
    pub key: String,
    pub body: Vec<u8>,
}

impl DeliveredMessage {
    pub fn envelope(&self) -> Option<EventEnvelope> {
        serde_json::from_slice(&self.body).ok()
    }
}

#[derive(Debug, Clone, Copy)]
enum Fault {
    Unavailable,
    Timeout,
}

#[derive(Default)]
struct BusState {
    delivered: Vec<DeliveredMessage>,
    faults: VecDeque<Fault>,
    always_fail: bool,
    attempts: usize,
}

/// Records every acknowledged message; failures can be scripted.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, BusState> {
        // A poisoned lock only means a test thread panicked mid-publish; the
        // recorded messages are still meaningful.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` publishes fail as if the broker were unreachable.
    pub fn fail_next(&self, n: usize) {
        self.state().faults.extend(std::iter::repeat(Fault::Unavailable).take(n));
    }

    /// The next `n` publishes are never acknowledged.
    pub fn time_out_next(&self, n: usize) {
        self.state().faults.extend(std::iter::repeat(Fault::Timeout).take(n));
    }

    pub fn set_always_fail(&self, fail: bool) {
        self.state().always_fail = fail;
    }

    pub fn messages(&self) -> Vec<DeliveredMessage> {
        self.state().delivered.clone()
    }

    pub fn attempts(&self) -> usize {
        self.state().attempts
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(&self, message: &BusMessage<'_>, timeout: Duration) -> Result<(), PublishError> {
        let mut state = self.state();
        state.attempts += 1;

        if state.always_fail {
            return Err(PublishError::Unavailable("broker down".to_string()));
        }
        match state.faults.pop_front() {
            Some(Fault::Unavailable) => {
                Err(PublishError::Unavailable("broker down".to_string()))
            }
            Some(Fault::Timeout) => Err(PublishError::Timeout(timeout)),
            None => {
                state.delivered.push(DeliveredMessage {
                    topic: message.topic.to_string(),
                    key: message.key.to_string(),
                    body: message.body.to_vec(),
                });
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn store_rejects_duplicate_event_ids() {
        let store = InMemoryOutboxStore::new();
        let record = NewOutboxRecord::prepare("PART", 1, "PartCreated", 0, &json!({})).unwrap();

        store.insert(record.clone()).unwrap();
        let err = store.insert(record).expect_err("duplicate must be rejected");

        assert!(matches!(err, WriteError::DuplicateEventId(_)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_counts_parked_separately_from_failed() {
        let store = InMemoryOutboxStore::new();
        let a = store.append("PART", 1, "PartCreated", 0, &json!({})).unwrap();
        let b = store.append("PART", 2, "PartCreated", 0, &json!({})).unwrap();
        store.append("PART", 3, "PartCreated", 0, &json!({})).unwrap();

        store.mark_failed(a.id).unwrap();
        store.mark_failed(a.id).unwrap();
        store.mark_failed(b.id).unwrap();

        let stats = store.stats(2).unwrap();
        assert_eq!(stats, OutboxStats { ready: 1, published: 0, failed: 1, parked: 1 });
        assert_eq!(store.list_parked(2, 10).unwrap()[0].id, a.id);
    }

    #[test]
    fn bus_replays_scripted_faults_in_order() {
        let bus = InMemoryEventBus::new();
        bus.fail_next(1);
        bus.time_out_next(1);
        let message = BusMessage { topic: "part-events", key: "1", body: b"{}" };
        let timeout = Duration::from_millis(5);

        assert!(matches!(bus.publish(&message, timeout), Err(PublishError::Unavailable(_))));
        assert!(matches!(bus.publish(&message, timeout), Err(PublishError::Timeout(_))));
        assert!(bus.publish(&message, timeout).is_ok());
        assert_eq!(bus.attempts(), 3);
        assert_eq!(bus.messages().len(), 1);
    }
}
