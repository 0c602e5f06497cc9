use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use uuid::Uuid;

use crate::domain::errors::StoreError;
use crate::domain::outbox::{NewOutboxRecord, OutboxRecord, OutboxStatus};
use crate::schema::outbox_events;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = outbox_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEventRow {
    pub id: i64,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: i64,
    pub event_type: String,
    pub payload: Value,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
    pub status: String,
    pub retry_count: i32,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Insert shape. `status`, `retry_count` and `created_at` take their column
/// defaults (`READY`, 0, clock time).
#[derive(Debug, Insertable)]
#[diesel(table_name = outbox_events)]
pub struct NewOutboxEventRow<'a> {
    pub event_id: Uuid,
    pub aggregate_type: &'a str,
    pub aggregate_id: i64,
    pub event_type: &'a str,
    pub payload: &'a Value,
    pub version: i64,
    pub occurred_at: DateTime<Utc>,
}

impl<'a> From<&'a NewOutboxRecord> for NewOutboxEventRow<'a> {
    fn from(r: &'a NewOutboxRecord) -> Self {
        Self {
            event_id: r.event_id,
            aggregate_type: &r.aggregate_type,
            aggregate_id: r.aggregate_id,
            event_type: &r.event_type,
            payload: &r.payload,
            version: r.version,
            occurred_at: r.occurred_at,
        }
    }
}

impl TryFrom<OutboxEventRow> for OutboxRecord {
    type Error = StoreError;

    fn try_from(row: OutboxEventRow) -> Result<Self, Self::Error> {
        let status: OutboxStatus = row
            .status
            .parse()
            .map_err(|reason| StoreError::Corrupt { id: row.id, reason })?;

        Ok(OutboxRecord {
            id: row.id,
            event_id: row.event_id,
            aggregate_type: row.aggregate_type,
            aggregate_id: row.aggregate_id,
            event_type: row.event_type,
            payload: row.payload,
            version: row.version,
            occurred_at: row.occurred_at,
            status,
            retry_count: row.retry_count,
            published_at: row.published_at,
            created_at: row.created_at,
        })
    }
}
