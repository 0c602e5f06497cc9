use chrono::{DateTime, Utc};
use diesel::connection::{AnsiTransactionManager, TransactionManager};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;
use serde::Serialize;
use uuid::Uuid;

use crate::db::DbPool;
use crate::domain::errors::{StoreError, WriteError};
use crate::domain::outbox::{NewOutboxRecord, OutboxRecord, OutboxStats, OutboxStatus};
use crate::domain::ports::OutboxStore;
use crate::models::outbox::{NewOutboxEventRow, OutboxEventRow};
use crate::schema::outbox_events;

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<diesel::result::Error> for StoreError {
    fn from(e: diesel::result::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<diesel::result::Error> for WriteError {
    fn from(e: diesel::result::Error) -> Self {
        WriteError::Store(e.to_string())
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Record an event as part of the caller's open transaction.
///
/// The row only becomes visible to the relay once that transaction commits,
/// and any error returned here must abort it.
pub fn append<P: Serialize + ?Sized>(
    conn: &mut PgConnection,
    aggregate_type: &str,
    aggregate_id: i64,
    event_type: &str,
    version: i64,
    payload: &P,
) -> Result<OutboxRecord, WriteError> {
    let record =
        NewOutboxRecord::prepare(aggregate_type, aggregate_id, event_type, version, payload)?;
    insert(conn, &record)
}

/// Like [`append`], but a no-op when the aggregate already has any outbox
/// record. Used to backfill events for pre-existing master data.
pub fn append_once<P: Serialize + ?Sized>(
    conn: &mut PgConnection,
    aggregate_type: &str,
    aggregate_id: i64,
    event_type: &str,
    version: i64,
    payload: &P,
) -> Result<Option<OutboxRecord>, WriteError> {
    let exists: bool = diesel::select(diesel::dsl::exists(
        outbox_events::table
            .filter(outbox_events::aggregate_type.eq(aggregate_type))
            .filter(outbox_events::aggregate_id.eq(aggregate_id)),
    ))
    .get_result(conn)?;

    if exists {
        return Ok(None);
    }
    append(conn, aggregate_type, aggregate_id, event_type, version, payload).map(Some)
}

/// Insert an already prepared record. Must run inside a transaction.
pub fn insert(conn: &mut PgConnection, record: &NewOutboxRecord) -> Result<OutboxRecord, WriteError> {
    let depth = AnsiTransactionManager::transaction_manager_status_mut(conn).transaction_depth()?;
    if depth.is_none() {
        return Err(WriteError::InvalidInput(
            "outbox append must run inside the caller's transaction".to_string(),
        ));
    }

    let row = diesel::insert_into(outbox_events::table)
        .values(NewOutboxEventRow::from(record))
        .returning(OutboxEventRow::as_returning())
        .get_result::<OutboxEventRow>(conn)
        .map_err(|e| match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                WriteError::DuplicateEventId(record.event_id)
            }
            other => WriteError::from(other),
        })?;

    log::debug!(
        "Recorded outbox event {} {} for {}#{}",
        record.event_type,
        record.event_id,
        record.aggregate_type,
        record.aggregate_id
    );

    OutboxRecord::try_from(row).map_err(|e| WriteError::Store(e.to_string()))
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DieselOutboxStore {
    pool: DbPool,
}

impl DieselOutboxStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn into_records(rows: Vec<OutboxEventRow>) -> Result<Vec<OutboxRecord>, StoreError> {
    rows.into_iter().map(OutboxRecord::try_from).collect()
}

impl OutboxStore for DieselOutboxStore {
    fn fetch_eligible(
        &self,
        limit: i64,
        max_retries: i32,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut conn = self.pool.get()?;

        let rows = outbox_events::table
            .filter(
                outbox_events::status.eq(OutboxStatus::Ready.as_str()).or(outbox_events::status
                    .eq(OutboxStatus::Failed.as_str())
                    .and(outbox_events::retry_count.lt(max_retries))),
            )
            .order((outbox_events::created_at.asc(), outbox_events::id.asc()))
            .limit(limit)
            .select(OutboxEventRow::as_select())
            .load(&mut conn)?;

        into_records(rows)
    }

    fn mark_published(&self, id: i64, published_at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, StoreError, _>(|conn| {
            let updated = diesel::update(outbox_events::table.find(id))
                .set((
                    outbox_events::status.eq(OutboxStatus::Published.as_str()),
                    outbox_events::published_at.eq(Some(published_at)),
                ))
                .execute(conn)?;
            if updated == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(())
        })
    }

    fn mark_failed(&self, id: i64) -> Result<i32, StoreError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, StoreError, _>(|conn| {
            diesel::update(outbox_events::table.find(id))
                .set((
                    outbox_events::status.eq(OutboxStatus::Failed.as_str()),
                    outbox_events::retry_count.eq(outbox_events::retry_count + 1),
                ))
                .returning(outbox_events::retry_count)
                .get_result::<i32>(conn)
                .optional()?
                .ok_or(StoreError::NotFound(id))
        })
    }

    fn stats(&self, max_retries: i32) -> Result<OutboxStats, StoreError> {
        let mut conn = self.pool.get()?;

        // Both counts must come from one snapshot or `failed - parked` drifts.
        conn.build_transaction()
            .repeatable_read()
            .read_only()
            .run::<_, StoreError, _>(|conn| {
                let counts: Vec<(String, i64)> = outbox_events::table
                    .group_by(outbox_events::status)
                    .select((outbox_events::status, diesel::dsl::count_star()))
                    .load(conn)?;

                let parked: i64 = outbox_events::table
                    .filter(outbox_events::status.eq(OutboxStatus::Failed.as_str()))
                    .filter(outbox_events::retry_count.ge(max_retries))
                    .count()
                    .get_result(conn)?;

                let mut stats = OutboxStats {
                    parked,
                    ..OutboxStats::default()
                };
                for (status, count) in counts {
                    match status.parse::<OutboxStatus>() {
                        Ok(OutboxStatus::Ready) => stats.ready = count,
                        Ok(OutboxStatus::Published) => stats.published = count,
                        Ok(OutboxStatus::Failed) => stats.failed = count - parked,
                        Err(reason) => log::warn!("Ignoring {} outbox rows: {}", count, reason),
                    }
                }
                Ok(stats)
            })
    }

    fn list_parked(&self, max_retries: i32, limit: i64) -> Result<Vec<OutboxRecord>, StoreError> {
        let mut conn = self.pool.get()?;

        let rows = outbox_events::table
            .filter(outbox_events::status.eq(OutboxStatus::Failed.as_str()))
            .filter(outbox_events::retry_count.ge(max_retries))
            .order((outbox_events::created_at.asc(), outbox_events::id.asc()))
            .limit(limit)
            .select(OutboxEventRow::as_select())
            .load(&mut conn)?;

        into_records(rows)
    }

    fn find_by_event_id(&self, event_id: Uuid) -> Result<Option<OutboxRecord>, StoreError> {
        let mut conn = self.pool.get()?;

        outbox_events::table
            .filter(outbox_events::event_id.eq(event_id))
            .select(OutboxEventRow::as_select())
            .first::<OutboxEventRow>(&mut conn)
            .optional()?
            .map(OutboxRecord::try_from)
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use diesel::prelude::*;
    use serde::ser::{Error as _, Serializer};
    use serde::Serialize;
    use serde_json::json;

    use super::{append, append_once, insert, DieselOutboxStore};
    use crate::domain::errors::WriteError;
    use crate::domain::outbox::{NewOutboxRecord, OutboxStatus};
    use crate::domain::ports::OutboxStore;
    use crate::infrastructure::test_support::setup_db;
    use crate::schema::{outbox_events, parts};

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("forced failure"))
        }
    }

    fn count_rows(pool: &crate::db::DbPool) -> (i64, i64) {
        let mut conn = pool.get().expect("Failed to get connection");
        let outbox: i64 = outbox_events::table.count().get_result(&mut conn).unwrap();
        let parts: i64 = parts::table.count().get_result(&mut conn).unwrap();
        (outbox, parts)
    }

    fn append_n(pool: &crate::db::DbPool, aggregate_type: &str, n: i64) -> Vec<i64> {
        let mut conn = pool.get().expect("Failed to get connection");
        (0..n)
            .map(|i| {
                conn.transaction::<_, WriteError, _>(|conn| {
                    append(conn, aggregate_type, i, "PartCreated", 0, &json!({ "partId": i }))
                })
                .expect("append failed")
                .id
            })
            .collect()
    }

    #[tokio::test]
    async fn append_inserts_ready_record_after_commit() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().unwrap();

        let record = conn
            .transaction::<_, WriteError, _>(|conn| {
                append(conn, "PART", 42, "PartCreated", 3, &json!({ "partId": 42 }))
            })
            .expect("append failed");

        assert_eq!(record.status, OutboxStatus::Ready);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.version, 3);
        assert!(record.published_at.is_none());

        let store = DieselOutboxStore::new(pool.clone());
        let found = store.find_by_event_id(record.event_id).unwrap().expect("record exists");
        assert_eq!(found.id, record.id);
        assert!(store.find_by_event_id(uuid::Uuid::new_v4()).unwrap().is_none());

        let eligible = store.fetch_eligible(10, 5).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].event_id, record.event_id);
    }

    #[tokio::test]
    async fn append_outside_transaction_is_rejected() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().unwrap();

        let err = append(&mut conn, "PART", 1, "PartCreated", 0, &json!({}))
            .expect_err("append without transaction must fail");

        assert!(matches!(err, WriteError::InvalidInput(_)));
        assert_eq!(count_rows(&pool).0, 0);
    }

    #[tokio::test]
    async fn serialization_failure_rolls_back_business_change() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().unwrap();

        let result = conn.transaction::<_, WriteError, _>(|conn| {
            diesel::insert_into(parts::table)
                .values((parts::code.eq("P-001"), parts::name.eq("Bracket")))
                .execute(conn)?;
            append(conn, "PART", 1, "PartCreated", 0, &Unserializable)
        });

        assert!(matches!(result, Err(WriteError::Serialization(_))));
        assert_eq!(count_rows(&pool), (0, 0), "neither event nor part may persist");
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().unwrap();
        let record = NewOutboxRecord::prepare("PART", 1, "PartCreated", 0, &json!({})).unwrap();

        conn.transaction::<_, WriteError, _>(|conn| insert(conn, &record))
            .expect("first insert failed");
        let err = conn
            .transaction::<_, WriteError, _>(|conn| insert(conn, &record))
            .expect_err("second insert must fail");

        assert!(matches!(err, WriteError::DuplicateEventId(id) if id == record.event_id));
        assert_eq!(count_rows(&pool).0, 1);
    }

    #[tokio::test]
    async fn fetch_eligible_returns_oldest_batch_first() {
        let (_container, pool) = setup_db().await;
        let ids = append_n(&pool, "PART", 15);
        let store = DieselOutboxStore::new(pool);

        let batch = store.fetch_eligible(10, 5).unwrap();

        let fetched: Vec<i64> = batch.iter().map(|r| r.id).collect();
        assert_eq!(fetched, ids[..10].to_vec());
    }

    #[tokio::test]
    async fn records_from_one_transaction_keep_insertion_order() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().unwrap();

        let (first, second) = conn
            .transaction::<_, WriteError, _>(|conn| {
                let e1 = append(conn, "PART", 9, "PartCreated", 0, &json!({}))?;
                let e2 = append(conn, "PART", 9, "PartUpdated", 1, &json!({}))?;
                Ok((e1, e2))
            })
            .unwrap();

        assert!(first.created_at <= second.created_at);
        let batch = DieselOutboxStore::new(pool).fetch_eligible(10, 5).unwrap();
        assert_eq!(batch[0].event_id, first.event_id);
        assert_eq!(batch[1].event_id, second.event_id);
    }

    #[tokio::test]
    async fn failed_records_are_parked_at_retry_cap() {
        let (_container, pool) = setup_db().await;
        let id = append_n(&pool, "UNKNOWN", 1)[0];
        let store = DieselOutboxStore::new(pool);

        assert_eq!(store.mark_failed(id).unwrap(), 1);
        assert_eq!(store.fetch_eligible(10, 2).unwrap().len(), 1);
        assert_eq!(store.mark_failed(id).unwrap(), 2);
        assert!(store.fetch_eligible(10, 2).unwrap().is_empty());

        let parked = store.list_parked(2, 50).unwrap();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].status, OutboxStatus::Failed);
        assert_eq!(parked[0].retry_count, 2);

        let stats = store.stats(2).unwrap();
        assert_eq!((stats.ready, stats.failed, stats.parked), (0, 0, 1));
    }

    #[tokio::test]
    async fn stats_stay_consistent_while_records_are_failing() {
        let (_container, pool) = setup_db().await;
        let ids = append_n(&pool, "PART", 20);
        let store = DieselOutboxStore::new(pool);

        let writer = {
            let store = store.clone();
            let ids = ids.clone();
            std::thread::spawn(move || {
                for _ in 0..3 {
                    for id in &ids {
                        store.mark_failed(*id).unwrap();
                    }
                }
            })
        };

        while !writer.is_finished() {
            let stats = store.stats(2).unwrap();
            assert!(stats.failed >= 0, "failed went negative: {stats:?}");
            assert_eq!(stats.ready + stats.failed + stats.parked, 20, "{stats:?}");
        }
        writer.join().unwrap();

        let stats = store.stats(2).unwrap();
        assert_eq!((stats.ready, stats.failed, stats.parked), (0, 0, 20));
    }

    #[tokio::test]
    async fn mark_published_sets_timestamp_and_removes_from_selection() {
        let (_container, pool) = setup_db().await;
        let ids = append_n(&pool, "PART", 2);
        let store = DieselOutboxStore::new(pool);

        store.mark_published(ids[0], chrono::Utc::now()).unwrap();

        let batch = store.fetch_eligible(10, 5).unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, ids[1]);
        let stats = store.stats(5).unwrap();
        assert_eq!((stats.ready, stats.published), (1, 1));
    }

    #[tokio::test]
    async fn status_updates_for_missing_rows_report_not_found() {
        let (_container, pool) = setup_db().await;
        let store = DieselOutboxStore::new(pool);

        assert!(store.mark_published(999, chrono::Utc::now()).is_err());
        assert!(store.mark_failed(999).is_err());
    }

    #[tokio::test]
    async fn append_once_skips_aggregates_with_existing_events() {
        let (_container, pool) = setup_db().await;
        let mut conn = pool.get().unwrap();

        let first = conn
            .transaction::<_, WriteError, _>(|conn| {
                append_once(conn, "PART", 5, "PartCreated", 0, &json!({}))
            })
            .unwrap();
        let second = conn
            .transaction::<_, WriteError, _>(|conn| {
                append_once(conn, "PART", 5, "PartCreated", 0, &json!({}))
            })
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(count_rows(&pool).0, 1);
    }
}
