use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::DatabaseErrorKind;

use crate::db::DbPool;
use crate::domain::errors::DomainError;
use crate::domain::events::{aggregate, event_type};
use crate::domain::part::{NewPart, Part, PartChanges};
use crate::domain::ports::PartRepository;
use crate::infrastructure::outbox_repo::{append, append_once};
use crate::models::part::{NewPartRow, PartChangeset, PartRow};
use crate::schema::parts;

// ── Error conversions (infrastructure concern only) ──────────────────────────

impl From<diesel::result::Error> for DomainError {
    fn from(e: diesel::result::Error) -> Self {
        match e {
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                DomainError::InvalidInput(info.message().to_string())
            }
            other => DomainError::Internal(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for DomainError {
    fn from(e: r2d2::Error) -> Self {
        DomainError::Internal(e.to_string())
    }
}

// ── Repository ────────────────────────────────────────────────────────────────

/// Parts table access. Every change records its event in the same transaction.
#[derive(Clone)]
pub struct DieselPartRepository {
    pool: DbPool,
}

impl DieselPartRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Record a `PartCreated` event for every part that has none yet.
    ///
    /// Returns the number of events recorded. Safe to run repeatedly.
    pub fn backfill_part_events(&self) -> Result<usize, DomainError> {
        let mut conn = self.pool.get()?;

        let rows = parts::table
            .order(parts::id.asc())
            .select(PartRow::as_select())
            .load::<PartRow>(&mut conn)?;

        let mut recorded = 0;
        for part in rows.into_iter().map(Part::from) {
            let inserted = conn.transaction::<_, DomainError, _>(|conn| {
                Ok(append_once(
                    conn,
                    aggregate::PART,
                    part.id,
                    event_type::PART_CREATED,
                    part.version,
                    &part.to_payload(),
                )?)
            })?;
            if inserted.is_some() {
                recorded += 1;
            }
        }

        log::info!("Backfilled {} part events", recorded);
        Ok(recorded)
    }
}

/// Explains why a versioned update matched no row.
fn missing_or_conflict(conn: &mut PgConnection, id: i64, expected: i64) -> DomainError {
    let current = parts::table
        .filter(parts::id.eq(id))
        .filter(parts::deleted.eq(false))
        .select(parts::version)
        .first::<i64>(conn)
        .optional();

    match current {
        Ok(Some(actual)) => DomainError::Conflict { expected, actual },
        Ok(None) => DomainError::NotFound,
        Err(e) => e.into(),
    }
}

fn apply_versioned(
    conn: &mut PgConnection,
    id: i64,
    expected_version: i64,
    changes: PartChangeset,
) -> Result<Part, DomainError> {
    let row = diesel::update(
        parts::table
            .filter(parts::id.eq(id))
            .filter(parts::version.eq(expected_version))
            .filter(parts::deleted.eq(false)),
    )
    .set(&PartChangeset {
        version: Some(expected_version + 1),
        ..changes
    })
    .returning(PartRow::as_returning())
    .get_result::<PartRow>(conn)
    .optional()?;

    match row {
        Some(row) => Ok(Part::from(row)),
        None => Err(missing_or_conflict(conn, id, expected_version)),
    }
}

impl PartRepository for DieselPartRepository {
    fn create(&self, part: NewPart) -> Result<Part, DomainError> {
        if part.code.trim().is_empty() || part.name.trim().is_empty() {
            return Err(DomainError::InvalidInput(
                "part code and name are required".to_string(),
            ));
        }
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let created: Part = diesel::insert_into(parts::table)
                .values(&NewPartRow {
                    code: &part.code,
                    name: &part.name,
                    part_unit: part.part_unit.as_deref(),
                    lead_time: part.lead_time,
                    standard_cost: part.standard_cost,
                    group_id: part.group_id,
                    category_id: part.category_id,
                })
                .returning(PartRow::as_returning())
                .get_result::<PartRow>(conn)?
                .into();

            append(
                conn,
                aggregate::PART,
                created.id,
                event_type::PART_CREATED,
                created.version,
                &created.to_payload(),
            )?;

            Ok(created)
        })
    }

    fn update(
        &self,
        id: i64,
        expected_version: i64,
        changes: PartChanges,
    ) -> Result<Part, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let updated = apply_versioned(
                conn,
                id,
                expected_version,
                PartChangeset {
                    name: changes.name,
                    part_unit: changes.part_unit,
                    lead_time: changes.lead_time,
                    standard_cost: changes.standard_cost,
                    status: changes.status,
                    ..PartChangeset::default()
                },
            )?;

            append(
                conn,
                aggregate::PART,
                updated.id,
                event_type::PART_UPDATED,
                updated.version,
                &updated.to_payload(),
            )?;

            Ok(updated)
        })
    }

    fn delete(&self, id: i64, expected_version: i64) -> Result<Part, DomainError> {
        let mut conn = self.pool.get()?;

        conn.transaction::<_, DomainError, _>(|conn| {
            let deleted = apply_versioned(
                conn,
                id,
                expected_version,
                PartChangeset {
                    deleted: Some(true),
                    ..PartChangeset::default()
                },
            )?;

            append(
                conn,
                aggregate::PART,
                deleted.id,
                event_type::PART_DELETED,
                deleted.version,
                &deleted.to_payload(),
            )?;

            Ok(deleted)
        })
    }

    fn find_by_id(&self, id: i64) -> Result<Option<Part>, DomainError> {
        let mut conn = self.pool.get()?;

        let row = parts::table
            .filter(parts::id.eq(id))
            .select(PartRow::as_select())
            .first::<PartRow>(&mut conn)
            .optional()?;

        Ok(row.map(Part::from))
    }
}
