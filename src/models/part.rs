use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::domain::part::Part;
use crate::schema::parts;

#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = parts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PartRow {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub part_unit: Option<String>,
    pub lead_time: Option<i32>,
    pub standard_cost: Option<i64>,
    pub status: String,
    pub deleted: bool,
    pub group_id: Option<i64>,
    pub category_id: Option<i64>,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = parts)]
pub struct NewPartRow<'a> {
    pub code: &'a str,
    pub name: &'a str,
    pub part_unit: Option<&'a str>,
    pub lead_time: Option<i32>,
    pub standard_cost: Option<i64>,
    pub group_id: Option<i64>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Default, AsChangeset)]
#[diesel(table_name = parts)]
pub struct PartChangeset {
    pub name: Option<String>,
    pub part_unit: Option<String>,
    pub lead_time: Option<i32>,
    pub standard_cost: Option<i64>,
    pub status: Option<String>,
    pub deleted: Option<bool>,
    pub version: Option<i64>,
}

impl From<PartRow> for Part {
    fn from(row: PartRow) -> Self {
        Part {
            id: row.id,
            code: row.code,
            name: row.name,
            part_unit: row.part_unit,
            lead_time: row.lead_time,
            standard_cost: row.standard_cost,
            status: row.status,
            deleted: row.deleted,
            group_id: row.group_id,
            category_id: row.category_id,
            version: row.version,
            created_at: row.created_at,
        }
    }
}
