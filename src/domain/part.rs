use chrono::{DateTime, Utc};

use super::events::PartPayload;

#[derive(Debug, Clone)]
pub struct NewPart {
    pub code: String,
    pub name: String,
    pub part_unit: Option<String>,
    pub lead_time: Option<i32>,
    pub standard_cost: Option<i64>,
    pub group_id: Option<i64>,
    pub category_id: Option<i64>,
}

/// Fields an update may change; `None` leaves the column as is.
#[derive(Debug, Clone, Default)]
pub struct PartChanges {
    pub name: Option<String>,
    pub part_unit: Option<String>,
    pub lead_time: Option<i32>,
    pub standard_cost: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Part {
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
    /// Optimistic concurrency counter, bumped on every change.
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl Part {
    pub fn to_payload(&self) -> PartPayload {
        PartPayload {
            part_id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            part_unit: self.part_unit.clone(),
            base_quantity: None,
            lead_time: self.lead_time,
            standard_quantity: None,
            status: self.status.clone(),
            deleted: self.deleted,
            group_id: self.group_id,
            category_id: self.category_id,
            standard_cost: self.standard_cost,
            standard_total_cost: None,
        }
    }
}
