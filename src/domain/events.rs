//! Aggregate tags, event names and payload shapes of the master-data events.
//!
//! Payload fields use camelCase on the wire to match what downstream
//! consumers already read.

use serde::{Deserialize, Serialize};

pub mod aggregate {
    pub const PART: &str = "PART";
    pub const PART_GROUP: &str = "PART_GROUP";
    pub const PART_CATEGORY: &str = "PART_CATEGORY";
    pub const MATERIAL: &str = "MATERIAL";
    pub const MATERIAL_CATEGORY: &str = "MATERIAL_CATEGORY";
    pub const BOM: &str = "BOM";
}

pub mod event_type {
    pub const PART_CREATED: &str = "PartCreated";
    pub const PART_UPDATED: &str = "PartUpdated";
    pub const PART_DELETED: &str = "PartDeleted";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartPayload {
    pub part_id: i64,
    pub code: String,
    pub name: String,
    pub part_unit: Option<String>,
    pub base_quantity: Option<i32>,
    pub lead_time: Option<i32>,
    pub standard_quantity: Option<i32>,
    pub status: String,
    pub deleted: bool,
    pub group_id: Option<i64>,
    pub category_id: Option<i64>,
    pub standard_cost: Option<i64>,
    pub standard_total_cost: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartGroupPayload {
    pub group_id: i64,
    pub group_name: String,
    pub group_code: String,
    pub category_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartCategoryPayload {
    pub category_id: i64,
    pub category_name: String,
    pub category_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialPayload {
    pub material_id: i64,
    pub material_code: String,
    pub name: String,
    pub material_unit: Option<String>,
    pub base_quantity: Option<i32>,
    pub standard_quantity: Option<i32>,
    pub lead_time: Option<i32>,
    #[serde(default)]
    pub deleted: bool,
    pub material_category_id: Option<i64>,
    pub standard_cost: Option<i64>,
    pub standard_total_cost: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaterialCategoryPayload {
    pub category_id: i64,
    pub name: String,
    pub code: String,
    #[serde(default)]
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomPayload {
    pub bom_id: i64,
    pub part_id: i64,
    pub part_code: String,
    pub part_name: String,
    pub status: String,
    pub complexity: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub materials: Vec<BomMaterialLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BomMaterialLine {
    pub material_id: i64,
    pub material_name: String,
    pub material_code: String,
    pub unit: Option<String>,
    pub quantity: i64,
}
