//! Routing table from aggregate tag to bus topic and envelope builder.

use std::collections::HashMap;
use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::errors::{PublishError, ResolutionError};
use crate::domain::events::{
    aggregate, BomPayload, MaterialCategoryPayload, MaterialPayload, PartCategoryPayload,
    PartGroupPayload, PartPayload,
};
use crate::domain::outbox::{EventEnvelope, OutboxRecord};

/// Rebuilds the outward envelope from a stored record.
pub trait EnvelopeBuilder: Send + Sync {
    fn build(&self, record: &OutboxRecord) -> Result<EventEnvelope, PublishError>;
}

/// Passes the stored JSON through untouched.
pub struct RawPayload;

impl EnvelopeBuilder for RawPayload {
    fn build(&self, record: &OutboxRecord) -> Result<EventEnvelope, PublishError> {
        Ok(EventEnvelope::for_record(record, record.payload.clone()))
    }
}

/// Decodes the stored JSON as `P` before wrapping it, so a payload that no
/// longer matches its aggregate's shape fails here instead of downstream.
pub struct TypedPayload<P>(PhantomData<fn() -> P>);

impl<P> TypedPayload<P> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<P> Default for TypedPayload<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: DeserializeOwned + Serialize> EnvelopeBuilder for TypedPayload<P> {
    fn build(&self, record: &OutboxRecord) -> Result<EventEnvelope, PublishError> {
        let decoded: P = serde_json::from_value(record.payload.clone()).map_err(|e| {
            PublishError::Envelope(format!(
                "{} payload of event {} does not decode: {}",
                record.aggregate_type, record.event_id, e
            ))
        })?;
        let payload =
            serde_json::to_value(decoded).map_err(|e| PublishError::Envelope(e.to_string()))?;
        Ok(EventEnvelope::for_record(record, payload))
    }
}

pub struct Route {
    topic: String,
    builder: Box<dyn EnvelopeBuilder>,
}

impl Route {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn build_envelope(&self, record: &OutboxRecord) -> Result<EventEnvelope, PublishError> {
        self.builder.build(record)
    }
}

#[derive(Default)]
pub struct DispatchRegistry {
    routes: HashMap<String, Route>,
}

impl DispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the route for `aggregate_type`.
    pub fn register(
        mut self,
        aggregate_type: impl Into<String>,
        topic: impl Into<String>,
        builder: impl EnvelopeBuilder + 'static,
    ) -> Self {
        self.routes.insert(
            aggregate_type.into(),
            Route {
                topic: topic.into(),
                builder: Box::new(builder),
            },
        );
        self
    }

    pub fn resolve(&self, aggregate_type: &str) -> Result<&Route, ResolutionError> {
        self.routes
            .get(aggregate_type)
            .ok_or_else(|| ResolutionError::UnknownAggregateType(aggregate_type.to_string()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes for every master-data aggregate this service emits.
    pub fn master_data() -> Self {
        Self::new()
            .register(aggregate::PART, "part-events", TypedPayload::<PartPayload>::new())
            .register(
                aggregate::PART_GROUP,
                "part-group-events",
                TypedPayload::<PartGroupPayload>::new(),
            )
            .register(
                aggregate::PART_CATEGORY,
                "part-category-events",
                TypedPayload::<PartCategoryPayload>::new(),
            )
            .register(
                aggregate::MATERIAL,
                "material-events",
                TypedPayload::<MaterialPayload>::new(),
            )
            .register(
                aggregate::MATERIAL_CATEGORY,
                "material-category-events",
                TypedPayload::<MaterialCategoryPayload>::new(),
            )
            .register(aggregate::BOM, "bom-events", TypedPayload::<BomPayload>::new())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::*;
    use crate::domain::outbox::OutboxStatus;

    fn record(aggregate_type: &str, payload: Value) -> OutboxRecord {
        OutboxRecord {
            id: 1,
            event_id: Uuid::new_v4(),
            aggregate_type: aggregate_type.to_string(),
            aggregate_id: 12,
            event_type: "SomethingHappened".to_string(),
            payload,
            version: 4,
            occurred_at: Utc::now(),
            status: OutboxStatus::Ready,
            retry_count: 0,
            published_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn master_data_routes_each_aggregate_to_its_topic() {
        let registry = DispatchRegistry::master_data();
        let expected = [
            ("PART", "part-events"),
            ("PART_GROUP", "part-group-events"),
            ("PART_CATEGORY", "part-category-events"),
            ("MATERIAL", "material-events"),
            ("MATERIAL_CATEGORY", "material-category-events"),
            ("BOM", "bom-events"),
        ];

        assert_eq!(registry.len(), expected.len());
        for (tag, topic) in expected {
            assert_eq!(registry.resolve(tag).unwrap().topic(), topic);
        }
    }

    #[test]
    fn unknown_aggregate_type_is_not_found() {
        let registry = DispatchRegistry::master_data();
        assert_eq!(
            registry.resolve("UNKNOWN").err(),
            Some(ResolutionError::UnknownAggregateType("UNKNOWN".to_string()))
        );
    }

    #[test]
    fn typed_builder_wraps_decoded_payload() {
        let registry = DispatchRegistry::master_data();
        let rec = record(
            "PART_GROUP",
            json!({ "groupId": 3, "groupName": "Brackets", "groupCode": "BR", "categoryId": 1 }),
        );

        let envelope = registry.resolve("PART_GROUP").unwrap().build_envelope(&rec).unwrap();

        assert_eq!(envelope.event_id, rec.event_id);
        assert_eq!(envelope.version, 4);
        assert_eq!(envelope.payload["groupName"], json!("Brackets"));
    }

    #[test]
    fn typed_builder_rejects_mismatched_payload() {
        let registry = DispatchRegistry::master_data();
        let rec = record("BOM", json!({ "unexpected": true }));

        let err = registry.resolve("BOM").unwrap().build_envelope(&rec).unwrap_err();
        assert!(matches!(err, PublishError::Envelope(_)));
    }

    #[test]
    fn custom_routes_can_be_added_without_touching_the_processor() {
        let registry = DispatchRegistry::new().register("WORK_CENTER", "work-center-events", RawPayload);
        let rec = record("WORK_CENTER", json!({ "anything": [1, 2, 3] }));

        let route = registry.resolve("WORK_CENTER").unwrap();
        assert_eq!(route.topic(), "work-center-events");
        assert_eq!(route.build_envelope(&rec).unwrap().payload, rec.payload);
    }
}
