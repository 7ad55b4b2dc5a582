//! Route-keyed snapshot of vehicle positions produced by one poll cycle.

use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeTuple};
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Position report timestamp as the feed sent it.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    Text(String),
    Epoch(i64),
}

/// One vehicle position record. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct VehiclePosition {
    pub timestamp: Timestamp,
    pub vehicle_id: String,
    pub route_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub speed: f64,
    pub heading: f64,
}

impl VehiclePosition {
    /// Whether the record carries a usable (non-blank) route identifier.
    pub fn has_route(&self) -> bool {
        !self.route_id.trim().is_empty()
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Timestamp::Text(text) => serializer.serialize_str(text),
            Timestamp::Epoch(epoch) => serializer.serialize_i64(*epoch),
        }
    }
}

// Serialized as the same seven-element row the feed carries.
impl Serialize for VehiclePosition {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_tuple(7)?;
        row.serialize_element(&self.timestamp)?;
        row.serialize_element(&self.vehicle_id)?;
        row.serialize_element(&self.route_id)?;
        row.serialize_element(&self.latitude)?;
        row.serialize_element(&self.longitude)?;
        row.serialize_element(&self.speed)?;
        row.serialize_element(&self.heading)?;
        row.end()
    }
}

/// Mapping from route identifier to the vehicles reported on that route.
///
/// Built once per successful cycle and handed, by value, to the delivery sink.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSnapshot {
    fetched_at: DateTime<Utc>,
    routes: HashMap<String, Vec<VehiclePosition>>,
}

impl RouteSnapshot {
    /// Builds a snapshot by grouping `records` on their route identifier.
    /// Records without a route are skipped, never stored under a blank key.
    pub fn from_records(records: impl IntoIterator<Item = VehiclePosition>) -> Self {
        let mut routes: HashMap<String, Vec<VehiclePosition>> = HashMap::new();
        for record in records {
            if !record.has_route() {
                continue;
            }
            routes
                .entry(record.route_id.clone())
                .or_default()
                .push(record);
        }
        Self {
            fetched_at: Utc::now(),
            routes,
        }
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    /// All records for `route`; empty if the route was not in the feed.
    pub fn vehicles_for(&self, route: &str) -> &[VehiclePosition] {
        self.routes.get(route).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn into_routes(self) -> HashMap<String, Vec<VehiclePosition>> {
        self.routes
    }
}

impl Serialize for RouteSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.routes.len()))?;
        for (route, vehicles) in &self.routes {
            map.serialize_entry(route, vehicles)?;
        }
        map.end()
    }
}
