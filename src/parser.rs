//! JSON parser for the bus position feed.
//!
//! The feed is a `{"COLUMNS": [...], "DATA": [[...], ...]}` document where each
//! row is `[timestamp, vehicle, route, latitude, longitude, speed, heading]`.
//! Rows are grouped into a [`RouteSnapshot`] keyed on the route column.

use serde::Deserialize;
use serde_json::Value;
use serde_json::error::Category;
use thiserror::Error;
use tracing::debug;

use crate::snapshot::{RouteSnapshot, Timestamp, VehiclePosition};

/// The payload as a whole could not be used.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Not syntactically valid JSON (includes truncated documents).
    #[error("malformed JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Valid JSON, but not a document with a `DATA` list.
    #[error("unexpected document shape: {0}")]
    UnexpectedShape(#[source] serde_json::Error),
}

/// A single row could not be turned into a [`VehiclePosition`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is not an array")]
    NotAnArray,

    #[error("record has no {0}")]
    MissingField(&'static str),

    #[error("record has an invalid {0}")]
    InvalidField(&'static str),
}

#[derive(Deserialize)]
struct FeedDocument {
    #[serde(rename = "COLUMNS", default)]
    columns: Option<Vec<String>>,
    #[serde(rename = "DATA")]
    data: Vec<Value>,
}

/// Positions of each field within a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    timestamp: usize,
    vehicle: usize,
    route: usize,
    latitude: usize,
    longitude: usize,
    speed: usize,
    heading: usize,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            timestamp: 0,
            vehicle: 1,
            route: 2,
            latitude: 3,
            longitude: 4,
            speed: 5,
            heading: 6,
        }
    }
}

impl ColumnLayout {
    /// Resolves positions from the feed's `COLUMNS` header. Returns `None`
    /// unless every field is named.
    pub fn from_columns(columns: &[String]) -> Option<Self> {
        let find = |name: &str| {
            columns
                .iter()
                .position(|c| c.trim().eq_ignore_ascii_case(name))
        };
        Some(Self {
            timestamp: find("DATAHORA")?,
            vehicle: find("ORDEM")?,
            route: find("LINHA")?,
            latitude: find("LATITUDE")?,
            longitude: find("LONGITUDE")?,
            speed: find("VELOCIDADE")?,
            heading: find("DIRECAO")?,
        })
    }
}

/// Outcome of parsing one payload.
#[derive(Debug, Clone)]
pub struct ParsedFeed {
    pub snapshot: RouteSnapshot,
    /// Rows skipped because they were malformed or had no route.
    pub dropped: usize,
}

/// Parses a feed payload and groups its rows by route.
///
/// Malformed rows are dropped individually and counted in
/// [`ParsedFeed::dropped`]; they never invalidate the rest of the payload.
///
/// # Errors
///
/// Returns [`ParseError`] if the text is not JSON or has no `DATA` list.
pub fn parse_snapshot(text: &str) -> Result<ParsedFeed, ParseError> {
    let document: FeedDocument = serde_json::from_str(text).map_err(|e| match e.classify() {
        Category::Syntax | Category::Eof | Category::Io => ParseError::Malformed(e),
        Category::Data => ParseError::UnexpectedShape(e),
    })?;

    let layout = document
        .columns
        .as_deref()
        .and_then(ColumnLayout::from_columns)
        .unwrap_or_default();

    let mut dropped = 0;
    let records = document
        .data
        .iter()
        .filter_map(|row| match parse_record(row, &layout) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!(error = %e, "Dropping feed record");
                dropped += 1;
                None
            }
        });
    let snapshot = RouteSnapshot::from_records(records);

    Ok(ParsedFeed { snapshot, dropped })
}

/// Converts one feed row into a [`VehiclePosition`].
pub fn parse_record(row: &Value, layout: &ColumnLayout) -> Result<VehiclePosition, RecordError> {
    let fields = row.as_array().ok_or(RecordError::NotAnArray)?;
    let field = |index: usize, name: &'static str| match fields.get(index) {
        None | Some(Value::Null) => Err(RecordError::MissingField(name)),
        Some(value) => Ok(value),
    };

    let route_id =
        identifier(field(layout.route, "route")?).ok_or(RecordError::InvalidField("route"))?;

    let record = VehiclePosition {
        timestamp: timestamp(field(layout.timestamp, "timestamp")?)?,
        vehicle_id: identifier(field(layout.vehicle, "vehicle")?)
            .ok_or(RecordError::InvalidField("vehicle"))?,
        route_id,
        latitude: number(field(layout.latitude, "latitude")?, "latitude")?,
        longitude: number(field(layout.longitude, "longitude")?, "longitude")?,
        speed: number(field(layout.speed, "speed")?, "speed")?,
        heading: number(field(layout.heading, "heading")?, "heading")?,
    };
    if !record.has_route() {
        return Err(RecordError::MissingField("route"));
    }
    Ok(record)
}

/// Canonical string form of an identifier: trimmed text, or the number's
/// text with integral floats written without a fraction (`100.0` is `"100"`).
fn identifier(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) if n.is_f64() => n.as_f64().map(|f| {
            if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
                (f as i64).to_string()
            } else {
                f.to_string()
            }
        }),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn timestamp(value: &Value) -> Result<Timestamp, RecordError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(Timestamp::Text(s.clone())),
        Value::Number(n) => n
            .as_i64()
            .map(Timestamp::Epoch)
            .ok_or(RecordError::InvalidField("timestamp")),
        _ => Err(RecordError::InvalidField("timestamp")),
    }
}

fn number(value: &Value, name: &'static str) -> Result<f64, RecordError> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite())
    .ok_or(RecordError::InvalidField(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{"DATA":[["t1","v1","100",-22.9,-43.2,10,90],["t2","v2","100",-22.9,-43.2,12,95],["t3","v3","200",-22.8,-43.1,0,0]]}"#;

    #[test]
    fn test_groups_sample_into_two_routes() {
        let parsed = parse_snapshot(SAMPLE).unwrap();
        let snapshot = &parsed.snapshot;

        assert_eq!(parsed.dropped, 0);
        assert_eq!(snapshot.route_count(), 2);
        assert_eq!(snapshot.vehicles_for("100").len(), 2);
        assert_eq!(snapshot.vehicles_for("200").len(), 1);
        assert_eq!(snapshot.vehicles_for("200")[0].vehicle_id, "v3");
    }

    #[test]
    fn test_numeric_route_is_stringified() {
        let parsed = parse_snapshot(r#"{"DATA":[["t1","v1",474,-22.9,-43.2,10,90]]}"#).unwrap();
        assert_eq!(parsed.snapshot.vehicles_for("474").len(), 1);
    }

    #[test]
    fn test_integral_float_route_matches_integer_route() {
        let text = r#"{"DATA":[["t1","v1",100.0,-22.9,-43.2,10,90],["t2","v2",100,-22.9,-43.2,10,90],["t3","v3",2.5,-22.9,-43.2,10,90]]}"#;
        let parsed = parse_snapshot(text).unwrap();

        assert_eq!(parsed.snapshot.vehicles_for("100").len(), 2);
        assert_eq!(parsed.snapshot.vehicles_for("2.5").len(), 1);
        assert!(parsed.snapshot.vehicles_for("100.0").is_empty());
    }

    #[test]
    fn test_missing_route_is_dropped() {
        let text = r#"{"DATA":[
            ["t1","v1","",-22.9,-43.2,10,90],
            ["t2","v2",null,-22.9,-43.2,10,90],
            ["t3","v3","   ",-22.9,-43.2,10,90],
            ["t4","v4"],
            ["t5","v5","100",-22.9,-43.2,10,90]
        ]}"#;
        let parsed = parse_snapshot(text).unwrap();

        assert_eq!(parsed.dropped, 4);
        assert_eq!(parsed.snapshot.route_count(), 1);
        assert!(parsed.snapshot.vehicles_for("").is_empty());
        assert_eq!(parsed.snapshot.vehicle_count(), 1);
    }

    #[test]
    fn test_malformed_record_does_not_invalidate_payload() {
        let text = r#"{"DATA":["not a row", ["t1","v1","100","bad",-43.2,10,90], ["t2","v2","100",-22.9,-43.2,10,90]]}"#;
        let parsed = parse_snapshot(text).unwrap();
        assert_eq!(parsed.dropped, 2);
        assert_eq!(parsed.snapshot.vehicle_count(), 1);
    }

    #[test]
    fn test_truncated_document_is_malformed() {
        let result = parse_snapshot(&SAMPLE[..SAMPLE.len() / 2]);
        assert!(matches!(result, Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_missing_data_is_unexpected_shape() {
        assert!(matches!(
            parse_snapshot(r#"{"COLUMNS": []}"#),
            Err(ParseError::UnexpectedShape(_))
        ));
        assert!(matches!(
            parse_snapshot("[1, 2, 3]"),
            Err(ParseError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn test_columns_header_reorders_fields() {
        let text = r#"{
            "COLUMNS": ["ORDEM","LINHA","DATAHORA","LATITUDE","LONGITUDE","VELOCIDADE","DIRECAO"],
            "DATA": [["B31001", 309, "01-15-2015 14:20:00", -22.87, -43.30, 24.5, 180]]
        }"#;
        let parsed = parse_snapshot(text).unwrap();
        let record = &parsed.snapshot.vehicles_for("309")[0];

        assert_eq!(record.vehicle_id, "B31001");
        assert_eq!(record.timestamp, Timestamp::Text("01-15-2015 14:20:00".into()));
        assert_eq!(record.speed, 24.5);
        assert_eq!(record.heading, 180.0);
    }

    #[test]
    fn test_incomplete_columns_header_falls_back_to_positions() {
        let columns = vec!["ORDEM".to_string(), "LINHA".to_string()];
        assert_eq!(ColumnLayout::from_columns(&columns), None);

        let text = r#"{"COLUMNS": ["ORDEM"], "DATA": [["t1","v1","100",-22.9,-43.2,10,90]]}"#;
        assert_eq!(parse_snapshot(text).unwrap().snapshot.vehicles_for("100").len(), 1);
    }

    #[test]
    fn test_parse_record_coerces_fields() {
        let row = json!([1_420_000_000, 42, " 100 ", "-22.9", -43.2, "10.5", 90]);
        let record = parse_record(&row, &ColumnLayout::default()).unwrap();

        assert_eq!(record.timestamp, Timestamp::Epoch(1_420_000_000));
        assert_eq!(record.vehicle_id, "42");
        assert_eq!(record.route_id, "100");
        assert_eq!(record.latitude, -22.9);
        assert_eq!(record.speed, 10.5);
    }

    #[test]
    fn test_parse_record_rejects_non_array() {
        let result = parse_record(&json!({"LINHA": "100"}), &ColumnLayout::default());
        assert_eq!(result, Err(RecordError::NotAnArray));
    }

    #[test]
    fn test_parsing_twice_is_stable() {
        let first = parse_snapshot(SAMPLE).unwrap().snapshot;
        let second = parse_snapshot(SAMPLE).unwrap().snapshot;

        let mut first_routes: Vec<_> = first.routes().collect();
        let mut second_routes: Vec<_> = second.routes().collect();
        first_routes.sort_unstable();
        second_routes.sort_unstable();
        assert_eq!(first_routes, second_routes);

        for route in first_routes {
            assert_eq!(first.vehicles_for(route), second.vehicles_for(route));
        }
    }
}
