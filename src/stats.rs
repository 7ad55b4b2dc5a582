use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CycleError;
use crate::parser::ParsedFeed;

/// Diagnostics for one poll cycle, successful or not.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CycleStats {
    pub timestamp: DateTime<Utc>,
    pub cycle: u64,

    // snapshot
    pub routes: usize,
    pub vehicles: usize,
    pub dropped_records: usize,

    // transfer
    pub encoding: Option<String>,
    pub wire_bytes: usize,
    pub decoded_bytes: usize,
    pub elapsed_ms: u64,

    // error tracking
    pub error_type: Option<String>,
    pub error_message: Option<String>,
}

impl CycleStats {
    pub fn from_parsed(parsed: &ParsedFeed) -> Self {
        CycleStats {
            timestamp: Utc::now(),
            routes: parsed.snapshot.route_count(),
            vehicles: parsed.snapshot.vehicle_count(),
            dropped_records: parsed.dropped,
            ..Default::default()
        }
    }

    /// Create an error record with timestamp and error information
    pub fn from_error(error: &CycleError) -> Self {
        CycleStats {
            timestamp: Utc::now(),
            error_type: Some(error.kind().to_string()),
            error_message: Some(error.to_string()),
            ..Default::default()
        }
    }

    pub fn with_cycle(mut self, cycle: u64) -> Self {
        self.cycle = cycle;
        self
    }

    pub fn with_transfer(mut self, encoding: &str, wire_bytes: usize, decoded_bytes: usize) -> Self {
        self.encoding = Some(encoding.to_string());
        self.wire_bytes = wire_bytes;
        self.decoded_bytes = decoded_bytes;
        self
    }

    pub fn with_elapsed_ms(mut self, elapsed_ms: u64) -> Self {
        self.elapsed_ms = elapsed_ms;
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_type.is_some()
    }

    /// Share of rows that were dropped, in percent.
    pub fn dropped_pct(&self) -> f64 {
        let total = self.vehicles + self.dropped_records;
        if total == 0 {
            0.0
        } else {
            (self.dropped_records as f64 / total as f64) * 100.0
        }
    }
}
