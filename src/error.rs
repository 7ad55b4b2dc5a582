//! Error taxonomy for a single poll cycle.

use std::time::Duration;
use thiserror::Error;

use crate::decode::DecodeError;
use crate::fetch::FetchError;
use crate::parser::ParseError;
use crate::sink::SinkError;

/// Why a cycle produced no delivery. None of these stop the scheduler.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Transport(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    InvalidPayload(#[from] ParseError),

    #[error("fetch did not complete within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Delivery(#[from] SinkError),
}

impl CycleError {
    /// Short stable tag, used in logs and the stats CSV.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Transport(_) => "fetch_error",
            CycleError::Decode(_) => "decode_error",
            CycleError::InvalidPayload(_) => "parse_error",
            CycleError::Timeout(_) => "timeout",
            CycleError::Delivery(_) => "delivery_error",
        }
    }
}
