//! Periodic grabber for the Rio de Janeiro bus position feed.
//!
//! Each poll cycle fetches the feed, decompresses it if the upstream sent it
//! gzip-encoded, groups the vehicle rows by route, and hands the resulting
//! [`snapshot::RouteSnapshot`] to a [`sink::DeliverySink`].

pub mod config;
pub mod decode;
pub mod error;
pub mod fetch;
pub mod output;
pub mod parser;
pub mod scheduler;
pub mod sink;
pub mod snapshot;
pub mod stats;
