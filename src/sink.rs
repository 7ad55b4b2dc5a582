//! Delivery boundary: where completed snapshots leave the grabber.
//!
//! The scheduler calls [`DeliverySink::deliver`] exactly once per successful
//! cycle. Failed cycles make no call, so whatever the consumer last received
//! stays current.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::snapshot::RouteSnapshot;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("snapshot consumer has gone away")]
    Closed,
}

/// Receives one complete snapshot per successful cycle.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    async fn deliver(&self, snapshot: RouteSnapshot) -> Result<(), SinkError>;
}

/// Hands each snapshot to a consumer task over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink(mpsc::Sender<RouteSnapshot>);

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<RouteSnapshot>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self(tx), rx)
    }
}

#[async_trait]
impl DeliverySink for ChannelSink {
    async fn deliver(&self, snapshot: RouteSnapshot) -> Result<(), SinkError> {
        self.0.send(snapshot).await.map_err(|_| SinkError::Closed)
    }
}

/// Keeps only the latest snapshot, for a serving layer that answers
/// per-route lookups.
#[derive(Debug)]
pub struct WatchSink(watch::Sender<Option<Arc<RouteSnapshot>>>);

impl WatchSink {
    pub fn new() -> (Self, watch::Receiver<Option<Arc<RouteSnapshot>>>) {
        let (tx, rx) = watch::channel(None);
        (Self(tx), rx)
    }
}

impl Default for WatchSink {
    fn default() -> Self {
        Self(watch::channel(None).0)
    }
}

#[async_trait]
impl DeliverySink for WatchSink {
    async fn deliver(&self, snapshot: RouteSnapshot) -> Result<(), SinkError> {
        // send_replace never fails, even with no receivers left.
        self.0.send_replace(Some(Arc::new(snapshot)));
        Ok(())
    }
}

/// Logs a summary of each snapshot.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, snapshot: RouteSnapshot) -> Result<(), SinkError> {
        if snapshot.is_empty() {
            warn!(fetched_at = %snapshot.fetched_at(), "Snapshot has no routes");
            return Ok(());
        }
        info!(
            routes = snapshot.route_count(),
            vehicles = snapshot.vehicle_count(),
            fetched_at = %snapshot.fetched_at(),
            "Snapshot delivered"
        );
        for route in snapshot.routes() {
            debug!(route, vehicles = snapshot.vehicles_for(route).len(), "Route");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_snapshot;

    fn sample() -> RouteSnapshot {
        parse_snapshot(r#"{"DATA":[["t1","v1","100",-22.9,-43.2,10,90]]}"#)
            .unwrap()
            .snapshot
    }

    #[tokio::test]
    async fn test_channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.deliver(sample()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().vehicle_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_sink_reports_closed() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert_eq!(sink.deliver(sample()).await, Err(SinkError::Closed));
    }

    #[tokio::test]
    async fn test_watch_sink_keeps_latest() {
        let (sink, rx) = WatchSink::new();
        assert!(rx.borrow().is_none());

        sink.deliver(sample()).await.unwrap();
        let latest = rx.borrow().clone().unwrap();
        assert_eq!(latest.vehicles_for("100").len(), 1);
    }

    #[tokio::test]
    async fn test_watch_sink_default_accepts_without_receivers() {
        let sink = WatchSink::default();
        assert!(sink.deliver(sample()).await.is_ok());
    }

    #[tokio::test]
    async fn test_log_sink_does_not_fail() {
        assert!(LogSink.deliver(sample()).await.is_ok());
        let empty = parse_snapshot(r#"{"DATA":[]}"#).unwrap().snapshot;
        assert!(LogSink.deliver(empty).await.is_ok());
    }
}
