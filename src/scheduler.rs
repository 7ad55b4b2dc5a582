//! Poll scheduler: runs fetch, decode, parse and deliver on a fixed cadence.
//!
//! Cycles never overlap. The first cycle starts immediately; later cycles
//! start on interval boundaries counted from the previous scheduled start.
//! A cycle that runs past one or more boundaries is allowed to finish, and
//! the boundaries it covered are skipped rather than queued.

use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigSource, PollConfig};
use crate::error::CycleError;
use crate::fetch::{HttpClient, fetch_feed};
use crate::output::append_record;
use crate::parser::parse_snapshot;
use crate::sink::DeliverySink;
use crate::stats::CycleStats;

/// Drives poll cycles against one feed and delivers each snapshot to a sink.
pub struct Poller<C, S> {
    client: C,
    sink: S,
    config: Box<dyn ConfigSource>,
    stats_path: Option<PathBuf>,
    cycles: AtomicU64,
}

impl<C: HttpClient, S: DeliverySink> Poller<C, S> {
    pub fn new(client: C, sink: S, config: impl ConfigSource + 'static) -> Self {
        Self {
            client,
            sink,
            config: Box::new(config),
            stats_path: None,
            cycles: AtomicU64::new(0),
        }
    }

    /// Append one CSV row of [`CycleStats`] per cycle to `path`.
    pub fn with_stats_csv(mut self, path: impl Into<PathBuf>) -> Self {
        self.stats_path = Some(path.into());
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Number of cycles started so far.
    pub fn cycles_started(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    /// Runs cycles until `shutdown` resolves.
    ///
    /// Shutdown is observed between cycles; a cycle already in flight
    /// completes (and delivers) first.
    pub async fn run<F: Future<Output = ()>>(&self, shutdown: F) {
        let mut shutdown = pin!(shutdown);
        let mut next_start = Instant::now();

        loop {
            let config = self.config.current().await;
            let interval = config.interval();

            self.run_cycle_with(&config).await;

            next_start = next_boundary(next_start, interval, Instant::now());
            debug!(
                wait_ms = next_start.saturating_duration_since(Instant::now()).as_millis() as u64,
                "Waiting for next cycle"
            );

            tokio::select! {
                () = &mut shutdown => {
                    info!(cycles = self.cycles_started(), "Shutdown requested, poller stopping");
                    break;
                }
                () = tokio::time::sleep_until(next_start) => {}
            }
        }
    }

    /// Runs a single cycle with the current configuration.
    pub async fn run_cycle(&self) -> CycleStats {
        let config = self.config.current().await;
        self.run_cycle_with(&config).await
    }

    #[tracing::instrument(skip_all, fields(cycle = tracing::field::Empty))]
    async fn run_cycle_with(&self, config: &PollConfig) -> CycleStats {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::Span::current().record("cycle", cycle);

        let started = Instant::now();
        let stats = match self.execute(config).await {
            Ok(stats) => {
                info!(
                    routes = stats.routes,
                    vehicles = stats.vehicles,
                    dropped = stats.dropped_records,
                    dropped_pct = stats.dropped_pct(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Cycle completed"
                );
                stats
            }
            Err(e) => {
                error!(
                    kind = e.kind(),
                    error = %e,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Cycle failed, skipping delivery"
                );
                CycleStats::from_error(&e)
            }
        };
        let stats = stats
            .with_cycle(cycle)
            .with_elapsed_ms(started.elapsed().as_millis() as u64);

        if let Some(path) = &self.stats_path {
            if let Err(e) = append_record(path, &stats) {
                warn!(path = %path.display(), error = %e, "Failed to write cycle stats");
            }
        }

        stats
    }

    async fn execute(&self, config: &PollConfig) -> Result<CycleStats, CycleError> {
        let timeout = config.request_timeout();
        let (encoding, payload) = tokio::time::timeout(timeout, async {
            let response = fetch_feed(&self.client, config).await?;
            let encoding = response.encoding().as_str().to_string();
            let payload = response.into_payload().await?;
            Ok::<_, CycleError>((encoding, payload))
        })
        .await
        .map_err(|_| CycleError::Timeout(timeout))??;

        debug!(
            wire_bytes = payload.wire_bytes,
            decoded_bytes = payload.text.len(),
            encoding = %encoding,
            "Payload received, parsing"
        );

        let parsed = parse_snapshot(&payload.text)?;
        let stats = CycleStats::from_parsed(&parsed).with_transfer(
            &encoding,
            payload.wire_bytes,
            payload.text.len(),
        );

        self.sink.deliver(parsed.snapshot).await?;
        Ok(stats)
    }
}

/// Next start time after a cycle that was scheduled at `scheduled` finished at `now`.
///
/// Boundaries that already passed while the cycle ran are skipped.
fn next_boundary(scheduled: Instant, interval: Duration, now: Instant) -> Instant {
    let next = scheduled + interval;
    if next >= now {
        return next;
    }

    let behind = now - next;
    let skipped = u32::try_from(behind.as_nanos() / interval.as_nanos().max(1))
        .unwrap_or(u32::MAX - 1)
        + 1;
    warn!(
        skipped,
        interval_ms = interval.as_millis() as u64,
        "Cycle overran the poll interval, skipping ticks"
    );
    next + interval * skipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_boundary_on_time() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);

        let next = next_boundary(start, interval, start + Duration::from_millis(40));
        assert_eq!(next, start + interval);
    }

    #[test]
    fn test_next_boundary_exactly_on_tick() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);

        let next = next_boundary(start, interval, start + interval);
        assert_eq!(next, start + interval);
    }

    #[test]
    fn test_next_boundary_skips_missed_ticks() {
        let start = Instant::now();
        let interval = Duration::from_millis(100);

        let next = next_boundary(start, interval, start + Duration::from_millis(250));
        assert_eq!(next, start + Duration::from_millis(300));

        let next = next_boundary(start, interval, start + Duration::from_millis(301));
        assert_eq!(next, start + Duration::from_millis(400));
    }
}
