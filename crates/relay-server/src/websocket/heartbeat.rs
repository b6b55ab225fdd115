//! Liveness monitor: one timer probing every open connection.
//!
//! Each tick, a connection heard from since the previous tick has its miss
//! counter reset; otherwise the counter increments. Reaching `max_missed`
//! closes the connection, so a dead socket cannot sit in a role slot forever.
//! Everyone else gets a transport Ping queued.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::lifecycle::{CloseReason, ConnectionLifecycle};
use crate::metrics::RELAY_LIVENESS_EVICTIONS_TOTAL;

/// Counts from one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Pings queued.
    pub pinged: usize,
    /// Connections closed for missing too many probes.
    pub evicted: usize,
}

/// Consecutive misses tolerated: `timeout / interval`, at least 1.
pub fn max_missed_probes(interval: Duration, timeout: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    (timeout.as_millis() / interval_ms).clamp(1, u128::from(u32::MAX)) as u32
}

/// Probe every open connection once.
pub fn sweep(lifecycle: &ConnectionLifecycle, max_missed: u32) -> SweepReport {
    let mut report = SweepReport::default();

    for conn in lifecycle.registry().connections() {
        if conn.check_alive() {
            conn.reset_missed_probes();
        } else {
            let missed = conn.record_missed_probe();
            if missed >= max_missed {
                warn!(
                    conn_id = %conn.id,
                    missed,
                    silent_for = ?conn.last_seen_elapsed(),
                    "peer unresponsive, closing"
                );
                if lifecycle.close(&conn, CloseReason::LivenessTimeout) {
                    counter!(RELAY_LIVENESS_EVICTIONS_TOTAL).increment(1);
                    report.evicted += 1;
                }
                continue;
            }
        }

        if conn.send_ping().is_ok() {
            report.pinged += 1;
        } else {
            debug!(conn_id = %conn.id, "ping not queued");
        }
    }

    report
}

/// Run sweeps every `interval` until cancelled.
pub async fn run_liveness_monitor(
    lifecycle: Arc<ConnectionLifecycle>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let max_missed = max_missed_probes(interval, timeout);
    let mut ticker = time::interval(interval);
    ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    // First tick completes immediately.
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = sweep(&lifecycle, max_missed);
                if report.evicted > 0 {
                    debug!(pinged = report.pinged, evicted = report.evicted, "liveness sweep");
                }
            }
            () = cancel.cancelled() => {
                debug!("liveness monitor stopped");
                return;
            }
        }
    }
}
