//! Event-loop lag monitor
//!
//! Every interval a probe timer is scheduled for the same interval; the
//! amount by which it oversleeps is the scheduler lag. Pure observability:
//! the measurement is logged and shares no state with profiling sessions.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::info;

/// Spawn the lag monitor. The returned handle can be aborted at shutdown.
pub fn spawn(probe_interval: Duration) -> JoinHandle<()> {
    tokio::spawn(run(probe_interval, None))
}

/// Monitor loop. Each measurement is logged; `observer`, when present,
/// also receives it, which is what tests hook into.
async fn run(probe_interval: Duration, observer: Option<mpsc::UnboundedSender<Duration>>) {
    let mut ticker = interval(probe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        // Probes overlap the next tick, matching the one-measurement-
        // per-interval cadence even though each probe takes a full
        // interval to resolve.
        let observer = observer.clone();
        tokio::spawn(async move {
            let lag = measure_once(probe_interval).await;
            info!(lag_ms = lag.as_secs_f64() * 1000.0, "event loop lag");
            if let Some(tx) = observer {
                let _ = tx.send(lag);
            }
        });
    }
}

/// Sleep for `expected` and report how far past the deadline the wakeup
/// actually landed.
async fn measure_once(expected: Duration) -> Duration {
    let start = Instant::now();
    sleep(expected).await;
    start.elapsed().saturating_sub(expected)
}
