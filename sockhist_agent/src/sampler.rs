//! Background sampler: collects one snapshot per tick, archives and broadcasts it.

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::debug;

use crate::metrics::now_ms;
use crate::state::AppState;

// Ticks land on multiples of the period so client windows line up.
fn aligned(ts: i64, period_ms: i64) -> i64 {
    ts - ts.rem_euclid(period_ms)
}

pub fn spawn_sampler(state: AppState) -> JoinHandle<()> {
    let period_ms = state.interval_ms as i64;
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_millis(state.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let ts = aligned(now_ms(), period_ms);
            let snap = {
                let mut collector = state.collector.lock().await;
                collector.sample(ts)
            };
            debug!(timestamp = ts, metrics = snap.values.len(), "sampled");
            state.publish(snap).await;
        }
    })
}
