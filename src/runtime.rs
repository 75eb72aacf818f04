//! Tick loop.
//!
//! Paces [`Simulator::step`] with a tokio interval and fans each snapshot out
//! to the sinks. Cancellation is checked between ticks only; a tick is one
//! synchronous call and is never interrupted halfway.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{DtMode, SimulationConfig};
use crate::simulator::Simulator;
use crate::sink::TelemetrySink;

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Cancelled,
    MaxTicks,
}

pub async fn run_tick_loop(
    sim: &mut Simulator,
    sinks: &mut [Box<dyn TelemetrySink>],
    settings: &SimulationConfig,
    cancel: CancellationToken,
) -> StopReason {
    let period = Duration::from_millis(settings.tick_interval_ms.max(1));
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // the first interval tick fires immediately
    interval.tick().await;
    let mut last = Instant::now();

    info!(
        tick_interval_ms = settings.tick_interval_ms,
        dt_mode = ?settings.dt_mode,
        sinks = sinks.len(),
        "tick loop started"
    );

    let reason = loop {
        if let Some(max) = settings.max_ticks {
            if sim.tick() >= max {
                break StopReason::MaxTicks;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break StopReason::Cancelled,
            _ = interval.tick() => {}
        }

        let now = Instant::now();
        let dt = match settings.dt_mode {
            DtMode::Fixed => settings.dt_s,
            DtMode::WallClock => now.duration_since(last).as_secs_f64() * settings.time_scale,
        };
        last = now;

        if sim.step(dt) {
            let snapshot = Arc::new(sim.snapshot());
            for sink in sinks.iter_mut() {
                sink.publish(&snapshot);
            }
        }
    };

    info!(
        ?reason,
        ticks = sim.tick(),
        sim_time_s = sim.sim_time_s(),
        dropped_commands = sim.dropped_commands(),
        "tick loop stopped"
    );
    reason
}
