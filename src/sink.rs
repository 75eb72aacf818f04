//! # Telemetry Sinks
//!
//! Read-only consumers of the per-tick [`PlantSnapshot`]. Sinks run inside the
//! tick loop and must never block it: channel-backed sinks use `try_send` and
//! count what they had to drop.
//!
//! [`TelemetrySequencer`] projects a snapshot into one [`DeviceFrame`] per
//! field device, each with its own monotonically increasing sequence number.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::domain::{LastCommand, PlantState, PumpState, SecurityIndicators};

/// Immutable view of the plant after one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlantSnapshot {
    pub tick: u64,
    pub sim_time_s: f64,
    pub ts: DateTime<Utc>,
    pub state: PlantState,
}

/// Field devices that publish their own telemetry stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceId {
    Stabilizer,
    PumpIn,
    PumpOut,
    FilterSystem,
    WaterStorage,
}

impl DeviceId {
    pub const ALL: [DeviceId; 5] = [
        DeviceId::Stabilizer,
        DeviceId::PumpIn,
        DeviceId::PumpOut,
        DeviceId::FilterSystem,
        DeviceId::WaterStorage,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceId::Stabilizer => "stabilizer",
            DeviceId::PumpIn => "pump_in",
            DeviceId::PumpOut => "pump_out",
            DeviceId::FilterSystem => "filter_system",
            DeviceId::WaterStorage => "water_storage",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-device telemetry message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFrame {
    pub device_id: String,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub sim_time_s: f64,
    pub payload: Value,
    /// Most recent applied external command
    pub control: Option<LastCommand>,
    pub security: SecurityIndicators,
}

/// Assigns per-device sequence numbers
#[derive(Debug, Default)]
pub struct TelemetrySequencer {
    seq: [u64; 5],
}

impl TelemetrySequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one frame per device, advancing every device's sequence
    pub fn frames(&mut self, snapshot: &PlantSnapshot) -> Vec<DeviceFrame> {
        DeviceId::ALL
            .iter()
            .map(|&device| {
                let seq = &mut self.seq[device.index()];
                *seq += 1;
                DeviceFrame {
                    device_id: device.as_str().to_string(),
                    seq: *seq,
                    ts: snapshot.ts,
                    sim_time_s: snapshot.sim_time_s,
                    payload: device_payload(device, &snapshot.state),
                    control: snapshot.state.last_command.clone(),
                    security: snapshot.state.security,
                }
            })
            .collect()
    }

    pub fn last_seq(&self, device: DeviceId) -> u64 {
        self.seq[device.index()]
    }
}

fn pump_payload(p: &PumpState) -> Value {
    json!({
        "control_mode": p.control_mode,
        "run_state": p.run_state,
        "rpm_desired": p.rpm_desired,
        "rpm_actual": p.rpm_actual,
        "voltage_v": p.voltage,
        "flow_lpm": p.flow_lpm,
        "pressure_bar": p.pressure_bar,
        "power_kw": p.power_kw,
        "motor_temp_c": p.motor_temp_c,
        "overheat_seconds": p.overheat_seconds,
    })
}

fn device_payload(device: DeviceId, s: &PlantState) -> Value {
    match device {
        DeviceId::Stabilizer => json!({
            "mode": s.stabilizer.mode,
            "input_voltage_v": s.stabilizer.input_voltage,
            "output_voltage_v": s.stabilizer.output_voltage,
            "active_power_kw": s.stabilizer.active_power_kw,
            "internal_temp_c": s.stabilizer.internal_temp_c,
            "ambient_temp_c": s.env.ambient_temp_c,
        }),
        DeviceId::PumpIn => pump_payload(&s.pump_in),
        DeviceId::PumpOut => pump_payload(&s.pump_out),
        DeviceId::FilterSystem => json!({
            "mode": s.filter.mode,
            "valve": s.filter.valve,
            "wear_pct": s.filter.wear_pct,
            "in_pressure_bar": s.filter.in_pressure_bar,
            "out_pressure_bar": s.filter.out_pressure_bar,
            "delta_pressure_bar": s.filter.delta_pressure_bar,
            "ntu": s.filter.ntu,
            "ph": s.filter.ph,
            "quality_alarm": s.filter.quality_alarm,
            "is_potable": s.filter.potable(),
        }),
        DeviceId::WaterStorage => json!({
            "level_pct": s.tank.level_pct,
            "level_liters": s.tank.level_liters,
            "in_flow_lpm": s.tank.in_flow_lpm,
            "out_flow_lpm": s.tank.out_flow_lpm,
            "level_rate_lps": s.tank.level_rate_lps,
            "overflow": s.tank.overflow,
            "outlet_valve": s.tank.outlet_valve,
            "level_sensor": s.tank.level_sensor,
            "out_blocked_by_filter": s.interlocks.out_blocked_by_filter,
        }),
    }
}

/// Consumer of per-tick snapshots. Implementations must return promptly.
pub trait TelemetrySink: Send {
    fn name(&self) -> &'static str;

    fn publish(&mut self, snapshot: &Arc<PlantSnapshot>);
}

/// Logs a one-line summary per tick at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn publish(&mut self, snapshot: &Arc<PlantSnapshot>) {
        let s = &snapshot.state;
        debug!(
            tick = snapshot.tick,
            sim_time_s = snapshot.sim_time_s,
            level_pct = s.tank.level_pct,
            wear_pct = s.filter.wear_pct,
            filter_mode = %s.filter.mode,
            pump_in = %s.pump_in.run_state,
            pump_in_rpm = s.pump_in.rpm_actual,
            pump_out = %s.pump_out.run_state,
            pump_out_rpm = s.pump_out.rpm_actual,
            stabilizer = %s.stabilizer.mode,
            failed_auth = s.security.failed_auth,
            "tick"
        );
    }
}

/// Forwards per-device frames over a bounded channel, dropping when full
pub struct ChannelSink {
    tx: mpsc::Sender<DeviceFrame>,
    sequencer: TelemetrySequencer,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<DeviceFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            tx,
            sequencer: TelemetrySequencer::new(),
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (sink, rx)
    }

    /// Shared counter of frames dropped because the consumer fell behind
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl TelemetrySink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn publish(&mut self, snapshot: &Arc<PlantSnapshot>) {
        let mut dropped = 0u64;
        for frame in self.sequencer.frames(snapshot) {
            if self.tx.try_send(frame).is_err() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            let total = self.dropped.fetch_add(dropped, Ordering::Relaxed) + dropped;
            warn!(tick = snapshot.tick, dropped, total, "telemetry frames dropped");
        }
    }
}

/// Publishes the latest snapshot for actors that only care about "now"
pub struct WatchSink {
    tx: watch::Sender<Option<Arc<PlantSnapshot>>>,
}

impl WatchSink {
    pub fn new() -> (Self, watch::Receiver<Option<Arc<PlantSnapshot>>>) {
        let (tx, rx) = watch::channel(None);
        (Self { tx }, rx)
    }
}

impl TelemetrySink for WatchSink {
    fn name(&self) -> &'static str {
        "watch"
    }

    fn publish(&mut self, snapshot: &Arc<PlantSnapshot>) {
        self.tx.send_replace(Some(snapshot.clone()));
    }
}

/// Bounded in-memory history of recent snapshots (advisory only)
#[derive(Clone)]
pub struct HistorySink {
    capacity: usize,
    buffer: Arc<Mutex<VecDeque<Arc<PlantSnapshot>>>>,
}

impl HistorySink {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            buffer: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    /// Copy of the retained snapshots, oldest first
    pub fn snapshots(&self) -> Vec<Arc<PlantSnapshot>> {
        self.buffer.lock().iter().cloned().collect()
    }

    pub fn latest(&self) -> Option<Arc<PlantSnapshot>> {
        self.buffer.lock().back().cloned()
    }
}

impl TelemetrySink for HistorySink {
    fn name(&self) -> &'static str {
        "history"
    }

    fn publish(&mut self, snapshot: &Arc<PlantSnapshot>) {
        let mut buffer = self.buffer.lock();
        while buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(snapshot.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(tick: u64) -> Arc<PlantSnapshot> {
        Arc::new(PlantSnapshot {
            tick,
            sim_time_s: tick as f64,
            ts: Utc::now(),
            state: PlantState::default(),
        })
    }

    #[test]
    fn test_sequencer_numbers_each_device_independently() {
        let mut seq = TelemetrySequencer::new();
        let first = seq.frames(&snapshot(1));
        let second = seq.frames(&snapshot(2));

        assert_eq!(first.len(), 5);
        assert!(first.iter().all(|f| f.seq == 1));
        assert!(second.iter().all(|f| f.seq == 2));
        assert_eq!(seq.last_seq(DeviceId::WaterStorage), 2);

        let ids: Vec<_> = first.iter().map(|f| f.device_id.as_str()).collect();
        assert_eq!(
            ids,
            ["stabilizer", "pump_in", "pump_out", "filter_system", "water_storage"]
        );
    }

    #[test]
    fn test_frame_payloads_carry_device_fields() {
        let mut seq = TelemetrySequencer::new();
        let frames = seq.frames(&snapshot(1));
        assert_eq!(frames[0].payload["mode"], "NORMAL");
        assert_eq!(frames[1].payload["run_state"], "OFF");
        assert_eq!(frames[3].payload["mode"], "FILTER");
        assert_eq!(frames[3].payload["is_potable"], true);
        assert_eq!(frames[4].payload["level_pct"], 50.0);
        assert!(frames[4].control.is_none());
        assert_eq!(frames[4].security, SecurityIndicators::default());
    }

    #[test]
    fn test_every_frame_carries_security_and_potability() {
        let mut state = PlantState::default();
        state.filter.ntu = 2.2;
        state.security = SecurityIndicators {
            failed_auth: 6,
            burst: 1,
        };
        let snap = Arc::new(PlantSnapshot {
            tick: 9,
            sim_time_s: 9.0,
            ts: Utc::now(),
            state,
        });

        let frames = TelemetrySequencer::new().frames(&snap);
        assert!(frames
            .iter()
            .all(|f| f.security.failed_auth == 6 && f.security.burst == 1));
        assert_eq!(frames[3].payload["is_potable"], false);

        let json = serde_json::to_value(&frames[0]).unwrap();
        assert_eq!(json["security"]["failed_auth"], 6);
        assert_eq!(json["security"]["burst"], 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = HistorySink::new(3);
        for tick in 1..=5 {
            history.publish(&snapshot(tick));
        }
        let ticks: Vec<_> = history.snapshots().iter().map(|s| s.tick).collect();
        assert_eq!(ticks, [3, 4, 5]);
        assert_eq!(history.latest().map(|s| s.tick), Some(5));
    }

    #[tokio::test]
    async fn test_channel_sink_drops_instead_of_blocking() {
        let (mut sink, mut rx) = ChannelSink::new(5);
        let dropped = sink.dropped_counter();

        sink.publish(&snapshot(1));
        sink.publish(&snapshot(2));
        assert_eq!(dropped.load(Ordering::Relaxed), 5);

        let mut received = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.seq, 1);
            received += 1;
        }
        assert_eq!(received, 5);
    }

    #[tokio::test]
    async fn test_watch_sink_keeps_latest() {
        let (mut sink, rx) = WatchSink::new();
        sink.publish(&snapshot(1));
        sink.publish(&snapshot(2));
        let latest = rx.borrow().clone();
        assert_eq!(latest.map(|s| s.tick), Some(2));
    }
}
