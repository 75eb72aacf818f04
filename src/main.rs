use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use water_plant_sim::attack::{AttackConfig, AttackGenerator};
use water_plant_sim::runtime::run_tick_loop;
use water_plant_sim::sink::{ChannelSink, DeviceFrame, HistorySink, TracingSink, WatchSink};
use water_plant_sim::telemetry::{init_tracing, shutdown_signal};
use water_plant_sim::{Command, CommandSender, Config, Simulator, TelemetrySink};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cfg = Config::load()?;
    let mut sim = Simulator::new(&cfg)?;
    let cancel = CancellationToken::new();

    let (channel_sink, frames) = ChannelSink::new(cfg.simulation.telemetry_channel_capacity);
    let dropped_frames = channel_sink.dropped_counter();
    let (watch_sink, snapshots) = WatchSink::new();
    let history = HistorySink::new(cfg.simulation.history_len);
    let mut sinks: Vec<Box<dyn TelemetrySink>> = vec![
        Box::new(TracingSink),
        Box::new(channel_sink),
        Box::new(watch_sink),
        Box::new(history.clone()),
    ];

    tokio::spawn(operator_input(sim.sender(), cancel.clone()));
    tokio::spawn(log_frames(frames));

    if cfg.attack.enabled {
        let attack_cfg = AttackConfig {
            random_seed: cfg
                .attack
                .random_seed
                .or(cfg.simulation.random_seed.map(|s| s.wrapping_add(2))),
            ..cfg.attack.clone()
        };
        let generator = AttackGenerator::new(attack_cfg);
        tokio::spawn(generator.run(snapshots, sim.sender(), cancel.clone()));
    } else {
        drop(snapshots);
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            cancel.cancel();
        });
    }

    info!(
        dt_s = cfg.simulation.dt_s,
        tick_interval_ms = cfg.simulation.tick_interval_ms,
        seed = ?cfg.simulation.random_seed,
        attack = cfg.attack.enabled,
        "starting water plant simulator"
    );

    let reason = run_tick_loop(&mut sim, &mut sinks, &cfg.simulation, cancel.clone()).await;
    cancel.cancel();
    drop(sinks);

    let stats = sim.command_stats();
    let last = history.latest();
    warn!(
        ?reason,
        ticks = sim.tick(),
        commands_applied = stats.applied,
        commands_ignored = stats.ignored,
        commands_rejected = stats.unauthenticated_rejected,
        commands_dropped = sim.dropped_commands(),
        frames_dropped = dropped_frames.load(std::sync::atomic::Ordering::Relaxed),
        final_level_pct = last.as_ref().map(|s| s.state.tank.level_pct),
        "shutdown complete"
    );
    Ok(())
}

/// Read JSON-lines commands from stdin and enqueue them
async fn operator_input(commands: CommandSender, cancel: CancellationToken) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "operator input failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Command>(&line) {
            Ok(mut cmd) => {
                if cmd.source.is_empty() {
                    cmd.source = "operator".to_string();
                }
                commands.submit(cmd);
            }
            Err(e) => warn!(error = %e, "malformed operator command"),
        }
    }
    debug!("operator input closed");
}

async fn log_frames(mut frames: mpsc::Receiver<DeviceFrame>) {
    while let Some(frame) = frames.recv().await {
        match serde_json::to_string(&frame) {
            Ok(json) => debug!(device = %frame.device_id, seq = frame.seq, frame = %json, "telemetry frame"),
            Err(e) => warn!(error = %e, device = %frame.device_id, "telemetry frame not serializable"),
        }
    }
}
