//! Randomised invariant checks over arbitrary command sequences and tick sizes.

use proptest::prelude::*;
use serde_json::{json, Value};
use water_plant_sim::domain::{ControlMode, RunState};
use water_plant_sim::{Command, Config, Simulator};

fn arb_command() -> impl Strategy<Value = Command> {
    let pump = prop_oneof![Just("pump_in"), Just("pump_out")];
    prop_oneof![
        (pump.clone(), -1000.0..10_000.0f64)
            .prop_map(|(p, rpm)| Command::new("SET_RPM", p, rpm)),
        (pump.clone(), prop_oneof![Just("ON"), Just("OFF")])
            .prop_map(|(p, s)| Command::new("SET_PUMP_STATE", p, s)),
        (pump.clone(), prop_oneof![Just("AUTO"), Just("MANUAL")])
            .prop_map(|(p, m)| Command::new("SET_MODE", p, m)),
        pump.prop_map(|p| Command::new("RESET_FAULT", p, Value::Null)),
        prop_oneof![Just("FILTER"), Just("BACKWASH"), Just("IDLE")]
            .prop_map(|m| Command::new("SET_FILTER_MODE", "filters", m)),
        (
            prop_oneof![Just("filters"), Just("tank")],
            prop_oneof![Just("OPEN"), Just("CLOSED")]
        )
            .prop_map(|(t, v)| Command::new("SET_VALVE", t, v)),
        (150.0..270.0f64).prop_map(|v| Command::new("SET_VOLTAGE", "stabilizer", v)),
        (-10.0..45.0f64).prop_map(|t| Command::new("SET_AMBIENT", "environment", t)),
        Just(Command::new("SET_RPM", "pump_in", json!("garbage"))),
    ]
}

fn seeded(seed: u64) -> Config {
    let mut cfg = Config::default();
    cfg.simulation.random_seed = Some(seed);
    cfg
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_state_stays_physical(
        seed in any::<u64>(),
        initial_level in 0.0..100.0f64,
        initial_wear in 0.0..100.0f64,
        script in prop::collection::vec((arb_command(), 0.01..5.0f64), 1..80),
    ) {
        let mut cfg = seeded(seed);
        cfg.plant.tank_initial_level_pct = initial_level;
        cfg.plant.filter_initial_wear_pct = initial_wear;
        let mut sim = Simulator::new(&cfg).unwrap();

        for (cmd, dt) in script {
            sim.sender().submit(cmd);
            for _ in 0..5 {
                sim.step(dt);
                let v = sim.state().violations();
                prop_assert!(v.is_empty(), "{:?}", v);
                for p in [&sim.state().pump_in, &sim.state().pump_out] {
                    prop_assert!(p.rpm_desired >= 0.0 && p.rpm_desired <= p.rpm_max);
                    if p.run_state == RunState::Fault {
                        prop_assert_eq!(p.flow_lpm, 0.0);
                        prop_assert_eq!(p.power_kw, 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_auto_setpoints_respect_slew_limits(
        seed in any::<u64>(),
        initial_level in 0.0..100.0f64,
        dts in prop::collection::vec(0.01..3.0f64, 1..200),
    ) {
        let mut cfg = seeded(seed);
        cfg.plant.tank_initial_level_pct = initial_level;
        let in_slew = cfg.controller.in_slew_rpm_per_s;
        let out_slew = cfg.controller.out_slew_rpm_per_s;
        let mut sim = Simulator::new(&cfg).unwrap();

        for dt in dts {
            let before_in = sim.state().pump_in.rpm_desired;
            let before_out = sim.state().pump_out.rpm_desired;
            let blocked_before = sim.state().interlocks.out_blocked_by_filter;
            sim.step(dt);
            let s = sim.state();

            prop_assert_eq!(s.pump_in.control_mode, ControlMode::Auto);
            if s.pump_in.run_state != RunState::Fault {
                prop_assert!((s.pump_in.rpm_desired - before_in).abs() <= in_slew * dt + 1e-6);
            }
            if s.pump_out.run_state != RunState::Fault && !blocked_before {
                prop_assert!((s.pump_out.rpm_desired - before_out).abs() <= out_slew * dt + 1e-6);
            }
        }
    }

    #[test]
    fn test_non_positive_dt_changes_nothing(
        seed in any::<u64>(),
        warmup in 0usize..50,
        dt in prop_oneof![Just(0.0), -100.0..0.0f64, Just(f64::NAN)],
        cmd in arb_command(),
    ) {
        let mut sim = Simulator::new(&seeded(seed)).unwrap();
        for _ in 0..warmup {
            sim.step(1.0);
        }
        sim.sender().submit(cmd);

        let before = sim.state().clone();
        let tick = sim.tick();
        prop_assert!(!sim.step(dt));
        prop_assert_eq!(sim.state(), &before);
        prop_assert_eq!(sim.tick(), tick);
    }

    #[test]
    fn test_tank_mass_balance(
        seed in any::<u64>(),
        initial_level in 5.0..95.0f64,
        ticks in 1usize..300,
    ) {
        let mut cfg = seeded(seed);
        cfg.plant.tank_initial_level_pct = initial_level;
        let mut sim = Simulator::new(&cfg).unwrap();

        for _ in 0..ticks {
            let before = sim.state().tank.level_liters;
            sim.step(1.0);
            let t = &sim.state().tank;
            let expected = (before + (t.in_flow_lpm - t.out_flow_lpm) / 60.0)
                .clamp(0.0, t.capacity_liters);
            prop_assert!((t.level_liters - expected).abs() < 1e-6);
        }
    }
}
