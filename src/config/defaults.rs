use super::*;

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            fuse_rating_amps: 25.0,
            phase_count: 3,
            mode: OvercurrentMode::Optimised,
            min_recovery_window_secs: 15 * 60,
            recovery_window_max_secs: 60 * 60,
            recovery_growth_factor: 2.0,
            risk_threshold: 0.8,
            risk_decay_window_secs: 600,
            min_current_amps: 6,
            max_meter_failures: 5,
            tick_interval_ms: 30_000,
            convergence_ticks: 3,
            command_settle_secs: 15,
            min_command_interval_secs: 20,
            new_session_on_startup: true,
            min_plausible_voltage: 100.0,
            io_timeout_ms: 5_000,
            breaker_curve: BreakerCurveConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            console_level: None,
            file_level: None,
            file: "/tmp/fuseguard.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            voltage: 230.0,
            base_load_w: vec![1200.0, 800.0, 600.0],
            production_w: vec![0.0, 0.0, 0.0],
            charger_max_amps: 32,
            initial_limit_amps: 16,
            synced_phase_limits: true,
            car_connected: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            balancer: BalancerConfig::default(),
            logging: LoggingConfig::default(),
            charger_device: DeviceRecord::simulated("charger-1"),
            meter_device: DeviceRecord::simulated("meter-1"),
            simulation: SimulationConfig::default(),
        }
    }
}
