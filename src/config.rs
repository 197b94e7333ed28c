//! Configuration management for Fuseguard
//!
//! This module handles loading, validation, and management of the
//! installation configuration from YAML files. The balancer section is
//! immutable for a controller's lifetime; reconfiguring means building a new
//! controller from a new, validated `BalancerConfig`.

use crate::breaker::BreakerCharacteristic;
use crate::device::DeviceRecord;
use crate::error::{FuseguardError, Result};
use crate::types::OvercurrentMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

mod defaults;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "FUSEGUARD_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Load balancing engine settings
    pub balancer: BalancerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Device record the charger implementation is bound from
    pub charger_device: DeviceRecord,

    /// Device record the meter implementation is bound from
    pub meter_device: DeviceRecord,

    /// Behaviour of the simulated devices (demo mode and tests)
    pub simulation: SimulationConfig,
}

/// Per-installation engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalancerConfig {
    /// Rating of the main fuse on each phase in amperes
    pub fuse_rating_amps: f64,

    /// Number of supply phases (1, 2 or 3)
    pub phase_count: u8,

    /// Overcurrent handling mode
    pub mode: OvercurrentMode,

    /// Minimum continuous surplus before a limit may be raised again
    pub min_recovery_window_secs: u64,

    /// Upper bound for the extended recovery window
    pub recovery_window_max_secs: u64,

    /// Factor the recovery window grows by when surplus is interrupted
    pub recovery_growth_factor: f64,

    /// Risk score at which the optimised policy must reduce (1.0 = breaker trip)
    pub risk_threshold: f64,

    /// Time for a full threshold's worth of risk to decay while within rating
    pub risk_decay_window_secs: u64,

    /// Lowest controllable charging current
    pub min_current_amps: u32,

    /// Consecutive meter failures before a phase is forced to its minimum
    pub max_meter_failures: u32,

    /// Tick interval in milliseconds; also the tick duration used for risk
    pub tick_interval_ms: u64,

    /// Ticks the charger may report a limit other than the one last commanded
    /// before it is taken as a manual change and adopted
    pub convergence_ticks: u32,

    /// Time after a command during which the charger's reported limit is not trusted
    pub command_settle_secs: u64,

    /// Minimum time between commands that raise a limit; reductions never wait
    pub min_command_interval_secs: u64,

    /// Treat a car already connected at the first charger read as a new session
    pub new_session_on_startup: bool,

    /// Voltages below this are treated as an implausible reading
    pub min_plausible_voltage: f64,

    /// Timeout for a single meter or charger call in milliseconds
    pub io_timeout_ms: u64,

    /// Breaker trip curve the thermal model follows
    pub breaker_curve: BreakerCurveConfig,
}

/// Breaker curve selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct BreakerCurveConfig {
    /// Built-in characteristic used when no custom points are given
    pub characteristic: BreakerCharacteristic,

    /// Custom breakpoints, ordered by increasing ratio
    pub points: Option<Vec<CurvePointConfig>>,
}

/// A configured trip-curve breakpoint
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CurvePointConfig {
    /// Actual current divided by fuse rating
    pub ratio: f64,

    /// Longest time the breaker tolerates this ratio, in seconds
    pub dwell_secs: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Optional console-specific level
    pub console_level: Option<String>,

    /// Optional file-specific level
    pub file_level: Option<String>,

    /// Path to log file (its directory receives the daily rolled files)
    pub file: String,

    /// Number of rolled files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

/// Simulated device behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Supply voltage reported on every phase
    pub voltage: f64,

    /// Household base load per phase in watts (excluding the charger)
    pub base_load_w: Vec<f64>,

    /// Solar production per phase in watts
    pub production_w: Vec<f64>,

    /// Charger's advertised maximum current
    pub charger_max_amps: u32,

    /// Initial charger limit
    pub initial_limit_amps: u32,

    /// Whether the charger applies one limit to all phases
    pub synced_phase_limits: bool,

    /// Whether a car is plugged in at start
    pub car_connected: bool,
}

impl BalancerConfig {
    pub fn min_recovery_window(&self) -> Duration {
        Duration::from_secs(self.min_recovery_window_secs)
    }

    pub fn recovery_window_max(&self) -> Duration {
        Duration::from_secs(self.recovery_window_max_secs)
    }

    pub fn risk_decay_window(&self) -> Duration {
        Duration::from_secs(self.risk_decay_window_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn command_settle(&self) -> Duration {
        Duration::from_secs(self.command_settle_secs)
    }

    pub fn min_command_interval(&self) -> Duration {
        Duration::from_secs(self.min_command_interval_secs)
    }

    /// Validate the engine settings; any error here is fatal for construction
    pub fn validate(&self) -> Result<()> {
        if !self.fuse_rating_amps.is_finite() || self.fuse_rating_amps <= 0.0 {
            return Err(FuseguardError::validation(
                "balancer.fuse_rating_amps",
                "Must be positive",
            ));
        }

        if self.min_current_amps == 0 {
            return Err(FuseguardError::validation(
                "balancer.min_current_amps",
                "Must be greater than 0",
            ));
        }

        if self.fuse_rating_amps < f64::from(self.min_current_amps) {
            return Err(FuseguardError::validation(
                "balancer.fuse_rating_amps",
                "Must not be below min_current_amps",
            ));
        }

        if !(1..=3).contains(&self.phase_count) {
            return Err(FuseguardError::validation(
                "balancer.phase_count",
                "Must be 1, 2 or 3",
            ));
        }

        if !self.risk_threshold.is_finite()
            || self.risk_threshold <= 0.0
            || self.risk_threshold > 1.0
        {
            return Err(FuseguardError::validation(
                "balancer.risk_threshold",
                "Must be in (0, 1]",
            ));
        }

        if self.min_recovery_window_secs == 0 {
            return Err(FuseguardError::validation(
                "balancer.min_recovery_window_secs",
                "Must be greater than 0",
            ));
        }

        if self.recovery_window_max_secs < self.min_recovery_window_secs {
            return Err(FuseguardError::validation(
                "balancer.recovery_window_max_secs",
                "Must not be below min_recovery_window_secs",
            ));
        }

        if !self.recovery_growth_factor.is_finite() || self.recovery_growth_factor < 1.0 {
            return Err(FuseguardError::validation(
                "balancer.recovery_growth_factor",
                "Must be at least 1.0",
            ));
        }

        if self.risk_decay_window_secs == 0 {
            return Err(FuseguardError::validation(
                "balancer.risk_decay_window_secs",
                "Must be greater than 0",
            ));
        }

        if self.max_meter_failures == 0 {
            return Err(FuseguardError::validation(
                "balancer.max_meter_failures",
                "Must be greater than 0",
            ));
        }

        if self.tick_interval_ms == 0 {
            return Err(FuseguardError::validation(
                "balancer.tick_interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.convergence_ticks == 0 {
            return Err(FuseguardError::validation(
                "balancer.convergence_ticks",
                "Must be greater than 0",
            ));
        }

        if self.io_timeout_ms == 0 {
            return Err(FuseguardError::validation(
                "balancer.io_timeout_ms",
                "Must be greater than 0",
            ));
        }

        if !self.min_plausible_voltage.is_finite() || self.min_plausible_voltage <= 0.0 {
            return Err(FuseguardError::validation(
                "balancer.min_plausible_voltage",
                "Must be positive",
            ));
        }

        if let Some(points) = &self.breaker_curve.points {
            crate::breaker::validate_points(points)?;
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first location that exists
    pub fn load() -> Result<Self> {
        if let Some(explicit) = std::env::var_os(CONFIG_PATH_ENV) {
            return Self::from_file(explicit);
        }

        let default_paths = [
            "fuseguard.yaml",
            "/data/fuseguard.yaml",
            "/etc/fuseguard/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.balancer.validate()?;

        crate::logging::level::parse_log_level(&self.logging.level).map_err(|_| {
            FuseguardError::validation("logging.level", "Unknown log level")
        })?;

        if self.charger_device.identifiers.is_empty() {
            return Err(FuseguardError::validation(
                "charger_device.identifiers",
                "At least one identifier is required",
            ));
        }

        if self.meter_device.identifiers.is_empty() {
            return Err(FuseguardError::validation(
                "meter_device.identifiers",
                "At least one identifier is required",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.balancer.phase_count, 3);
        assert_eq!(config.balancer.min_current_amps, 6);
        assert_eq!(config.balancer.min_recovery_window(), Duration::from_secs(900));
        assert_eq!(config.balancer.mode, OvercurrentMode::Optimised);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.balancer.fuse_rating_amps = 0.0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.balancer.phase_count = 4;
        assert!(config.validate().is_err());

        config = Config::default();
        config.balancer.risk_threshold = 0.0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.logging.level = "LOUD".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "balancer:\n  fuse_rating_amps: 35\n  mode: conservative\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.balancer.fuse_rating_amps, 35.0);
        assert_eq!(config.balancer.mode, OvercurrentMode::Conservative);
        assert_eq!(config.balancer.max_meter_failures, 5);
        assert!(config.validate().is_ok());
    }
}
