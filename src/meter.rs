//! Meter capability and per-phase sampling
//!
//! A `Meter` is any device that reports voltage and consumed/produced power
//! per phase. `PhaseMeterReader` turns its raw readings into validated
//! `PhaseSample`s; anything stale, slow, non-finite or with an implausible
//! voltage becomes `MeterUnavailable`.

use crate::error::{FuseguardError, Result};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;

/// Raw per-phase reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseReading {
    pub voltage: f64,
    pub consumption_w: f64,
    pub production_w: f64,
}

#[async_trait::async_trait]
pub trait Meter: Send + Sync {
    /// Read one phase. Implementations return `MeterUnavailable` when stale or disconnected.
    async fn read_phase(&self, phase: Phase) -> Result<PhaseReading>;
}

/// Validated sample for one phase and one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseSample {
    pub phase: Phase,
    pub voltage: f64,
    pub consumption_w: f64,
    pub production_w: f64,
    pub timestamp: DateTime<Utc>,
}

impl PhaseSample {
    /// Net current drawn from the supply (negative when exporting)
    pub fn net_current(&self) -> f64 {
        (self.consumption_w - self.production_w) / self.voltage
    }
}

/// Samples phases from a meter with timeout and plausibility checks
pub struct PhaseMeterReader {
    meter: Box<dyn Meter>,
    io_timeout: Duration,
    min_plausible_voltage: f64,
    logger: StructuredLogger,
}

impl PhaseMeterReader {
    pub fn new(meter: Box<dyn Meter>, io_timeout: Duration, min_plausible_voltage: f64) -> Self {
        Self {
            meter,
            io_timeout,
            min_plausible_voltage,
            logger: get_logger_with_context(LogContext::new("meter")),
        }
    }

    /// Read and validate one phase
    pub async fn sample(&self, phase: Phase, now: DateTime<Utc>) -> Result<PhaseSample> {
        let reading = match timeout(self.io_timeout, self.meter.read_phase(phase)).await {
            Ok(Ok(r)) => r,
            Ok(Err(FuseguardError::MeterUnavailable { message, .. })) => {
                return Err(FuseguardError::meter_unavailable(phase, message));
            }
            Ok(Err(e)) => return Err(FuseguardError::meter_unavailable(phase, e.to_string())),
            Err(_) => {
                return Err(FuseguardError::meter_unavailable(
                    phase,
                    format!("no reading within {} ms", self.io_timeout.as_millis()),
                ));
            }
        };

        let sample = validate_reading(phase, reading, self.min_plausible_voltage, now)?;
        self.logger.trace(&format!(
            "{} sample: {:.1} V, {:.0} W consumed, {:.0} W produced",
            phase, sample.voltage, sample.consumption_w, sample.production_w
        ));
        Ok(sample)
    }
}

fn validate_reading(
    phase: Phase,
    reading: PhaseReading,
    min_plausible_voltage: f64,
    now: DateTime<Utc>,
) -> Result<PhaseSample> {
    if !reading.voltage.is_finite()
        || !reading.consumption_w.is_finite()
        || !reading.production_w.is_finite()
    {
        return Err(FuseguardError::meter_unavailable(
            phase,
            "non-finite reading",
        ));
    }
    if reading.voltage < min_plausible_voltage {
        return Err(FuseguardError::meter_unavailable(
            phase,
            format!("implausible voltage {:.1} V", reading.voltage),
        ));
    }
    if reading.consumption_w < 0.0 || reading.production_w < 0.0 {
        return Err(FuseguardError::meter_unavailable(
            phase,
            "negative power reading",
        ));
    }
    Ok(PhaseSample {
        phase,
        voltage: reading.voltage,
        consumption_w: reading.consumption_w,
        production_w: reading.production_w,
        timestamp: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedMeter(Result<PhaseReading>);

    #[async_trait::async_trait]
    impl Meter for FixedMeter {
        async fn read_phase(&self, phase: Phase) -> Result<PhaseReading> {
            match &self.0 {
                Ok(r) => Ok(*r),
                Err(e) => Err(FuseguardError::meter_unavailable(phase, e.to_string())),
            }
        }
    }

    struct SlowMeter;

    #[async_trait::async_trait]
    impl Meter for SlowMeter {
        async fn read_phase(&self, _phase: Phase) -> Result<PhaseReading> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(PhaseReading {
                voltage: 230.0,
                consumption_w: 0.0,
                production_w: 0.0,
            })
        }
    }

    fn reader(meter: impl Meter + 'static) -> PhaseMeterReader {
        PhaseMeterReader::new(Box::new(meter), Duration::from_millis(50), 100.0)
    }

    #[tokio::test]
    async fn valid_reading_becomes_sample() {
        let r = reader(FixedMeter(Ok(PhaseReading {
            voltage: 230.0,
            consumption_w: 4600.0,
            production_w: 1150.0,
        })));
        let s = r.sample(Phase::L2, Utc::now()).await.unwrap();
        assert_eq!(s.phase, Phase::L2);
        assert!((s.net_current() - 15.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_voltage_is_unavailable() {
        let r = reader(FixedMeter(Ok(PhaseReading {
            voltage: 0.0,
            consumption_w: 100.0,
            production_w: 0.0,
        })));
        let err = r.sample(Phase::L1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, FuseguardError::MeterUnavailable { phase: Phase::L1, .. }));
    }

    #[tokio::test]
    async fn nan_power_is_unavailable() {
        let r = reader(FixedMeter(Ok(PhaseReading {
            voltage: 230.0,
            consumption_w: f64::NAN,
            production_w: 0.0,
        })));
        assert!(r.sample(Phase::L3, Utc::now()).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_meter_times_out() {
        let r = reader(SlowMeter);
        let err = r.sample(Phase::L1, Utc::now()).await.unwrap_err();
        assert!(err.to_string().contains("no reading within"));
    }
}
