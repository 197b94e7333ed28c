//! Simulated meter and charger
//!
//! Cloneable handles over shared state so a test (or the demo binary) can keep
//! steering a device after handing a boxed copy to the controller. A meter
//! linked to a charger adds the charger's draw to its consumption, closing the
//! loop the way a real grid meter sees an EV.

use crate::charger::Charger;
use crate::config::SimulationConfig;
use crate::device::{ChargerRegistry, MeterRegistry, SIMULATED_DOMAIN};
use crate::error::{FuseguardError, Result};
use crate::meter::{Meter, PhaseReading};
use crate::types::{ChargerCommand, CommandTarget, Phase};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[derive(Debug)]
struct ChargerInner {
    max_amps: u32,
    synced: bool,
    limits: BTreeMap<Phase, u32>,
    car_connected: bool,
    enabled: bool,
    reachable: bool,
    failing_commands: u32,
    ignore_commands: bool,
    history: Vec<ChargerCommand>,
}

/// Simulated EV charger
#[derive(Debug, Clone)]
pub struct SimulatedCharger {
    id: Arc<str>,
    inner: Arc<RwLock<ChargerInner>>,
}

impl SimulatedCharger {
    pub fn new(max_amps: u32, initial_limit: u32, synced: bool) -> Self {
        Self::with_id("sim-charger", max_amps, initial_limit, synced)
    }

    pub fn with_id(id: &str, max_amps: u32, initial_limit: u32, synced: bool) -> Self {
        let limits = Phase::ALL
            .iter()
            .map(|p| (*p, initial_limit.min(max_amps)))
            .collect();
        Self {
            id: Arc::from(id),
            inner: Arc::new(RwLock::new(ChargerInner {
                max_amps,
                synced,
                limits,
                car_connected: true,
                enabled: true,
                reachable: true,
                failing_commands: 0,
                ignore_commands: false,
                history: Vec::new(),
            })),
        }
    }

    pub fn limit(&self, phase: Phase) -> u32 {
        read(&self.inner).limits.get(&phase).copied().unwrap_or(0)
    }

    /// Every command received (including ignored ones), oldest first
    pub fn commands(&self) -> Vec<ChargerCommand> {
        read(&self.inner).history.clone()
    }

    pub fn set_car_connected(&self, connected: bool) {
        write(&self.inner).car_connected = connected;
    }

    pub fn set_enabled(&self, enabled: bool) {
        write(&self.inner).enabled = enabled;
    }

    pub fn set_reachable(&self, reachable: bool) {
        write(&self.inner).reachable = reachable;
    }

    /// Reject the next `n` set-limit commands
    pub fn fail_next_commands(&self, n: u32) {
        write(&self.inner).failing_commands = n;
    }

    /// Acknowledge commands without applying them
    pub fn set_ignore_commands(&self, ignore: bool) {
        write(&self.inner).ignore_commands = ignore;
    }

    /// Change the limit at the charger itself, as its owner would from an app
    pub fn set_limit_locally(&self, target: CommandTarget, amps: u32) {
        let mut inner = write(&self.inner);
        let amps = amps.min(inner.max_amps);
        match target {
            CommandTarget::Phase(p) if !inner.synced => {
                inner.limits.insert(p, amps);
            }
            _ => inner.limits.values_mut().for_each(|l| *l = amps),
        }
    }

    /// Current drawn by the car on `phase`
    pub fn draw(&self, phase: Phase) -> f64 {
        let inner = read(&self.inner);
        if inner.car_connected && inner.enabled {
            f64::from(inner.limits.get(&phase).copied().unwrap_or(0))
        } else {
            0.0
        }
    }

    fn check_reachable(&self, inner: &ChargerInner) -> Result<()> {
        if inner.reachable {
            Ok(())
        } else {
            Err(FuseguardError::charger_unreachable(format!(
                "{} does not respond",
                self.id
            )))
        }
    }
}

#[async_trait::async_trait]
impl Charger for SimulatedCharger {
    fn id(&self) -> &str {
        &self.id
    }

    async fn current_limit(&self, phase: Phase) -> Result<u32> {
        let inner = read(&self.inner);
        self.check_reachable(&inner)?;
        Ok(inner.limits.get(&phase).copied().unwrap_or(0))
    }

    async fn max_current_limit(&self) -> Result<u32> {
        let inner = read(&self.inner);
        self.check_reachable(&inner)?;
        Ok(inner.max_amps)
    }

    async fn set_current_limit(&self, target: CommandTarget, amps: u32) -> Result<()> {
        let mut inner = write(&self.inner);
        self.check_reachable(&inner)?;
        if inner.failing_commands > 0 {
            inner.failing_commands -= 1;
            return Err(FuseguardError::charger_command_failed("command rejected"));
        }
        inner.history.push(ChargerCommand { target, amps });
        if inner.ignore_commands {
            return Ok(());
        }
        let amps = amps.min(inner.max_amps);
        let synced = inner.synced;
        match target {
            CommandTarget::Phase(p) if !synced => {
                inner.limits.insert(p, amps);
            }
            _ => {
                for limit in inner.limits.values_mut() {
                    *limit = amps;
                }
            }
        }
        Ok(())
    }

    async fn car_connected(&self) -> Result<bool> {
        let inner = read(&self.inner);
        self.check_reachable(&inner)?;
        Ok(inner.car_connected)
    }

    async fn can_charge(&self) -> Result<bool> {
        let inner = read(&self.inner);
        self.check_reachable(&inner)?;
        Ok(inner.car_connected && inner.enabled)
    }

    async fn is_charging(&self) -> Result<bool> {
        let inner = read(&self.inner);
        self.check_reachable(&inner)?;
        let min = inner.limits.values().copied().min().unwrap_or(0);
        Ok(inner.car_connected && inner.enabled && min > 0)
    }

    fn has_synced_phase_limits(&self) -> bool {
        read(&self.inner).synced
    }
}

#[derive(Debug)]
struct MeterInner {
    voltage: BTreeMap<Phase, f64>,
    load_w: BTreeMap<Phase, f64>,
    production_w: BTreeMap<Phase, f64>,
    failing: BTreeSet<Phase>,
    charger: Option<SimulatedCharger>,
}

/// Simulated per-phase grid meter
#[derive(Debug, Clone)]
pub struct SimulatedMeter {
    inner: Arc<RwLock<MeterInner>>,
}

impl SimulatedMeter {
    pub fn new(voltage: f64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MeterInner {
                voltage: Phase::ALL.iter().map(|p| (*p, voltage)).collect(),
                load_w: Phase::ALL.iter().map(|p| (*p, 0.0)).collect(),
                production_w: Phase::ALL.iter().map(|p| (*p, 0.0)).collect(),
                failing: BTreeSet::new(),
                charger: None,
            })),
        }
    }

    /// Meter whose consumption includes the charger's draw
    pub fn linked(voltage: f64, charger: SimulatedCharger) -> Self {
        let meter = Self::new(voltage);
        write(&meter.inner).charger = Some(charger);
        meter
    }

    /// Household load (excluding any linked charger) in watts
    pub fn set_load(&self, phase: Phase, watts: f64) {
        write(&self.inner).load_w.insert(phase, watts);
    }

    /// Set load so the phase draws `amps` at its current voltage
    pub fn set_load_amps(&self, phase: Phase, amps: f64) {
        let mut inner = write(&self.inner);
        let v = inner.voltage.get(&phase).copied().unwrap_or(230.0);
        inner.load_w.insert(phase, amps * v);
    }

    pub fn set_production(&self, phase: Phase, watts: f64) {
        write(&self.inner).production_w.insert(phase, watts);
    }

    pub fn set_voltage(&self, phase: Phase, volts: f64) {
        write(&self.inner).voltage.insert(phase, volts);
    }

    /// Make reads of `phase` fail until cleared
    pub fn set_failing(&self, phase: Phase, failing: bool) {
        let mut inner = write(&self.inner);
        if failing {
            inner.failing.insert(phase);
        } else {
            inner.failing.remove(&phase);
        }
    }
}

#[async_trait::async_trait]
impl Meter for SimulatedMeter {
    async fn read_phase(&self, phase: Phase) -> Result<PhaseReading> {
        let inner = read(&self.inner);
        if inner.failing.contains(&phase) {
            return Err(FuseguardError::meter_unavailable(phase, "meter offline"));
        }
        let voltage = inner.voltage.get(&phase).copied().unwrap_or(0.0);
        let ev_w = inner
            .charger
            .as_ref()
            .map_or(0.0, |c| c.draw(phase) * voltage);
        Ok(PhaseReading {
            voltage,
            consumption_w: inner.load_w.get(&phase).copied().unwrap_or(0.0) + ev_w,
            production_w: inner.production_w.get(&phase).copied().unwrap_or(0.0),
        })
    }
}

/// A simulated installation: one charger and a meter that sees it
#[derive(Debug, Clone)]
pub struct SimulatedPlant {
    pub charger: SimulatedCharger,
    pub meter: SimulatedMeter,
}

impl SimulatedPlant {
    pub fn from_config(config: &SimulationConfig) -> Self {
        let charger = SimulatedCharger::new(
            config.charger_max_amps,
            config.initial_limit_amps,
            config.synced_phase_limits,
        );
        charger.set_car_connected(config.car_connected);
        let meter = SimulatedMeter::linked(config.voltage, charger.clone());
        for (i, phase) in Phase::ALL.iter().enumerate() {
            meter.set_load(*phase, config.base_load_w.get(i).copied().unwrap_or(0.0));
            meter.set_production(*phase, config.production_w.get(i).copied().unwrap_or(0.0));
        }
        Self { charger, meter }
    }

    /// Make the plant's devices bindable from `simulated` device records
    pub fn register(&self, chargers: &mut ChargerRegistry, meters: &mut MeterRegistry) {
        let charger = self.charger.clone();
        chargers.register(
            "simulated-charger",
            |r| r.has_domain(SIMULATED_DOMAIN),
            move |_| Ok(Box::new(charger.clone()) as Box<dyn Charger>),
        );
        let meter = self.meter.clone();
        meters.register(
            "simulated-meter",
            |r| r.has_domain(SIMULATED_DOMAIN),
            move |_| Ok(Box::new(meter.clone()) as Box<dyn Meter>),
        );
    }
}
