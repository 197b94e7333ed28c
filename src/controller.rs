//! Load balancer controller
//!
//! Owns the meter, the charger and every phase's control state, and turns
//! each tick's readings into at most one command per phase (or a single
//! coalesced command for chargers with synced phase limits).

mod runtime;
mod snapshot;
mod tick;


pub use snapshot::ControllerSnapshot;
pub use tick::TickReport;

use crate::balancer::{PhaseControlState, limit_ceiling};
use crate::breaker::BreakerThermalModel;
use crate::charger::{Charger, ChargerLink};
use crate::config::BalancerConfig;
use crate::error::Result;
use crate::events::{ChangeReason, EventBus};
use crate::logging::{LogContext, StructuredLogger, get_logger_with_context};
use crate::meter::{Meter, PhaseMeterReader};
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Whether the controller is currently able to steer the charger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ControllerStatus {
    /// No car, charging not possible, or charger not answering
    #[default]
    AwaitingCharger,
    MonitoringLoads,
}

/// Cloneable handle that stops a running controller after its current tick
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        // A stopped controller has nothing left to signal
        let _ = self.tx.send(());
    }
}

pub struct LoadBalancerController {
    config: BalancerConfig,
    thermal: BreakerThermalModel,
    phases: Vec<Phase>,
    meter: PhaseMeterReader,
    charger: ChargerLink,
    states: BTreeMap<Phase, PhaseControlState>,
    events: EventBus,
    logger: StructuredLogger,

    status: ControllerStatus,
    /// Charger limits have been read once and adopted as baseline
    baseline_seeded: bool,
    charger_max: Option<u32>,
    charger_reachable: bool,
    /// A car is connected and charging is possible
    session_active: bool,
    /// Last value the charger acknowledged per phase
    last_sent: BTreeMap<Phase, u32>,
    last_command_at: Option<DateTime<Utc>>,
    last_reason: BTreeMap<Phase, ChangeReason>,
    /// Consecutive settled ticks the charger reported something other than `last_sent`
    mismatched_ticks: BTreeMap<Phase, u32>,

    last_check_at: Option<DateTime<Utc>>,
    total_ticks: u64,
    commands_sent: u64,
    command_failures: u64,
    overrun_count: u64,

    snapshot_tx: watch::Sender<Arc<ControllerSnapshot>>,
    snapshot_rx: watch::Receiver<Arc<ControllerSnapshot>>,
    shutdown_tx: mpsc::UnboundedSender<()>,
    shutdown_rx: mpsc::UnboundedReceiver<()>,
}

impl LoadBalancerController {
    /// Build a controller; an invalid configuration is rejected here and
    /// no controller exists afterwards.
    pub fn new(
        config: BalancerConfig,
        meter: Box<dyn Meter>,
        charger: Box<dyn Charger>,
    ) -> Result<Self> {
        config.validate()?;
        let thermal = BreakerThermalModel::from_config(&config.breaker_curve)?;
        let phases = Phase::active(config.phase_count);
        let charger = ChargerLink::new(charger, config.io_timeout());
        let logger = get_logger_with_context(
            LogContext::new("controller").with_charger(charger.id()),
        );

        let ceiling = limit_ceiling(config.fuse_rating_amps, u32::MAX, config.min_current_amps);
        let states: BTreeMap<Phase, PhaseControlState> = phases
            .iter()
            .map(|p| (*p, PhaseControlState::new(*p, &config, ceiling)))
            .collect();

        let meter = PhaseMeterReader::new(meter, config.io_timeout(), config.min_plausible_voltage);
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(ControllerSnapshot::initial(
            &config,
            states.values(),
            &charger,
            ceiling,
        )));

        let controller = Self {
            thermal,
            phases,
            meter,
            charger,
            states,
            events: EventBus::default(),
            logger,
            status: ControllerStatus::AwaitingCharger,
            baseline_seeded: false,
            charger_max: None,
            charger_reachable: true,
            session_active: false,
            last_sent: BTreeMap::new(),
            last_command_at: None,
            last_reason: BTreeMap::new(),
            mismatched_ticks: BTreeMap::new(),
            last_check_at: None,
            total_ticks: 0,
            commands_sent: 0,
            command_failures: 0,
            overrun_count: 0,
            snapshot_tx,
            snapshot_rx,
            shutdown_tx,
            shutdown_rx,
            config,
        };

        controller.logger.info(&format!(
            "Load balancer ready: {} phase(s), {} A fuse, {:?} mode",
            controller.phases.len(),
            controller.config.fuse_rating_amps,
            controller.config.mode
        ));
        Ok(controller)
    }

    /// Replace the event bus, e.g. to share one bus between components
    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    /// Copy of one phase's control state
    pub fn phase_state(&self, phase: Phase) -> Option<PhaseControlState> {
        self.states.get(&phase).cloned()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Highest limit allowed right now
    fn ceiling(&self) -> u32 {
        limit_ceiling(
            self.config.fuse_rating_amps,
            self.charger_max.unwrap_or(u32::MAX),
            self.config.min_current_amps,
        )
    }

    fn phase_logger(&self, phase: Phase) -> StructuredLogger {
        self.logger.for_phase(phase)
    }
}
