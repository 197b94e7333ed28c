use super::{ControllerStatus, LoadBalancerController};
use crate::balancer::PhaseControlState;
use crate::charger::ChargerLink;
use crate::config::BalancerConfig;
use crate::types::{OvercurrentMode, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Read-only copy of the controller state, published after every tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: ControllerStatus,
    pub mode: OvercurrentMode,
    pub fuse_rating_amps: f64,
    pub ceiling_amps: u32,
    pub charger_id: String,
    pub charger_reachable: bool,
    pub synced_phase_limits: bool,
    pub phases: Vec<PhaseControlState>,
    /// Limits the charger last acknowledged
    pub acknowledged_limits: BTreeMap<Phase, u32>,
    pub last_check_at: Option<DateTime<Utc>>,
    pub total_ticks: u64,
    pub commands_sent: u64,
    pub command_failures: u64,
    pub overrun_count: u64,
}

impl ControllerSnapshot {
    pub(super) fn initial<'a>(
        config: &BalancerConfig,
        phases: impl Iterator<Item = &'a PhaseControlState>,
        charger: &ChargerLink,
        ceiling_amps: u32,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            status: ControllerStatus::AwaitingCharger,
            mode: config.mode,
            fuse_rating_amps: config.fuse_rating_amps,
            ceiling_amps,
            charger_id: charger.id().to_string(),
            charger_reachable: true,
            synced_phase_limits: charger.has_synced_phase_limits(),
            phases: phases.cloned().collect(),
            acknowledged_limits: BTreeMap::new(),
            last_check_at: None,
            total_ticks: 0,
            commands_sent: 0,
            command_failures: 0,
            overrun_count: 0,
        }
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseControlState> {
        self.phases.iter().find(|s| s.phase == phase)
    }
}

impl LoadBalancerController {
    pub(super) fn build_snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            timestamp: Utc::now(),
            status: self.status,
            mode: self.config.mode,
            fuse_rating_amps: self.config.fuse_rating_amps,
            ceiling_amps: self.ceiling(),
            charger_id: self.charger.id().to_string(),
            charger_reachable: self.charger_reachable,
            synced_phase_limits: self.charger.has_synced_phase_limits(),
            phases: self.states.values().cloned().collect(),
            acknowledged_limits: self.last_sent.clone(),
            last_check_at: self.last_check_at,
            total_ticks: self.total_ticks,
            commands_sent: self.commands_sent,
            command_failures: self.command_failures,
            overrun_count: self.overrun_count,
        }
    }

    pub(super) fn publish_snapshot(&self) {
        // Receivers may all be gone; the controller keeps one itself
        let _ = self.snapshot_tx.send(Arc::new(self.build_snapshot()));
    }

    pub fn snapshot(&self) -> Arc<ControllerSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    pub fn subscribe_snapshots(&self) -> tokio::sync::watch::Receiver<Arc<ControllerSnapshot>> {
        self.snapshot_rx.clone()
    }
}
