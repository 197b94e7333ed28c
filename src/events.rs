//! Balancer event records and their broadcast bus

use crate::error::ErrorKind;
use crate::logging::{StructuredLogger, get_logger};
use crate::types::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Why a limit changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeReason {
    RiskLimit,
    ConservativeLimit,
    Recovery,
    MeterFailsafe,
}

impl ChangeReason {
    pub fn is_reduction(&self) -> bool {
        !matches!(self, ChangeReason::Recovery)
    }
}

impl fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeReason::RiskLimit => "RISK_LIMIT",
            ChangeReason::ConservativeLimit => "CONSERVATIVE_LIMIT",
            ChangeReason::Recovery => "RECOVERY",
            ChangeReason::MeterFailsafe => "METER_FAILSAFE",
        };
        f.write_str(s)
    }
}

/// Emitted for every charger command that was acknowledged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitChangeEvent {
    pub id: Uuid,
    /// `None` when one limit was applied to all phases
    pub phase: Option<Phase>,
    pub previous_limit: u32,
    pub new_limit: u32,
    pub reason: ChangeReason,
    pub timestamp: DateTime<Utc>,
}

impl LimitChangeEvent {
    pub fn new(
        phase: Option<Phase>,
        previous_limit: u32,
        new_limit: u32,
        reason: ChangeReason,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase,
            previous_limit,
            new_limit,
            reason,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultEvent {
    pub kind: ErrorKind,
    pub phase: Option<Phase>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BalancerEvent {
    LimitChanged(LimitChangeEvent),
    Fault(FaultEvent),
}

impl BalancerEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            BalancerEvent::LimitChanged(e) => e.timestamp,
            BalancerEvent::Fault(e) => e.timestamp,
        }
    }

    pub fn as_limit_change(&self) -> Option<&LimitChangeEvent> {
        match self {
            BalancerEvent::LimitChanged(e) => Some(e),
            BalancerEvent::Fault(_) => None,
        }
    }

    pub fn as_fault(&self) -> Option<&FaultEvent> {
        match self {
            BalancerEvent::Fault(e) => Some(e),
            BalancerEvent::LimitChanged(_) => None,
        }
    }
}

fn phase_label(phase: Option<Phase>) -> String {
    phase.map_or_else(|| "ALL".to_string(), |p| p.to_string())
}

/// Fan-out of balancer events to any number of subscribers.
///
/// Every emitted event is also written to the log, so a bus without
/// subscribers still leaves a trace.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BalancerEvent>,
    logger: StructuredLogger,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            logger: get_logger("events"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BalancerEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`; lagging subscribers see `Err(Lagged)` items
    pub fn stream(&self) -> BroadcastStream<BalancerEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Log and publish an event
    pub fn emit(&self, event: BalancerEvent) {
        match &event {
            BalancerEvent::LimitChanged(e) => self.logger.info(&format!(
                "limit {} {} -> {} A ({})",
                phase_label(e.phase),
                e.previous_limit,
                e.new_limit,
                e.reason
            )),
            BalancerEvent::Fault(e) => self.logger.warn(&format!(
                "fault {} on {}: {}",
                e.kind,
                phase_label(e.phase),
                e.message
            )),
        }
        // No subscribers is not an error
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
