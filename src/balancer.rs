//! Per-phase balancing engine
//!
//! Pure, synchronous decision logic. Each phase owns a `PhaseControlState`
//! that only `evaluate_phase` and `apply_meter_failure` mutate; neither reads
//! another phase's state. The controller performs all I/O around these calls.

mod available;
mod conservative;
mod recovery;
mod risk;

pub use available::available_current;
pub use conservative::ConservativeLimiter;
pub use recovery::RecoveryStabilizer;
pub use risk::RiskAccumulator;

use crate::breaker::BreakerThermalModel;
use crate::config::BalancerConfig;
use crate::events::ChangeReason;
use crate::types::{OvercurrentMode, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Slack used when comparing accumulated risk with its threshold
pub(crate) const RISK_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseState {
    #[default]
    Normal,
    Accumulating,
    Limited,
}

/// Mutable control state of one phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseControlState {
    pub phase: Phase,
    pub state: PhaseState,
    /// Headroom observed on the last good sample; negative means overcurrent
    pub available_current: f64,
    pub risk_score: f64,
    pub risk_threshold: f64,
    pub last_reduction_at: Option<DateTime<Utc>>,
    pub surplus_since: Option<DateTime<Utc>>,
    pub current_recovery_window: Duration,
    /// Target limit for this phase in amperes
    pub applied_limit: u32,
    /// Bound recovery restores up to: the limit held before the phase was
    /// limited, or the ceiling once a session has started
    pub requested_limit: Option<u32>,
    /// Limit the charger currently applies to this phase, when known.
    /// Differs from `applied_limit` when a synced charger runs at another phase's target.
    pub limit_in_force: Option<u32>,
    pub consecutive_meter_failures: u32,
}

impl PhaseControlState {
    pub fn new(phase: Phase, config: &BalancerConfig, initial_limit: u32) -> Self {
        Self {
            phase,
            state: PhaseState::Normal,
            available_current: 0.0,
            risk_score: 0.0,
            risk_threshold: config.risk_threshold,
            last_reduction_at: None,
            surplus_since: None,
            current_recovery_window: config.min_recovery_window(),
            applied_limit: initial_limit,
            requested_limit: None,
            limit_in_force: None,
            consecutive_meter_failures: 0,
        }
    }

    pub fn is_limited(&self) -> bool {
        self.state == PhaseState::Limited
    }

    /// Limit the measured draw corresponds to; headroom is applied on top of it
    pub fn limit_base(&self) -> u32 {
        self.limit_in_force.unwrap_or(self.applied_limit)
    }

    /// Leave `Limited` and start the recovery clock afresh
    pub(crate) fn release(&mut self, config: &BalancerConfig) {
        self.requested_limit = None;
        self.surplus_since = None;
        self.current_recovery_window = config.min_recovery_window();
        self.state = if self.risk_score > 0.0 {
            PhaseState::Accumulating
        } else {
            PhaseState::Normal
        };
    }

    /// Enter `Limited` at `new_limit`; returns the decision if the limit moved
    pub(crate) fn limit_to(
        &mut self,
        new_limit: u32,
        reason: ChangeReason,
        now: DateTime<Utc>,
    ) -> Option<LimitDecision> {
        if self.state != PhaseState::Limited {
            self.requested_limit = Some(self.applied_limit);
        }
        self.state = PhaseState::Limited;
        self.risk_score = 0.0;
        self.last_reduction_at = Some(now);
        self.change_limit(new_limit, reason)
    }

    pub(crate) fn change_limit(
        &mut self,
        new_limit: u32,
        reason: ChangeReason,
    ) -> Option<LimitDecision> {
        if new_limit == self.applied_limit {
            return None;
        }
        let previous_limit = self.applied_limit;
        self.applied_limit = new_limit;
        Some(LimitDecision {
            phase: self.phase,
            previous_limit,
            new_limit,
            reason,
        })
    }
}

/// Per-tick inputs shared by every phase
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub now: DateTime<Utc>,
    pub tick: Duration,
    /// Highest permitted limit: fuse rating and charger maximum
    pub ceiling: u32,
    pub config: &'a BalancerConfig,
    pub thermal: &'a BreakerThermalModel,
}

impl EvalContext<'_> {
    pub fn min_limit(&self) -> u32 {
        self.config.min_current_amps.min(self.ceiling)
    }

    /// Floor `amps` into `[min_limit, upper]`
    pub fn clamp_limit(&self, amps: f64, upper: u32) -> u32 {
        let min = self.min_limit();
        let upper = upper.clamp(min, self.ceiling.max(min));
        if !amps.is_finite() || amps <= f64::from(min) {
            return min;
        }
        if amps >= f64::from(upper) {
            return upper;
        }
        // amps lies strictly between two u32 values here
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let floored = amps.floor() as u32;
        floored.clamp(min, upper)
    }

    /// Limit that removes the deficit (or uses the headroom) seen this tick
    pub fn limit_for_headroom(&self, current_limit: u32, available: f64, upper: u32) -> u32 {
        self.clamp_limit(f64::from(current_limit) + available, upper)
    }

    /// Reduced target for a phase in overcurrent, never above its own target
    pub fn reduced_limit(&self, state: &PhaseControlState, available: f64) -> u32 {
        self.limit_for_headroom(state.limit_base(), available, self.ceiling)
            .min(state.applied_limit)
    }
}

/// A limit change decided for one phase
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitDecision {
    pub phase: Phase,
    pub previous_limit: u32,
    pub new_limit: u32,
    pub reason: ChangeReason,
}

/// Highest limit allowed for a fuse rating and a charger maximum
pub fn limit_ceiling(fuse_rating_amps: f64, charger_max: u32, min_current: u32) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let fuse = if fuse_rating_amps.is_finite() && fuse_rating_amps > 0.0 {
        fuse_rating_amps.floor().min(f64::from(u32::MAX)) as u32
    } else {
        0
    };
    fuse.min(charger_max).max(min_current)
}

/// Run the active overcurrent policy and then the recovery stabilizer for one
/// phase with a fresh `available` headroom value.
pub fn evaluate_phase(
    state: &mut PhaseControlState,
    available: f64,
    ctx: &EvalContext<'_>,
) -> Option<LimitDecision> {
    state.available_current = available;
    state.consecutive_meter_failures = 0;
    state.applied_limit = ctx.clamp_limit(f64::from(state.applied_limit), ctx.ceiling);

    let reduction = match ctx.config.mode {
        OvercurrentMode::Optimised => RiskAccumulator::evaluate(state, ctx),
        OvercurrentMode::Conservative => ConservativeLimiter::evaluate(state, ctx),
    };
    let recovery = RecoveryStabilizer::evaluate(state, ctx);
    reduction.or(recovery)
}

/// Record a failed meter read. State is held; after `max_meter_failures`
/// consecutive failures the phase is forced to its minimum limit.
pub fn apply_meter_failure(
    state: &mut PhaseControlState,
    ctx: &EvalContext<'_>,
) -> Option<LimitDecision> {
    state.consecutive_meter_failures = state.consecutive_meter_failures.saturating_add(1);
    if state.consecutive_meter_failures < ctx.config.max_meter_failures {
        return None;
    }
    state.surplus_since = None;
    state.limit_to(ctx.min_limit(), ChangeReason::MeterFailsafe, ctx.now)
}

/// A car started a new charging session: aim for the ceiling, granting at
/// once whatever the last sample leaves room for and recovering the rest.
pub fn start_session(
    state: &mut PhaseControlState,
    ctx: &EvalContext<'_>,
) -> Option<LimitDecision> {
    state.surplus_since = None;
    state.current_recovery_window = ctx.config.min_recovery_window();
    if state.available_current < 0.0 {
        if state.applied_limit < ctx.ceiling {
            state.state = PhaseState::Limited;
            state.requested_limit = Some(ctx.ceiling);
        }
        return None;
    }

    let target = ctx
        .limit_for_headroom(state.limit_base(), state.available_current, ctx.ceiling)
        .max(state.applied_limit);
    if target >= ctx.ceiling {
        state.release(ctx.config);
    } else {
        state.state = PhaseState::Limited;
        state.requested_limit = Some(ctx.ceiling);
    }
    state.change_limit(target, ChangeReason::Recovery)
}

/// Take a limit set at the charger by someone else as this phase's target.
/// The phase stops recovering towards any earlier limit.
pub fn adopt_charger_limit(state: &mut PhaseControlState, amps: u32, ctx: &EvalContext<'_>) {
    state.applied_limit = ctx.clamp_limit(f64::from(amps), ctx.ceiling);
    state.limit_in_force = Some(amps);
    state.release(ctx.config);
}


#[cfg(test)]
mod tests {
    use super::test_support::{config, ctx};
    use super::*;
    use crate::breaker::BreakerCharacteristic;

    #[test]
    fn ceiling_is_min_of_fuse_and_charger() {
        assert_eq!(limit_ceiling(25.0, 32, 6), 25);
        assert_eq!(limit_ceiling(40.0, 16, 6), 16);
        assert_eq!(limit_ceiling(25.9, 32, 6), 25);
        assert_eq!(limit_ceiling(f64::NAN, 32, 6), 6);
    }

    #[test]
    fn clamp_limit_floors_into_bounds() {
        let cfg = config(OvercurrentMode::Optimised);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        assert_eq!(c.clamp_limit(13.9, 25), 13);
        assert_eq!(c.clamp_limit(2.0, 25), 6);
        assert_eq!(c.clamp_limit(-40.0, 25), 6);
        assert_eq!(c.clamp_limit(31.0, 25), 25);
        assert_eq!(c.clamp_limit(31.0, 40), 25);
        assert_eq!(c.clamp_limit(f64::NAN, 25), 6);
    }

    #[test]
    fn meter_failures_hold_state_then_failsafe() {
        let cfg = config(OvercurrentMode::Optimised);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        let mut st = PhaseControlState::new(Phase::L1, &cfg, 16);
        st.risk_score = 0.3;
        st.available_current = 2.0;

        for _ in 1..cfg.max_meter_failures {
            assert!(apply_meter_failure(&mut st, &c).is_none());
            assert_eq!(st.applied_limit, 16);
            assert!((st.risk_score - 0.3).abs() < 1e-12);
            assert!((st.available_current - 2.0).abs() < 1e-12);
        }

        let d = apply_meter_failure(&mut st, &c).unwrap();
        assert_eq!(d.new_limit, 6);
        assert_eq!(d.previous_limit, 16);
        assert_eq!(d.reason, ChangeReason::MeterFailsafe);
        assert!(st.is_limited());
        assert_eq!(st.requested_limit, Some(16));

        // Further failures keep the minimum without new decisions
        assert!(apply_meter_failure(&mut st, &c).is_none());
        assert_eq!(st.applied_limit, 6);
    }

    #[test]
    fn good_sample_resets_failure_counter() {
        let cfg = config(OvercurrentMode::Optimised);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        let mut st = PhaseControlState::new(Phase::L2, &cfg, 16);
        apply_meter_failure(&mut st, &c);
        apply_meter_failure(&mut st, &c);
        assert_eq!(st.consecutive_meter_failures, 2);
        evaluate_phase(&mut st, 5.0, &c);
        assert_eq!(st.consecutive_meter_failures, 0);
    }

    #[test]
    fn session_start_grants_headroom_and_recovers_the_rest() {
        let cfg = config(OvercurrentMode::Optimised);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());

        let mut st = PhaseControlState::new(Phase::L1, &cfg, 6);
        evaluate_phase(&mut st, 17.0, &c);
        let d = start_session(&mut st, &c).unwrap();
        assert_eq!(d.previous_limit, 6);
        assert_eq!(d.new_limit, 23);
        assert_eq!(d.reason, ChangeReason::Recovery);
        assert!(st.is_limited());
        assert_eq!(st.requested_limit, Some(25));

        let mut roomy = PhaseControlState::new(Phase::L2, &cfg, 6);
        evaluate_phase(&mut roomy, 30.0, &c);
        assert_eq!(start_session(&mut roomy, &c).unwrap().new_limit, 25);
        assert_eq!(roomy.state, PhaseState::Normal);
        assert_eq!(roomy.requested_limit, None);
    }

    #[test]
    fn session_start_in_overcurrent_only_moves_recovery_bound() {
        let cfg = config(OvercurrentMode::Optimised);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        let mut st = PhaseControlState::new(Phase::L1, &cfg, 10);
        evaluate_phase(&mut st, -1.0, &c);

        assert!(start_session(&mut st, &c).is_none());
        assert_eq!(st.applied_limit, 10);
        assert!(st.is_limited());
        assert_eq!(st.requested_limit, Some(25));
    }

    #[test]
    fn adopted_limit_replaces_target_and_recovery() {
        let cfg = config(OvercurrentMode::Conservative);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        let mut st = PhaseControlState::new(Phase::L3, &cfg, 16);
        evaluate_phase(&mut st, -6.0, &c);
        assert_eq!(st.requested_limit, Some(16));

        adopt_charger_limit(&mut st, 8, &c);
        assert_eq!(st.applied_limit, 8);
        assert_eq!(st.limit_in_force, Some(8));
        assert_eq!(st.state, PhaseState::Normal);
        assert_eq!(st.requested_limit, None);

        adopt_charger_limit(&mut st, 40, &c);
        assert_eq!(st.applied_limit, 25);
    }

    #[test]
    fn reduction_starts_from_limit_in_force() {
        let cfg = config(OvercurrentMode::Conservative);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        // Own target 20, but a synced charger runs this phase at 13
        let mut st = PhaseControlState::new(Phase::L2, &cfg, 20);
        st.limit_in_force = Some(13);

        let d = evaluate_phase(&mut st, -2.0, &c).unwrap();
        assert_eq!(d.previous_limit, 20);
        assert_eq!(d.new_limit, 11);
    }

    #[test]
    fn phases_are_evaluated_independently() {
        let cfg = config(OvercurrentMode::Conservative);
        let thermal = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &thermal, Utc::now());
        let mut l1 = PhaseControlState::new(Phase::L1, &cfg, 16);
        let mut l2 = PhaseControlState::new(Phase::L2, &cfg, 16);
        let before = l2.clone();

        assert!(evaluate_phase(&mut l1, -3.0, &c).is_some());
        assert_eq!(l2, before);
        assert!(evaluate_phase(&mut l2, 4.0, &c).is_none());
        assert_eq!(l1.applied_limit, 13);
        assert_eq!(l2.applied_limit, 16);
    }
}
