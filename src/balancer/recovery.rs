//! Hysteresis for raising a limited phase again.
//!
//! Surplus must be continuously present for the current recovery window
//! before a higher limit is granted. An interruption restarts the clock and
//! grows the window, capped at the configured maximum.

use super::{EvalContext, LimitDecision, PhaseControlState, PhaseState};
use crate::events::ChangeReason;
use std::time::Duration;

pub struct RecoveryStabilizer;

impl RecoveryStabilizer {
    pub fn evaluate(state: &mut PhaseControlState, ctx: &EvalContext<'_>) -> Option<LimitDecision> {
        if state.state != PhaseState::Limited {
            return None;
        }

        let available = state.available_current;
        if available < 0.0 {
            Self::interrupt(state, ctx);
            return None;
        }

        let since = *state.surplus_since.get_or_insert(ctx.now);
        let stable_for = (ctx.now - since).to_std().unwrap_or(Duration::ZERO);
        if stable_for < state.current_recovery_window {
            return None;
        }

        let bound = state
            .requested_limit
            .unwrap_or(ctx.ceiling)
            .min(ctx.ceiling);
        let candidate = ctx.limit_for_headroom(state.limit_base(), available, bound);

        if candidate > state.applied_limit {
            let decision = state.change_limit(candidate, ChangeReason::Recovery);
            Self::settle(state, ctx, candidate >= bound);
            return decision;
        }
        if state.applied_limit >= bound {
            Self::settle(state, ctx, true);
        }
        // Otherwise headroom is too small to raise; keep the stability clock running
        None
    }

    /// Next window after an interrupted surplus period
    pub fn extended_window(current: Duration, growth_factor: f64, max: Duration) -> Duration {
        let grown = current.as_secs_f64() * growth_factor;
        if !grown.is_finite() || grown >= max.as_secs_f64() {
            max
        } else {
            Duration::from_secs_f64(grown).max(current)
        }
    }

    fn interrupt(state: &mut PhaseControlState, ctx: &EvalContext<'_>) {
        if state.surplus_since.take().is_none() {
            return;
        }
        state.current_recovery_window = Self::extended_window(
            state.current_recovery_window,
            ctx.config.recovery_growth_factor,
            ctx.config.recovery_window_max(),
        );
    }

    fn settle(state: &mut PhaseControlState, ctx: &EvalContext<'_>, fully_recovered: bool) {
        if fully_recovered {
            state.release(ctx.config);
        } else {
            state.surplus_since = None;
            state.current_recovery_window = ctx.config.min_recovery_window();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, ctx};
    use super::super::evaluate_phase;
    use super::*;
    use crate::breaker::{BreakerCharacteristic, BreakerThermalModel};
    use crate::types::{OvercurrentMode, Phase};
    use chrono::{TimeDelta, Utc};

    fn limited_state(cfg: &crate::config::BalancerConfig) -> PhaseControlState {
        let mut st = PhaseControlState::new(Phase::L1, cfg, 10);
        st.state = PhaseState::Limited;
        st.requested_limit = Some(16);
        st
    }

    #[test]
    fn no_recovery_before_window() {
        let cfg = config(OvercurrentMode::Conservative);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let t0 = Utc::now();
        let mut st = limited_state(&cfg);

        for secs in (0..900).step_by(30) {
            let c = ctx(&cfg, &th, t0 + TimeDelta::seconds(secs));
            assert!(evaluate_phase(&mut st, 10.0, &c).is_none());
        }
        assert_eq!(st.surplus_since, Some(t0));

        let c = ctx(&cfg, &th, t0 + TimeDelta::seconds(900));
        let d = evaluate_phase(&mut st, 10.0, &c).unwrap();
        assert_eq!(d.reason, ChangeReason::Recovery);
        assert_eq!(d.new_limit, 16);
        assert_eq!(st.state, PhaseState::Normal);
        assert_eq!(st.requested_limit, None);
        assert_eq!(st.surplus_since, None);
    }

    #[test]
    fn interruption_doubles_window_up_to_cap() {
        let cfg = config(OvercurrentMode::Optimised);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let t0 = Utc::now();
        let mut st = limited_state(&cfg);

        let expect = [1800, 3600, 3600];
        for (i, window) in expect.iter().enumerate() {
            let base = t0 + TimeDelta::seconds(i64::try_from(i).unwrap() * 10_000);
            evaluate_phase(&mut st, 2.0, &ctx(&cfg, &th, base));
            assert!(st.surplus_since.is_some());
            evaluate_phase(&mut st, -0.5, &ctx(&cfg, &th, base + TimeDelta::seconds(60)));
            assert_eq!(st.surplus_since, None);
            assert_eq!(st.current_recovery_window, Duration::from_secs(*window));
        }
    }

    #[test]
    fn recovery_is_bounded_by_current_headroom() {
        let cfg = config(OvercurrentMode::Conservative);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let t0 = Utc::now();
        let mut st = limited_state(&cfg);

        evaluate_phase(&mut st, 3.5, &ctx(&cfg, &th, t0));
        let c = ctx(&cfg, &th, t0 + TimeDelta::seconds(900));
        let d = evaluate_phase(&mut st, 3.5, &c).unwrap();
        assert_eq!(d.new_limit, 13);
        // Partial recovery stays limited with a fresh window
        assert_eq!(st.state, PhaseState::Limited);
        assert_eq!(st.current_recovery_window, cfg.min_recovery_window());
        assert_eq!(st.surplus_since, None);
    }

    #[test]
    fn too_little_headroom_keeps_clock_running() {
        let cfg = config(OvercurrentMode::Conservative);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let t0 = Utc::now();
        let mut st = limited_state(&cfg);

        evaluate_phase(&mut st, 0.4, &ctx(&cfg, &th, t0));
        let later = ctx(&cfg, &th, t0 + TimeDelta::seconds(1200));
        assert!(evaluate_phase(&mut st, 0.4, &later).is_none());
        assert_eq!(st.surplus_since, Some(t0));
        assert_eq!(st.applied_limit, 10);
    }

    #[test]
    fn recovery_adds_headroom_to_limit_in_force() {
        let cfg = config(OvercurrentMode::Conservative);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let t0 = Utc::now();
        // Own target 12 while a synced charger still holds the phase at 9
        let mut st = limited_state(&cfg);
        st.applied_limit = 12;
        st.limit_in_force = Some(9);

        evaluate_phase(&mut st, 4.0, &ctx(&cfg, &th, t0));
        let d = evaluate_phase(&mut st, 4.0, &ctx(&cfg, &th, t0 + TimeDelta::seconds(900))).unwrap();
        assert_eq!(d.previous_limit, 12);
        assert_eq!(d.new_limit, 13);
    }

    #[test]
    fn extended_window_caps_at_max() {
        let max = Duration::from_secs(3600);
        assert_eq!(
            RecoveryStabilizer::extended_window(Duration::from_secs(900), 2.0, max),
            Duration::from_secs(1800)
        );
        assert_eq!(
            RecoveryStabilizer::extended_window(Duration::from_secs(2400), 2.0, max),
            max
        );
        assert_eq!(
            RecoveryStabilizer::extended_window(Duration::from_secs(900), f64::INFINITY, max),
            max
        );
    }
}
