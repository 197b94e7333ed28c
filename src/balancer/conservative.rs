use super::{EvalContext, LimitDecision, PhaseControlState};
use crate::events::ChangeReason;

/// Zero-tolerance policy: every overcurrent sample reduces the limit at once.
/// Risk fields are left untouched.
pub struct ConservativeLimiter;

impl ConservativeLimiter {
    pub fn evaluate(state: &mut PhaseControlState, ctx: &EvalContext<'_>) -> Option<LimitDecision> {
        let available = state.available_current;
        if available >= 0.0 {
            return None;
        }
        let target = ctx.reduced_limit(state, available);
        state.limit_to(target, ChangeReason::ConservativeLimit, ctx.now)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{config, ctx};
    use super::super::{PhaseState, evaluate_phase};
    use super::*;
    use crate::breaker::{BreakerCharacteristic, BreakerThermalModel};
    use crate::types::{OvercurrentMode, Phase};
    use chrono::Utc;

    #[test]
    fn first_overcurrent_tick_reduces() {
        let cfg = config(OvercurrentMode::Conservative);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &th, Utc::now());
        let mut st = PhaseControlState::new(Phase::L1, &cfg, 16);

        let d = evaluate_phase(&mut st, -0.2, &c).unwrap();
        assert_eq!(d.reason, ChangeReason::ConservativeLimit);
        assert_eq!(d.new_limit, 15);
        assert_eq!(st.state, PhaseState::Limited);
        assert!(st.risk_score.abs() < f64::EPSILON);
    }

    #[test]
    fn at_minimum_stays_limited_without_decision() {
        let cfg = config(OvercurrentMode::Conservative);
        let th = BreakerThermalModel::for_characteristic(BreakerCharacteristic::B);
        let c = ctx(&cfg, &th, Utc::now());
        let mut st = PhaseControlState::new(Phase::L1, &cfg, 6);
        assert!(evaluate_phase(&mut st, -3.0, &c).is_none());
        assert_eq!(st.applied_limit, 6);
        assert_eq!(st.state, PhaseState::Limited);
    }
}
