//! Optimised policy: act on accumulated thermal risk instead of single samples.

use super::{EvalContext, LimitDecision, PhaseControlState, PhaseState, RISK_EPSILON};
use crate::events::ChangeReason;

pub struct RiskAccumulator;

impl RiskAccumulator {
    /// Ratio of net draw to fuse rating for a given headroom
    pub fn overcurrent_ratio(available: f64, fuse_rating_amps: f64) -> f64 {
        (fuse_rating_amps - available) / fuse_rating_amps
    }

    /// Accumulate or decay risk for one tick; reduce once the threshold is reached
    pub fn evaluate(state: &mut PhaseControlState, ctx: &EvalContext<'_>) -> Option<LimitDecision> {
        let available = state.available_current;
        if available < 0.0 {
            let ratio = Self::overcurrent_ratio(available, ctx.config.fuse_rating_amps);
            state.risk_score += ctx.thermal.risk_increment(ratio, ctx.tick);
            if state.state == PhaseState::Normal {
                state.state = PhaseState::Accumulating;
            }
            if state.risk_score + RISK_EPSILON >= state.risk_threshold {
                let target = ctx.reduced_limit(state, available);
                return state.limit_to(target, ChangeReason::RiskLimit, ctx.now);
            }
            return None;
        }

        Self::decay(state, ctx);
        if state.state == PhaseState::Accumulating && state.risk_score <= 0.0 {
            state.state = PhaseState::Normal;
        }
        None
    }

    /// Linear decay: a full threshold's worth drains over the decay window
    fn decay(state: &mut PhaseControlState, ctx: &EvalContext<'_>) {
        if state.risk_score <= 0.0 {
            state.risk_score = 0.0;
            return;
        }
        let window = ctx.config.risk_decay_window().as_secs_f64();
        let step = state.risk_threshold * ctx.tick.as_secs_f64() / window;
        state.risk_score = (state.risk_score - step).max(0.0);
    }
}
