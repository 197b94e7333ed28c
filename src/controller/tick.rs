use super::{ControllerStatus, LoadBalancerController};
use crate::balancer::{
    EvalContext, LimitDecision, PhaseControlState, adopt_charger_limit, apply_meter_failure,
    available_current, evaluate_phase, start_session,
};
use crate::charger::ChargerStatus;
use crate::error::{ErrorKind, Result};
use crate::events::{BalancerEvent, ChangeReason, FaultEvent, LimitChangeEvent};
use crate::types::{ChargerCommand, CommandTarget, OvercurrentMode, Phase};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome of one tick
#[derive(Debug, Clone)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub status: ControllerStatus,
    /// Per-phase limit decisions taken this tick
    pub decisions: Vec<LimitDecision>,
    /// Commands the charger acknowledged
    pub commands: Vec<ChargerCommand>,
    pub failed_commands: Vec<ChargerCommand>,
    /// Increases held back until the minimum command interval has passed
    pub deferred: Vec<ChargerCommand>,
    /// A limit change was due but the charger could not take it
    pub suppressed: bool,
    pub meter_failures: Vec<Phase>,
    pub events: Vec<BalancerEvent>,
}

impl TickReport {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status: ControllerStatus::AwaitingCharger,
            decisions: Vec::new(),
            commands: Vec::new(),
            failed_commands: Vec::new(),
            deferred: Vec::new(),
            suppressed: false,
            meter_failures: Vec::new(),
            events: Vec::new(),
        }
    }
}

/// Charger state read at the start of a tick
struct ChargerView {
    status: ChargerStatus,
    limits: BTreeMap<Phase, u32>,
}

/// A command the current targets call for
struct PlannedCommand {
    command: ChargerCommand,
    previous: u32,
    reason: ChangeReason,
}

impl LoadBalancerController {
    /// Run one tick against the wall clock
    pub async fn tick(&mut self) -> Result<TickReport> {
        self.tick_at(Utc::now()).await
    }

    /// Run one tick at `now`.
    ///
    /// Reads the charger, then every phase's meter; runs the active policy and
    /// the recovery stabilizer per phase; finally sends whatever the new targets
    /// require, if the charger accepts commands. Failures of single reads or
    /// commands are reported as fault events, never as an error.
    pub async fn tick_at(&mut self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::new(now);

        let view = self.observe_charger(now, &mut report).await;
        let accepts = view
            .as_ref()
            .is_some_and(|v| v.status.accepts_commands());
        let mut new_session = false;
        if let Some(view) = &view {
            if !self.baseline_seeded {
                self.seed_baseline(&view.limits);
                if !self.config.new_session_on_startup {
                    self.session_active = accepts;
                }
            }
            new_session = accepts && !self.session_active;
            if self.session_active && !accepts {
                self.logger.info("Charging session ended");
            }
            self.session_active = accepts;
            if new_session {
                self.begin_session(&view.limits);
            } else {
                self.track_manual_changes(&view.limits, now);
            }
        }

        self.refresh_limits_in_force(view.as_ref(), now);
        self.evaluate_phases(now, new_session, &mut report).await;
        self.update_status(accepts);

        let planned = self.plan_commands();
        if accepts {
            for plan in planned {
                if self.holds_increase(&plan, now) {
                    self.logger.debug(&format!(
                        "Raise to {} A held: last command under {} s ago",
                        plan.command.amps,
                        self.config.min_command_interval().as_secs()
                    ));
                    report.deferred.push(plan.command);
                    continue;
                }
                self.dispatch(plan, now, &mut report).await;
            }
        } else if !planned.is_empty() || !report.decisions.is_empty() {
            report.suppressed = true;
            self.logger.debug(&format!(
                "{} limit change(s) held back: charger not accepting commands",
                planned.len().max(report.decisions.len())
            ));
        }

        report.status = self.status;
        self.last_check_at = Some(now);
        self.total_ticks = self.total_ticks.saturating_add(1);
        self.publish_snapshot();
        Ok(report)
    }

    async fn observe_charger(
        &mut self,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Option<ChargerView> {
        match self.read_charger().await {
            Ok(view) => {
                if !self.charger_reachable {
                    self.logger.info("Charger reachable again");
                }
                self.charger_reachable = true;
                Some(view)
            }
            Err(e) => {
                if self.charger_reachable {
                    self.charger_reachable = false;
                    self.fault(e.kind(), None, e.to_string(), now, report);
                } else {
                    self.logger.debug(&format!("Charger still unreachable: {}", e));
                }
                None
            }
        }
    }

    async fn read_charger(&mut self) -> Result<ChargerView> {
        let status = self.charger.status().await?;
        let max = self.charger.max_current_limit().await?;
        if self.charger_max != Some(max) {
            self.logger
                .debug(&format!("Charger advertises {} A maximum", max));
            self.charger_max = Some(max);
        }
        let mut limits = BTreeMap::new();
        for phase in &self.phases {
            limits.insert(*phase, self.charger.current_limit(*phase).await?);
        }
        Ok(ChargerView { status, limits })
    }

    /// Adopt the charger's configured limits the first time it answers
    fn seed_baseline(&mut self, limits: &BTreeMap<Phase, u32>) {
        let ceiling = self.ceiling();
        let min = self.config.min_current_amps.min(ceiling);
        for (phase, reported) in limits {
            if let Some(state) = self.states.get_mut(phase) {
                state.applied_limit = state.applied_limit.min((*reported).clamp(min, ceiling));
            }
            self.last_sent.insert(*phase, *reported);
        }
        self.baseline_seeded = true;
        self.logger.info(&format!(
            "Baseline charger limits adopted: {}",
            format_limits(limits)
        ));
    }

    /// A car became chargeable: take the charger's limits as they are now
    fn begin_session(&mut self, limits: &BTreeMap<Phase, u32>) {
        for (phase, reported) in limits {
            self.last_sent.insert(*phase, *reported);
        }
        self.mismatched_ticks.clear();
        self.logger.info(&format!(
            "Charging session started at {}",
            format_limits(limits)
        ));
    }

    /// Reported limits are not trusted while the last command settles
    fn settling(&self, now: DateTime<Utc>) -> bool {
        self.last_command_at
            .is_some_and(|at| elapsed(at, now) < self.config.command_settle())
    }

    fn holds_increase(&self, plan: &PlannedCommand, now: DateTime<Utc>) -> bool {
        plan.command.amps > plan.previous
            && self
                .last_command_at
                .is_some_and(|at| elapsed(at, now) < self.config.min_command_interval())
    }

    /// A limit the charger keeps reporting instead of the acknowledged one was
    /// set by someone else; after `convergence_ticks` it becomes the target.
    fn track_manual_changes(&mut self, limits: &BTreeMap<Phase, u32>, now: DateTime<Utc>) {
        if self.settling(now) {
            return;
        }
        let threshold = self.config.convergence_ticks;
        let mut changed = Vec::new();
        for (phase, reported) in limits {
            let Some(sent) = self.last_sent.get(phase).copied() else {
                continue;
            };
            if *reported == sent {
                self.mismatched_ticks.remove(phase);
                continue;
            }
            let ticks = self.mismatched_ticks.entry(*phase).or_default();
            *ticks = ticks.saturating_add(1);
            if *ticks >= threshold {
                changed.push((*phase, *reported, sent));
            }
        }

        let ceiling = self.ceiling();
        for (phase, reported, sent) in changed {
            self.mismatched_ticks.remove(&phase);
            self.last_sent.insert(phase, reported);
            self.last_reason.remove(&phase);
            let ctx = EvalContext {
                now,
                tick: self.config.tick_interval(),
                ceiling,
                config: &self.config,
                thermal: &self.thermal,
            };
            if let Some(state) = self.states.get_mut(&phase) {
                adopt_charger_limit(state, reported, &ctx);
            }
            self.phase_logger(phase).warn(&format!(
                "Charger limit changed outside the balancer: {} A (last commanded {} A), adopting it",
                reported, sent
            ));
        }
    }

    /// Record per phase the limit the charger applies; a synced charger runs
    /// every phase at the lowest one.
    fn refresh_limits_in_force(&mut self, view: Option<&ChargerView>, now: DateTime<Utc>) {
        let settling = self.settling(now);
        let mut limits = BTreeMap::new();
        for phase in &self.phases {
            let reported = view.and_then(|v| v.limits.get(phase)).copied();
            let sent = self.last_sent.get(phase).copied();
            let limit = if settling {
                sent.or(reported)
            } else {
                reported.or(sent)
            };
            if let Some(limit) = limit {
                limits.insert(*phase, limit);
            }
        }
        if self.charger.has_synced_phase_limits() {
            if let Some(lowest) = limits.values().min().copied() {
                limits.values_mut().for_each(|l| *l = lowest);
            }
        }
        for (phase, state) in self.states.iter_mut() {
            state.limit_in_force = limits.get(phase).copied();
        }
    }

    async fn evaluate_phases(
        &mut self,
        now: DateTime<Utc>,
        new_session: bool,
        report: &mut TickReport,
    ) {
        let ceiling = self.ceiling();
        let fuse = self.config.fuse_rating_amps;
        for phase in self.phases.clone() {
            let available = match self.meter.sample(phase, now).await {
                Ok(sample) => available_current(&sample, fuse),
                Err(e) => Err(e),
            };
            let ctx = EvalContext {
                now,
                tick: self.config.tick_interval(),
                ceiling,
                config: &self.config,
                thermal: &self.thermal,
            };
            let Some(state) = self.states.get_mut(&phase) else {
                continue;
            };
            let before = state.clone();
            let (decision, failure) = match available {
                Ok(available) => {
                    let decision = evaluate_phase(state, available, &ctx);
                    if new_session {
                        (merge(decision, start_session(state, &ctx)), None)
                    } else {
                        (decision, None)
                    }
                }
                Err(e) => (apply_meter_failure(state, &ctx), Some(e)),
            };
            let after = state.clone();

            self.log_transition(&before, &after, decision.as_ref());
            if let Some(e) = failure {
                report.meter_failures.push(phase);
                self.fault(e.kind(), Some(phase), e.to_string(), now, report);
            }
            if let Some(d) = decision {
                self.last_reason.insert(phase, d.reason);
                report.decisions.push(d);
            }
        }
    }

    fn log_transition(
        &self,
        before: &PhaseControlState,
        after: &PhaseControlState,
        decision: Option<&LimitDecision>,
    ) {
        let logger = self.phase_logger(after.phase);
        if before.state != after.state {
            logger.info(&format!(
                "{:?} -> {:?} (risk {:.3}, available {:.1} A)",
                before.state, after.state, after.risk_score, after.available_current
            ));
        }
        if after.current_recovery_window > before.current_recovery_window {
            logger.info(&format!(
                "Surplus interrupted, recovery window extended to {} s",
                after.current_recovery_window.as_secs()
            ));
        }
        let max_failures = self.config.max_meter_failures;
        if after.consecutive_meter_failures == max_failures
            && before.consecutive_meter_failures < max_failures
        {
            logger.error(&format!(
                "Meter failed {} consecutive times, forcing {} A",
                max_failures, after.applied_limit
            ));
        }
        if let Some(d) = decision {
            logger.info(&format!(
                "Target {} -> {} A ({})",
                d.previous_limit, d.new_limit, d.reason
            ));
        } else {
            logger.trace(&format!(
                "available {:.2} A, risk {:.4}, target {} A",
                after.available_current, after.risk_score, after.applied_limit
            ));
        }
    }

    fn update_status(&mut self, accepts_commands: bool) {
        let status = if accepts_commands {
            ControllerStatus::MonitoringLoads
        } else {
            ControllerStatus::AwaitingCharger
        };
        if status != self.status {
            self.logger
                .info(&format!("Status {:?} -> {:?}", self.status, status));
            self.status = status;
        }
    }

    /// Commands needed to bring the charger to the current targets
    fn plan_commands(&self) -> Vec<PlannedCommand> {
        if self.charger.has_synced_phase_limits() {
            return self.plan_synced().into_iter().collect();
        }
        self.phases
            .iter()
            .filter_map(|phase| {
                let target = self.states.get(phase)?.applied_limit;
                let previous = self.last_sent.get(phase).copied()?;
                (target != previous).then(|| PlannedCommand {
                    command: ChargerCommand {
                        target: CommandTarget::Phase(*phase),
                        amps: target,
                    },
                    previous,
                    reason: self.reason_for(*phase, target, previous),
                })
            })
            .collect()
    }

    /// One limit for all phases: the lowest individual target
    fn plan_synced(&self) -> Option<PlannedCommand> {
        let (holder, target) = self
            .phases
            .iter()
            .filter_map(|p| self.states.get(p).map(|s| (*p, s.applied_limit)))
            .min_by_key(|(_, limit)| *limit)?;
        let previous = self
            .phases
            .iter()
            .filter_map(|p| self.last_sent.get(p))
            .copied()
            .min()?;
        let in_step = self
            .phases
            .iter()
            .all(|p| self.last_sent.get(p) == Some(&previous));
        if target == previous && in_step {
            return None;
        }
        Some(PlannedCommand {
            command: ChargerCommand {
                target: CommandTarget::All,
                amps: target,
            },
            previous,
            reason: self.reason_for(holder, target, previous),
        })
    }

    /// Reason of the phase's last decision when it matches the direction of
    /// the change, otherwise derived from the direction
    fn reason_for(&self, phase: Phase, target: u32, previous: u32) -> ChangeReason {
        let increasing = target > previous;
        match self.last_reason.get(&phase) {
            Some(reason) if reason.is_reduction() != increasing => *reason,
            _ if increasing => ChangeReason::Recovery,
            _ => match self.config.mode {
                OvercurrentMode::Optimised => ChangeReason::RiskLimit,
                OvercurrentMode::Conservative => ChangeReason::ConservativeLimit,
            },
        }
    }

    async fn dispatch(&mut self, plan: PlannedCommand, now: DateTime<Utc>, report: &mut TickReport) {
        let ChargerCommand { target, amps } = plan.command;
        match self.charger.set_current_limit(target, amps).await {
            Ok(()) => {
                let phases = match target {
                    CommandTarget::Phase(p) => vec![p],
                    CommandTarget::All => self.phases.clone(),
                };
                for p in phases {
                    self.last_sent.insert(p, amps);
                    self.mismatched_ticks.remove(&p);
                }
                self.last_command_at = Some(now);
                self.commands_sent = self.commands_sent.saturating_add(1);
                report.commands.push(plan.command);
                self.emit(
                    BalancerEvent::LimitChanged(LimitChangeEvent::new(
                        target.phase(),
                        plan.previous,
                        amps,
                        plan.reason,
                        now,
                    )),
                    report,
                );
            }
            Err(e) => {
                // Acknowledged value is unchanged; the next tick retries with a fresh target
                self.command_failures = self.command_failures.saturating_add(1);
                report.failed_commands.push(plan.command);
                self.fault(e.kind(), target.phase(), e.to_string(), now, report);
            }
        }
    }

    fn fault(
        &self,
        kind: ErrorKind,
        phase: Option<Phase>,
        message: String,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) {
        self.emit(
            BalancerEvent::Fault(FaultEvent {
                kind,
                phase,
                message,
                timestamp: now,
            }),
            report,
        );
    }

    fn emit(&self, event: BalancerEvent, report: &mut TickReport) {
        report.events.push(event.clone());
        self.events.emit(event);
    }
}

/// Two decisions on one phase in the same tick, reported as one change
fn merge(first: Option<LimitDecision>, second: Option<LimitDecision>) -> Option<LimitDecision> {
    match (first, second) {
        (Some(a), Some(b)) => Some(LimitDecision {
            previous_limit: a.previous_limit,
            ..b
        }),
        (a, b) => b.or(a),
    }
}

fn elapsed(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - earlier).to_std().unwrap_or(Duration::ZERO)
}

fn format_limits(limits: &BTreeMap<Phase, u32>) -> String {
    limits
        .iter()
        .map(|(p, l)| format!("{}={} A", p, l))
        .collect::<Vec<_>>()
        .join(", ")
}
