//! Convergence engine: drive a plan step by step toward its desired state.
//!
//! Steps run strictly in plan order, one at a time. The first probe, apply or
//! verify failure halts the run; nothing is rolled back, so a halted run can be
//! restarted from the top and already-satisfied steps are skipped.

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::core::plan::Plan;
use crate::core::report::RunReport;
use crate::core::step::Step;
use crate::core::types::{FailureKind, Probe, StepOutcome, StepStatus};

/// Execute `plan` and return the finalized report.
pub fn run(plan: &Plan) -> RunReport {
    run_with(plan, |_| {})
}

/// Execute `plan`, calling `on_outcome` after every step transition.
#[instrument(skip_all, fields(steps = plan.len()))]
pub fn run_with<F: FnMut(&StepOutcome)>(plan: &Plan, mut on_outcome: F) -> RunReport {
    let mut report = RunReport::new();
    for step in plan.steps() {
        let outcome = converge_step(step);
        on_outcome(&outcome);
        let halted = outcome.status == StepStatus::Failed;
        report.record(outcome);
        if halted {
            error!(step = step.name(), "halting run");
            break;
        }
    }
    debug!(reached = report.outcomes().len(), "run finished");
    report
}

fn converge_step(step: &Step) -> StepOutcome {
    let start = Instant::now();
    let (status, detail, failure) = evaluate(step);
    let outcome = StepOutcome {
        name: step.name().to_string(),
        status,
        detail,
        failure,
        duration_ms: start.elapsed().as_millis() as u64,
    };
    match (outcome.status, &outcome.detail) {
        (StepStatus::Failed, detail) => {
            error!(step = %outcome.name, kind = ?outcome.failure, detail = ?detail, "step failed");
        }
        (StepStatus::Applied, Some(detail)) => {
            warn!(step = %outcome.name, %detail, "step applied with warning");
        }
        (status, _) => info!(step = %outcome.name, status = status.as_str(), "step done"),
    }
    outcome
}

fn evaluate(step: &Step) -> (StepStatus, Option<String>, Option<FailureKind>) {
    if let Some(reason) = step.skip_reason() {
        debug!(step = step.name(), reason, "skip condition holds");
        return (StepStatus::Skipped, Some(reason.to_string()), None);
    }

    let action = step.action();
    match action.probe() {
        Ok(Probe::Satisfied) => return (StepStatus::Skipped, None, None),
        Ok(Probe::Unsatisfied) => debug!(step = step.name(), "probe unsatisfied, applying"),
        Err(err) => {
            return (
                StepStatus::Failed,
                Some(format!("{err:#}")),
                Some(FailureKind::Probe),
            );
        }
    }

    let applied = match action.apply() {
        Ok(applied) => applied,
        Err(err) => {
            let mut cause = format!("{err:#}");
            if let Some(hint) = action.interactive_fallback() {
                cause.push_str(&format!(" (fallback: {hint})"));
            }
            return (StepStatus::Failed, Some(cause), Some(FailureKind::Apply));
        }
    };

    match action.verify() {
        None | Some(Ok(Probe::Satisfied)) => (StepStatus::Applied, applied.warning, None),
        Some(Ok(Probe::Unsatisfied)) => (
            StepStatus::Failed,
            Some(format!(
                "{} still not in place after apply",
                action.describe()
            )),
            Some(FailureKind::Verify),
        ),
        Some(Err(err)) => (
            StepStatus::Failed,
            Some(format!("{err:#}")),
            Some(FailureKind::Verify),
        ),
    }
}

/// Probe-only view of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckState {
    Satisfied,
    WouldApply,
    Skipped(String),
    Unknown(String),
}

/// Result of [`check`] for one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckLine {
    pub name: String,
    pub description: String,
    pub state: CheckState,
}

/// Probe every step without applying anything.
///
/// Unlike [`run`], probe errors are listed rather than halting, since nothing
/// is mutated. Steps whose predecessors would apply may probe as unknown.
#[instrument(skip_all, fields(steps = plan.len()))]
pub fn check(plan: &Plan) -> Vec<CheckLine> {
    plan.steps()
        .iter()
        .map(|step| {
            let state = match step.skip_reason() {
                Some(reason) => CheckState::Skipped(reason.to_string()),
                None => match step.action().probe() {
                    Ok(Probe::Satisfied) => CheckState::Satisfied,
                    Ok(Probe::Unsatisfied) => CheckState::WouldApply,
                    Err(err) => CheckState::Unknown(format!("{err:#}")),
                },
            };
            CheckLine {
                name: step.name().to_string(),
                description: step.action().describe(),
                state,
            }
        })
        .collect()
}
