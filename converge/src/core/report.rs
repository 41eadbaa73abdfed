//! Run report: the ordered outcome log of one engine execution.

use serde::Serialize;
use thiserror::Error;

use crate::core::types::{FailureKind, StepOutcome, StepStatus};

/// A run halted on a failed step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("step '{step}' failed during {}: {cause}", .kind.as_str())]
pub struct StepFailure {
    pub step: String,
    pub kind: FailureKind,
    pub cause: String,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

/// Outcomes of every reached step, in plan order.
///
/// Only the engine appends to a report; callers receive it finalized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    outcomes: Vec<StepOutcome>,
}

impl RunReport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, outcome: StepOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn outcomes(&self) -> &[StepOutcome] {
        &self.outcomes
    }

    pub fn status(&self) -> RunStatus {
        if self.failed_outcome().is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == RunStatus::Success
    }

    /// `0` on success, `1` when any step failed. Callers may remap non-zero.
    pub fn exit_code(&self) -> i32 {
        match self.status() {
            RunStatus::Success => 0,
            RunStatus::Failed => 1,
        }
    }

    /// Name of the step that halted the run.
    pub fn failing_step(&self) -> Option<&str> {
        self.failed_outcome().map(|outcome| outcome.name.as_str())
    }

    /// Applied outcomes that carry a warning detail.
    pub fn warnings(&self) -> impl Iterator<Item = &StepOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.has_warning())
    }

    /// Number of outcomes with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.status == status)
            .count()
    }

    /// Convert into a `Result`, surfacing the failing step and its cause.
    pub fn into_result(self) -> Result<RunReport, StepFailure> {
        match self.failed_outcome() {
            Some(outcome) => Err(StepFailure {
                step: outcome.name.clone(),
                kind: outcome.failure.unwrap_or(FailureKind::Apply),
                cause: outcome.detail.clone().unwrap_or_default(),
            }),
            None => Ok(self),
        }
    }

    fn failed_outcome(&self) -> Option<&StepOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.status == StepStatus::Failed)
    }
}
