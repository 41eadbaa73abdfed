//! Shared deterministic types for the step contract and run outcomes.
//!
//! These types define stable contracts between the engine, the plan builder
//! and the primitives. They carry no host state and serialize deterministically.

use serde::{Deserialize, Serialize};

/// Result of a successful probe.
///
/// A probe that cannot determine the host state returns `Err` instead; the
/// engine treats that as fatal and never guesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    /// Desired state already holds; the step is skipped.
    Satisfied,
    /// Desired state is absent; the step must apply.
    Unsatisfied,
}

/// Result of a successful apply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Non-fatal condition the caller is expected to surface.
    pub warning: Option<String>,
}

impl Applied {
    pub fn clean() -> Self {
        Self { warning: None }
    }

    pub fn with_warning(warning: impl Into<String>) -> Self {
        Self {
            warning: Some(warning.into()),
        }
    }
}

/// Final status recorded for a step that was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Skipped,
    Applied,
    Failed,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Skipped => "skipped",
            StepStatus::Applied => "applied",
            StepStatus::Failed => "failed",
        }
    }
}

/// Phase in which a step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    /// The current state could not be determined.
    Probe,
    /// The mutation attempt failed.
    Apply,
    /// Apply succeeded but the post-condition still does not hold.
    Verify,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Probe => "probe",
            FailureKind::Apply => "apply",
            FailureKind::Verify => "verify",
        }
    }
}

/// Outcome of one reached step, in plan order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: StepStatus,
    /// Skip reason, apply warning, or failure cause.
    pub detail: Option<String>,
    /// Set only when `status` is `Failed`.
    pub failure: Option<FailureKind>,
    pub duration_ms: u64,
}

impl StepOutcome {
    /// True for an `Applied` outcome that carries a warning detail.
    pub fn has_warning(&self) -> bool {
        self.status == StepStatus::Applied && self.detail.is_some()
    }
}
