//! The step contract: one idempotent unit of provisioning work.

use std::fmt;

use anyhow::Result;

use crate::core::types::{Applied, Probe};

/// Probe/apply/verify contract implemented by every primitive.
///
/// `probe` must never mutate host state. `apply` is only called after `probe`
/// reported [`Probe::Unsatisfied`].
pub trait Converge {
    /// One-line description of the desired state (e.g. `directory /opt/x`).
    fn describe(&self) -> String;

    /// Read-only check of whether the desired state already holds.
    ///
    /// `Err` means the state is ambiguous or unreadable and halts the run.
    fn probe(&self) -> Result<Probe>;

    /// Perform the mutation.
    fn apply(&self) -> Result<Applied>;

    /// Post-apply check. `None` opts the primitive out of verification.
    ///
    /// Defaults to re-running the probe.
    fn verify(&self) -> Option<Result<Probe>> {
        Some(self.probe())
    }

    /// Manual remedy to surface when `apply` fails in a non-interactive run.
    fn interactive_fallback(&self) -> Option<String> {
        None
    }
}

struct SkipCondition {
    reason: String,
    holds: Box<dyn Fn() -> bool>,
}

/// A named primitive with its dependency edges and optional skip override.
pub struct Step {
    name: String,
    depends_on: Vec<String>,
    action: Box<dyn Converge>,
    skip: Option<SkipCondition>,
}

impl Step {
    pub fn new(name: impl Into<String>, action: impl Converge + 'static) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            action: Box::new(action),
            skip: None,
        }
    }

    /// Declare steps that must complete (skipped or applied) before this one.
    ///
    /// Repeated names collapse into one edge.
    pub fn after(mut self, names: &[&str]) -> Self {
        for name in names {
            if !self.depends_on.iter().any(|dep| dep == name) {
                self.depends_on.push((*name).to_string());
            }
        }
        self
    }

    /// Skip the step without probing whenever `holds` returns true.
    pub fn skip_when(
        mut self,
        reason: impl Into<String>,
        holds: impl Fn() -> bool + 'static,
    ) -> Self {
        self.skip = Some(SkipCondition {
            reason: reason.into(),
            holds: Box::new(holds),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    pub fn action(&self) -> &dyn Converge {
        self.action.as_ref()
    }

    /// Reason to skip, if the skip condition currently holds.
    pub fn skip_reason(&self) -> Option<&str> {
        match &self.skip {
            Some(cond) if (cond.holds)() => Some(cond.reason.as_str()),
            _ => None,
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .field("action", &self.action.describe())
            .field("skip", &self.skip.as_ref().map(|cond| cond.reason.as_str()))
            .finish()
    }
}
