//! Plan construction: validate a step catalog and fix its execution order.
//!
//! Ordering is decided once here. The engine never re-sorts at run time.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::core::step::Step;

/// Malformed step catalog. Always a programmer error, never data-dependent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("duplicate step name '{0}'")]
    DuplicateName(String),
    #[error("step '{step}' depends on unknown step '{missing}'")]
    UnresolvedDependency { step: String, missing: String },
    #[error("dependency cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Validated, dependency-ordered steps for one run. Immutable once built.
#[derive(Debug)]
pub struct Plan {
    steps: Vec<Step>,
}

impl Plan {
    /// Validate `steps` and order them topologically.
    ///
    /// Among mutually independent steps the declaration order is kept, so the
    /// same catalog always yields the same plan.
    pub fn build(steps: Vec<Step>) -> Result<Plan, BuildError> {
        let index = index_by_name(&steps)?;
        check_references(&steps, &index)?;
        if let Some(cycle) = find_cycle(&steps, &index) {
            return Err(BuildError::Cycle(cycle));
        }
        let order = stable_topological_order(&steps, &index);

        let mut slots: Vec<Option<Step>> = steps.into_iter().map(Some).collect();
        let steps = order
            .into_iter()
            .filter_map(|position| slots[position].take())
            .collect();
        Ok(Plan { steps })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }
}

fn index_by_name(steps: &[Step]) -> Result<HashMap<&str, usize>, BuildError> {
    let mut index = HashMap::with_capacity(steps.len());
    for (position, step) in steps.iter().enumerate() {
        if index.insert(step.name(), position).is_some() {
            return Err(BuildError::DuplicateName(step.name().to_string()));
        }
    }
    Ok(index)
}

fn check_references(steps: &[Step], index: &HashMap<&str, usize>) -> Result<(), BuildError> {
    for step in steps {
        for dep in step.depends_on() {
            if !index.contains_key(dep.as_str()) {
                return Err(BuildError::UnresolvedDependency {
                    step: step.name().to_string(),
                    missing: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Depth-first search for a dependency cycle.
///
/// Returns the cycle as a closed path of names (first name repeated last).
fn find_cycle(steps: &[Step], index: &HashMap<&str, usize>) -> Option<Vec<String>> {
    let mut marks = vec![Mark::Unvisited; steps.len()];
    let mut stack = Vec::new();
    for start in 0..steps.len() {
        if marks[start] == Mark::Unvisited
            && let Some(cycle) = visit(start, steps, index, &mut marks, &mut stack)
        {
            return Some(cycle);
        }
    }
    None
}

fn visit(
    position: usize,
    steps: &[Step],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
) -> Option<Vec<String>> {
    marks[position] = Mark::InProgress;
    stack.push(position);
    for dep in steps[position].depends_on() {
        let next = index[dep.as_str()];
        match marks[next] {
            Mark::InProgress => {
                let from = stack.iter().position(|&p| p == next).unwrap_or(0);
                let mut cycle: Vec<String> = stack[from..]
                    .iter()
                    .map(|&p| steps[p].name().to_string())
                    .collect();
                cycle.push(steps[next].name().to_string());
                return Some(cycle);
            }
            Mark::Unvisited => {
                if let Some(cycle) = visit(next, steps, index, marks, stack) {
                    return Some(cycle);
                }
            }
            Mark::Done => {}
        }
    }
    stack.pop();
    marks[position] = Mark::Done;
    None
}

/// Kahn's algorithm, always releasing the earliest-declared ready step.
///
/// Requires an acyclic graph with resolved references.
fn stable_topological_order(steps: &[Step], index: &HashMap<&str, usize>) -> Vec<usize> {
    let mut placed: HashSet<usize> = HashSet::with_capacity(steps.len());
    let mut order = Vec::with_capacity(steps.len());
    while order.len() < steps.len() {
        let ready = (0..steps.len()).find(|position| {
            !placed.contains(position)
                && steps[*position]
                    .depends_on()
                    .iter()
                    .all(|dep| placed.contains(&index[dep.as_str()]))
        });
        match ready {
            Some(position) => {
                placed.insert(position);
                order.push(position);
            }
            None => break,
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedStep;

    fn step(name: &str, deps: &[&str]) -> Step {
        Step::new(name, ScriptedStep::satisfied()).after(deps)
    }

    #[test]
    fn keeps_declaration_order_when_already_valid() {
        let plan = Plan::build(vec![
            step("dir", &[]),
            step("group", &[]),
            step("user", &["group"]),
        ])
        .expect("build");
        assert_eq!(plan.names(), vec!["dir", "group", "user"]);
    }

    #[test]
    fn moves_dependencies_ahead_and_keeps_independent_order() {
        let plan = Plan::build(vec![
            step("user", &["group"]),
            step("dir", &[]),
            step("group", &[]),
            step("key", &["user"]),
        ])
        .expect("build");
        assert_eq!(plan.names(), vec!["dir", "group", "user", "key"]);
    }

    #[test]
    fn same_catalog_builds_identical_order() {
        let catalog = || {
            vec![
                step("c", &["a"]),
                step("b", &[]),
                step("a", &[]),
                step("d", &["b", "c"]),
            ]
        };
        let first = Plan::build(catalog()).expect("build");
        let second = Plan::build(catalog()).expect("build");
        assert_eq!(first.names(), second.names());
        assert_eq!(first.names(), vec!["b", "a", "c", "d"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Plan::build(vec![step("dir", &[]), step("dir", &[])]).unwrap_err();
        assert_eq!(err, BuildError::DuplicateName("dir".to_string()));
    }

    #[test]
    fn rejects_unresolved_dependency() {
        let err = Plan::build(vec![step("user", &["group"])]).unwrap_err();
        assert_eq!(
            err,
            BuildError::UnresolvedDependency {
                step: "user".to_string(),
                missing: "group".to_string(),
            }
        );
    }

    #[test]
    fn rejects_two_step_cycle() {
        let err = Plan::build(vec![step("a", &["b"]), step("b", &["a"])]).unwrap_err();
        assert_eq!(
            err,
            BuildError::Cycle(vec!["a".to_string(), "b".to_string(), "a".to_string()])
        );
        assert_eq!(err.to_string(), "dependency cycle: a -> b -> a");
    }

    #[test]
    fn rejects_self_dependency() {
        let err = Plan::build(vec![step("a", &["a"])]).unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn detects_cycle_behind_acyclic_prefix() {
        let err = Plan::build(vec![
            step("root", &[]),
            step("x", &["root", "z"]),
            step("y", &["x"]),
            step("z", &["y"]),
        ])
        .unwrap_err();
        assert_eq!(
            err,
            BuildError::Cycle(vec![
                "x".to_string(),
                "z".to_string(),
                "y".to_string(),
                "x".to_string()
            ])
        );
    }

    #[test]
    fn empty_catalog_builds_empty_plan() {
        let plan = Plan::build(Vec::new()).expect("build");
        assert!(plan.is_empty());
    }
}
