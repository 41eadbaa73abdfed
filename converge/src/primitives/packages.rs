//! Package presence through the host package manager.

use std::rc::Rc;

use anyhow::Result;
use tracing::debug;

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::packages::PackageManager;

/// Every package in `names` installed. Only missing ones are passed to apply.
pub struct EnsurePackages {
    names: Vec<String>,
    pm: Rc<dyn PackageManager>,
}

impl EnsurePackages {
    pub fn new(names: Vec<String>, pm: Rc<dyn PackageManager>) -> Self {
        Self { names, pm }
    }
}

impl Converge for EnsurePackages {
    fn describe(&self) -> String {
        format!("packages {}", self.names.join(" "))
    }

    fn probe(&self) -> Result<Probe> {
        if self.pm.missing(&self.names)?.is_empty() {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied)
        }
    }

    fn apply(&self) -> Result<Applied> {
        let missing = self.pm.missing(&self.names)?;
        debug!(missing = ?missing, "installing packages");
        if !missing.is_empty() {
            self.pm.install(&missing)?;
        }
        Ok(Applied::clean())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakePackages;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn installs_only_missing_packages() {
        let pm = Rc::new(FakePackages::with_installed(&["git"]));
        let step = EnsurePackages::new(names(&["git", "curl", "make"]), pm.clone());

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
        assert_eq!(pm.install_calls(), vec![names(&["curl", "make"])]);
    }

    #[test]
    fn all_present_is_satisfied() {
        let pm = Rc::new(FakePackages::with_installed(&["git"]));
        let step = EnsurePackages::new(names(&["git"]), pm);
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
    }

    #[test]
    fn install_failure_surfaces() {
        let pm = Rc::new(FakePackages::failing("mirror unreachable"));
        let step = EnsurePackages::new(names(&["curl"]), pm);
        let err = step.apply().unwrap_err();
        assert!(err.to_string().contains("mirror unreachable"));
    }
}
