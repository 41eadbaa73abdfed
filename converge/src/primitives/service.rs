//! Enabled system services.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::Result;
use tracing::info;

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::services::ServiceManager;

/// `service` enabled at boot, restarted once its prerequisite files exist.
///
/// When a prerequisite is missing the restart is deferred and reported as a
/// warning rather than a failure.
pub struct ServiceEnabled {
    service: String,
    prerequisites: Vec<PathBuf>,
    services: Rc<dyn ServiceManager>,
}

impl ServiceEnabled {
    pub fn new(service: impl Into<String>, services: Rc<dyn ServiceManager>) -> Self {
        Self {
            service: service.into(),
            prerequisites: Vec::new(),
            services,
        }
    }

    pub fn restart_requires(mut self, paths: Vec<PathBuf>) -> Self {
        self.prerequisites = paths;
        self
    }
}

impl Converge for ServiceEnabled {
    fn describe(&self) -> String {
        format!("service {} enabled", self.service)
    }

    fn probe(&self) -> Result<Probe> {
        if self.services.is_enabled(&self.service)? {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied)
        }
    }

    fn apply(&self) -> Result<Applied> {
        self.services.enable(&self.service)?;
        let missing: Vec<String> = self
            .prerequisites
            .iter()
            .filter(|path| !path.exists())
            .map(|path| path.display().to_string())
            .collect();
        if !missing.is_empty() {
            return Ok(Applied::with_warning(format!(
                "restart of {} deferred: missing {}",
                self.service,
                missing.join(", ")
            )));
        }
        info!(service = %self.service, "restarting service");
        self.services.restart(&self.service)?;
        Ok(Applied::clean())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::FakeServices;

    #[test]
    fn enables_and_restarts_when_prerequisites_exist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cert = temp.path().join("cert.pem");
        fs::write(&cert, "pem").expect("write");
        let services = Rc::new(FakeServices::default());
        let step = ServiceEnabled::new("apache2", services.clone()).restart_requires(vec![cert]);

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        let applied = step.apply().expect("apply");
        assert_eq!(applied.warning, None);
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
        assert_eq!(services.restarts("apache2"), 1);
    }

    #[test]
    fn missing_prerequisite_defers_restart() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cert = temp.path().join("cert.pem");
        let services = Rc::new(FakeServices::default());
        let step = ServiceEnabled::new("apache2", services.clone())
            .restart_requires(vec![cert.clone()]);

        let applied = step.apply().expect("apply");
        let warning = applied.warning.unwrap_or_default();
        assert!(warning.contains("deferred"));
        assert!(warning.contains(&cert.display().to_string()));
        assert_eq!(services.restarts("apache2"), 0);
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
    }
}
