//! Service manager adapter (`systemctl`).

use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::io::process::CommandRunner;

pub trait ServiceManager {
    fn is_enabled(&self, service: &str) -> Result<bool>;
    fn enable(&self, service: &str) -> Result<()>;
    fn restart(&self, service: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct Systemd {
    runner: CommandRunner,
}

impl Systemd {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn systemctl(&self, verb: &str, service: &str) -> Command {
        let mut cmd = Command::new("systemctl");
        cmd.arg(verb).arg(service);
        cmd
    }
}

impl ServiceManager for Systemd {
    #[instrument(skip(self))]
    fn is_enabled(&self, service: &str) -> Result<bool> {
        let output = self.runner.run(self.systemctl("is-enabled", service))?;
        let state = output.stdout_text();
        debug!(state = state.trim(), "unit state");
        Ok(enabled_state(state.trim()))
    }

    #[instrument(skip(self))]
    fn enable(&self, service: &str) -> Result<()> {
        self.runner
            .run_checked(self.systemctl("enable", service))
            .with_context(|| format!("enable {service}"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    fn restart(&self, service: &str) -> Result<()> {
        self.runner
            .run_checked(self.systemctl("restart", service))
            .with_context(|| format!("restart {service}"))?;
        Ok(())
    }
}

/// `systemctl is-enabled` states that mean the unit starts at boot.
fn enabled_state(state: &str) -> bool {
    matches!(state, "enabled" | "enabled-runtime" | "alias" | "static")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_states() {
        assert!(enabled_state("enabled"));
        assert!(enabled_state("static"));
        assert!(!enabled_state("disabled"));
        assert!(!enabled_state("masked"));
        assert!(!enabled_state(""));
    }
}
