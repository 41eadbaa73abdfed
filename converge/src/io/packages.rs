//! System package manager adapter (`dpkg-query` / `apt-get`).

use std::process::Command;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::io::process::CommandRunner;

pub trait PackageManager {
    /// Names from `names` that are not currently installed, in input order.
    fn missing(&self, names: &[String]) -> Result<Vec<String>>;

    fn install(&self, names: &[String]) -> Result<()>;
}

/// [`PackageManager`] for Debian-family hosts.
#[derive(Debug, Clone)]
pub struct Apt {
    runner: CommandRunner,
}

impl Apt {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn installed(&self, name: &str) -> Result<bool> {
        let mut cmd = Command::new("dpkg-query");
        cmd.arg("--show").arg("--showformat=${Status}").arg(name);
        let output = self.runner.run(cmd)?;
        // dpkg-query exits non-zero for packages it has never heard of.
        if !output.success() {
            return Ok(false);
        }
        Ok(is_installed_status(&output.stdout_text()))
    }
}

impl PackageManager for Apt {
    #[instrument(skip_all, fields(count = names.len()))]
    fn missing(&self, names: &[String]) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for name in names {
            if !self.installed(name)? {
                missing.push(name.clone());
            }
        }
        debug!(missing = ?missing, "package probe");
        Ok(missing)
    }

    #[instrument(skip_all, fields(count = names.len()))]
    fn install(&self, names: &[String]) -> Result<()> {
        info!(packages = ?names, "installing packages");
        let mut cmd = Command::new("apt-get");
        cmd.env("DEBIAN_FRONTEND", "noninteractive")
            .arg("install")
            .arg("--yes")
            .arg("--no-install-recommends")
            .args(names);
        self.runner
            .run_checked(cmd)
            .with_context(|| format!("install {}", names.join(" ")))?;
        Ok(())
    }
}

/// `${Status}` is `want flag status`, e.g. `install ok installed`.
fn is_installed_status(status: &str) -> bool {
    status.split_whitespace().nth(2) == Some("installed")
}
