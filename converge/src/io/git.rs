//! Version-control adapter.
//!
//! Checkouts are cloned once and then only fast-forwarded, so we keep a small,
//! explicit wrapper around `git` subprocess calls.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, CommandRunner};

/// Version-control client used by the repository primitive.
pub trait Vcs {
    /// Clone `url` into `dest` if absent, otherwise fast-forward it; then
    /// switch to `branch` when one is given.
    fn clone_or_update(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()>;

    /// Branch checked out in `dest`.
    fn current_branch(&self, dest: &Path) -> Result<String>;
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    runner: CommandRunner,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>, runner: CommandRunner) -> Self {
        Self {
            workdir: workdir.into(),
            runner,
        }
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!(
                "detached HEAD in {} (refuse to guess branch)",
                self.workdir.display()
            ));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Checkout an existing (local or remote-tracking) branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Fetch from the default remote.
    pub fn fetch(&self) -> Result<()> {
        self.run_checked(&["fetch", "--prune"])?;
        Ok(())
    }

    /// Fast-forward the current branch from its upstream.
    #[instrument(skip_all)]
    pub fn pull_ff_only(&self) -> Result<()> {
        debug!("fast-forwarding");
        self.run_checked(&["pull", "--ff-only"])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(output.stdout_text())
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        self.runner
            .run_checked(cmd)
            .with_context(|| format!("git {} in {}", args.join(" "), self.workdir.display()))
    }
}

/// [`Vcs`] backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitClient {
    runner: CommandRunner,
}

impl GitClient {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    #[instrument(skip(self))]
    fn clone_into(&self, url: &str, dest: &Path) -> Result<()> {
        let parent = dest
            .parent()
            .ok_or_else(|| anyhow!("clone destination has no parent: {}", dest.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
        let mut cmd = Command::new("git");
        cmd.arg("clone").arg(url).arg(dest).current_dir(parent);
        self.runner
            .run_checked(cmd)
            .with_context(|| format!("clone {url}"))?;
        Ok(())
    }
}

impl Vcs for GitClient {
    fn clone_or_update(&self, url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
        let git = Git::new(dest, self.runner);
        if dest.exists() {
            git.fetch()?;
        } else {
            self.clone_into(url, dest)?;
        }
        if let Some(branch) = branch
            && git.current_branch()? != branch
        {
            git.checkout_branch(branch)?;
        }
        git.pull_ff_only()
    }

    fn current_branch(&self, dest: &Path) -> Result<String> {
        Git::new(dest, self.runner).current_branch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(dir: &Path, script: &str) {
        let status = Command::new("sh")
            .arg("-c")
            .arg(script)
            .current_dir(dir)
            .status()
            .expect("spawn sh");
        assert!(status.success(), "script failed: {script}");
    }

    fn upstream(dir: &Path) -> PathBuf {
        let repo = dir.join("upstream");
        fs::create_dir_all(&repo).expect("mkdir");
        sh(
            &repo,
            "git init -q -b main && git config user.email t@example.com && \
             git config user.name t && echo hi > README && git add README && \
             git commit -q -m init && git branch stable",
        );
        repo
    }

    #[test]
    fn clones_and_switches_branch() {
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = upstream(temp.path());
        let dest = temp.path().join("nested/checkout");
        let client = GitClient::new(CommandRunner::default());

        client
            .clone_or_update(&origin.display().to_string(), &dest, Some("stable"))
            .expect("clone");

        assert!(dest.join("README").is_file());
        assert_eq!(client.current_branch(&dest).expect("branch"), "stable");
    }

    #[test]
    fn update_fast_forwards_existing_checkout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let origin = upstream(temp.path());
        let dest = temp.path().join("checkout");
        let client = GitClient::new(CommandRunner::default());
        let url = origin.display().to_string();
        client.clone_or_update(&url, &dest, None).expect("clone");

        sh(
            &origin,
            "echo more > NEW && git add NEW && git commit -q -m more",
        );
        client.clone_or_update(&url, &dest, None).expect("update");

        assert!(dest.join("NEW").is_file());
    }
}
