//! Working copy of a remote repository.

use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::git::Vcs;
use crate::primitives::stat_if_exists;

/// A clone of `url` at `dest`, optionally on `branch`.
///
/// A destination that exists without the `marker` entry (`.git` by default)
/// is never overwritten: the probe reports it as ambiguous.
pub struct EnsureRepository {
    url: String,
    dest: PathBuf,
    branch: Option<String>,
    marker: PathBuf,
    vcs: Rc<dyn Vcs>,
}

impl EnsureRepository {
    pub fn new(url: impl Into<String>, dest: impl Into<PathBuf>, vcs: Rc<dyn Vcs>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            branch: None,
            marker: PathBuf::from(".git"),
            vcs,
        }
    }

    pub fn branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn marker(mut self, marker: impl Into<PathBuf>) -> Self {
        self.marker = marker.into();
        self
    }
}

impl Converge for EnsureRepository {
    fn describe(&self) -> String {
        match &self.branch {
            Some(branch) => format!(
                "repository {} ({branch}) at {}",
                self.url,
                self.dest.display()
            ),
            None => format!("repository {} at {}", self.url, self.dest.display()),
        }
    }

    fn probe(&self) -> Result<Probe> {
        let Some(meta) = stat_if_exists(&self.dest)? else {
            return Ok(Probe::Unsatisfied);
        };
        if !meta.is_dir() {
            return Err(anyhow!(
                "{} exists but is not a directory",
                self.dest.display()
            ));
        }
        if !self.dest.join(&self.marker).exists() {
            return Err(anyhow!(
                "{} exists but has no {}; refusing to overwrite",
                self.dest.display(),
                self.marker.display()
            ));
        }
        if let Some(branch) = &self.branch
            && self.vcs.current_branch(&self.dest)? != *branch
        {
            return Ok(Probe::Unsatisfied);
        }
        Ok(Probe::Satisfied)
    }

    fn apply(&self) -> Result<Applied> {
        self.vcs
            .clone_or_update(&self.url, &self.dest, self.branch.as_deref())?;
        Ok(Applied::clean())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::test_support::FakeVcs;

    #[test]
    fn absent_destination_is_cloned() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("tools");
        let vcs = Rc::new(FakeVcs::default());
        let step = EnsureRepository::new("https://example.invalid/tools.git", &dest, vcs.clone());

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
        assert_eq!(vcs.clones(), 1);
    }

    #[test]
    fn foreign_directory_is_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("tools");
        fs::create_dir(&dest).expect("mkdir");
        fs::write(dest.join("notes.txt"), "mine").expect("write");
        let step = EnsureRepository::new("u", &dest, Rc::new(FakeVcs::default()));

        let err = step.probe().unwrap_err();
        assert!(err.to_string().contains("refusing to overwrite"));
    }

    #[test]
    fn wrong_branch_is_unsatisfied() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dest = temp.path().join("tools");
        let vcs = Rc::new(FakeVcs::default());
        EnsureRepository::new("u", &dest, vcs.clone())
            .apply()
            .expect("initial clone");

        let step =
            EnsureRepository::new("u", &dest, vcs.clone()).branch(Some("stable".to_string()));
        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        step.apply().expect("switch branch");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
    }
}
