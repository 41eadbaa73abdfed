//! Existence-guarded directory creation.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::identity::IdentityDb;
use crate::primitives::{Owner, attributes_match, set_attributes, stat_if_exists};

/// A directory at `path`, optionally with a fixed owner and mode.
pub struct EnsureDirectory {
    path: PathBuf,
    owner: Option<Owner>,
    mode: Option<u32>,
    identity: Rc<dyn IdentityDb>,
}

impl EnsureDirectory {
    pub fn new(path: impl Into<PathBuf>, identity: Rc<dyn IdentityDb>) -> Self {
        Self {
            path: path.into(),
            owner: None,
            mode: None,
            identity,
        }
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }
}

impl Converge for EnsureDirectory {
    fn describe(&self) -> String {
        let mut out = format!("directory {}", self.path.display());
        if let Some(owner) = &self.owner {
            out.push_str(&format!(" owned by {owner}"));
        }
        if let Some(mode) = self.mode {
            out.push_str(&format!(" mode {mode:o}"));
        }
        out
    }

    fn probe(&self) -> Result<Probe> {
        let Some(meta) = stat_if_exists(&self.path)? else {
            return Ok(Probe::Unsatisfied);
        };
        if !meta.is_dir() {
            return Err(anyhow!(
                "{} exists but is not a directory",
                self.path.display()
            ));
        }
        if attributes_match(
            &self.path,
            self.owner.as_ref(),
            self.mode,
            self.identity.as_ref(),
        )? {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied)
        }
    }

    fn apply(&self) -> Result<Applied> {
        fs::create_dir_all(&self.path)
            .with_context(|| format!("create directory {}", self.path.display()))?;
        set_attributes(
            &self.path,
            self.owner.as_ref(),
            self.mode,
            self.identity.as_ref(),
        )?;
        Ok(Applied::clean())
    }
}
