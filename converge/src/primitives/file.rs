//! Files rendered from templates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::identity::IdentityDb;
use crate::io::template::render_template;
use crate::primitives::{Owner, apply_attributes, resolve_owner, stat_if_exists};

/// `dest` rendered from the template at `src`.
///
/// An existing `dest` is left alone; rendering only happens when it is absent.
pub struct RenderedFile {
    src: PathBuf,
    dest: PathBuf,
    tokens: BTreeMap<String, String>,
    mode: Option<u32>,
    owner: Option<Owner>,
    identity: Rc<dyn IdentityDb>,
}

impl RenderedFile {
    pub fn new(
        src: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        tokens: BTreeMap<String, String>,
        identity: Rc<dyn IdentityDb>,
    ) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
            tokens,
            mode: None,
            owner: None,
            identity,
        }
    }

    pub fn mode(mut self, mode: Option<u32>) -> Self {
        self.mode = mode;
        self
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl Converge for RenderedFile {
    fn describe(&self) -> String {
        format!(
            "file {} from {}",
            self.dest.display(),
            self.src.display()
        )
    }

    fn probe(&self) -> Result<Probe> {
        match stat_if_exists(&self.dest)? {
            None => Ok(Probe::Unsatisfied),
            Some(meta) if meta.is_dir() => Err(anyhow!(
                "{} exists but is a directory",
                self.dest.display()
            )),
            Some(_) => Ok(Probe::Satisfied),
        }
    }

    fn apply(&self) -> Result<Applied> {
        let ids = resolve_owner(self.owner.as_ref(), self.identity.as_ref())?;
        render_template(&self.src, &self.dest, &self.tokens, |tmp| {
            apply_attributes(tmp, ids, self.mode)
        })?;
        Ok(Applied::clean())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};

    use super::*;
    use crate::test_support::FakeIdentity;

    fn tokens() -> BTreeMap<String, String> {
        BTreeMap::from([("USER".to_string(), "tools".to_string())])
    }

    #[test]
    fn renders_when_absent_and_keeps_existing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("profile.in");
        let dest = temp.path().join("out/profile");
        fs::write(&src, "export OWNER={{ USER }}\n").expect("write");
        let step = RenderedFile::new(&src, &dest, tokens(), Rc::new(FakeIdentity::default()))
            .mode(Some(0o640));

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        step.apply().expect("apply");
        assert_eq!(
            fs::read_to_string(&dest).expect("read"),
            "export OWNER=tools\n"
        );
        let mode = fs::metadata(&dest).expect("stat").permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);

        fs::write(&dest, "edited by hand\n").expect("edit");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
    }

    #[test]
    fn unresolved_placeholder_writes_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("t.in");
        let dest = temp.path().join("t");
        fs::write(&src, "{{ USER }} {{ MISSING }}").expect("write");
        let step = RenderedFile::new(&src, &dest, tokens(), Rc::new(FakeIdentity::default()));

        let err = step.apply().unwrap_err();
        assert!(format!("{err:#}").contains("MISSING"));
        assert!(!dest.exists());
    }

    #[test]
    fn missing_owner_leaves_destination_absent_until_it_exists() {
        let temp = tempfile::tempdir().expect("tempdir");
        let src = temp.path().join("profile.in");
        let dest = temp.path().join("profile");
        fs::write(&src, "export OWNER={{ USER }}\n").expect("write");
        let identity = Rc::new(FakeIdentity::default());
        let step = RenderedFile::new(&src, &dest, tokens(), identity.clone())
            .owned_by(Owner::new("svc", "svc"))
            .mode(Some(0o600));

        let err = step.apply().unwrap_err();
        assert!(format!("{err:#}").contains("'svc' does not exist"));
        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);

        let meta = fs::metadata(temp.path()).expect("stat");
        identity.add_group("svc", meta.gid());
        identity.add_user("svc", meta.uid(), meta.gid());
        step.apply().expect("apply");
        let written = fs::metadata(&dest).expect("stat dest");
        assert_eq!((written.uid(), written.gid()), (meta.uid(), meta.gid()));
        assert_eq!(written.permissions().mode() & 0o777, 0o600);
    }

    #[test]
    fn directory_at_destination_is_ambiguous() {
        let temp = tempfile::tempdir().expect("tempdir");
        let step = RenderedFile::new(
            temp.path().join("t.in"),
            temp.path(),
            tokens(),
            Rc::new(FakeIdentity::default()),
        );
        assert!(step.probe().is_err());
    }
}
