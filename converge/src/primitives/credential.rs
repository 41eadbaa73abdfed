//! Generated key material (ssh keys, TLS certificates).

use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use tracing::warn;

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::identity::IdentityDb;
use crate::io::keys::KeyGenerator;
use crate::primitives::{Owner, resolve_owner, stat_if_exists};

/// Key material at `path`, produced by `generator` when absent.
///
/// The generated secret is not re-read afterwards, so there is no verify.
pub struct CredentialMaterial {
    path: PathBuf,
    generator: Rc<dyn KeyGenerator>,
    owner: Option<Owner>,
    identity: Rc<dyn IdentityDb>,
}

impl CredentialMaterial {
    pub fn new(
        path: impl Into<PathBuf>,
        generator: Rc<dyn KeyGenerator>,
        identity: Rc<dyn IdentityDb>,
    ) -> Self {
        Self {
            path: path.into(),
            generator,
            owner: None,
            identity,
        }
    }

    pub fn owned_by(mut self, owner: Owner) -> Self {
        self.owner = Some(owner);
        self
    }

    fn public_path(&self) -> PathBuf {
        let mut public = self.path.clone().into_os_string();
        public.push(".pub");
        PathBuf::from(public)
    }

    fn hand_over(&self, uid: u32, gid: u32) -> Result<()> {
        let public = self.public_path();
        let parent = self.path.parent().unwrap_or(Path::new("/"));
        for path in [self.path.as_path(), public.as_path(), parent] {
            if path.exists() {
                std::os::unix::fs::chown(path, Some(uid), Some(gid))
                    .with_context(|| format!("chown {uid}:{gid} {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Remove generated files so the next probe sees the material as absent.
    fn discard(&self) {
        for path in [self.path.clone(), self.public_path()] {
            if let Err(err) = fs::remove_file(&path)
                && err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(err = %err, path = %path.display(), "failed to discard key material");
            }
        }
    }
}

impl Converge for CredentialMaterial {
    fn describe(&self) -> String {
        format!(
            "{} at {}",
            self.generator.describe(),
            self.path.display()
        )
    }

    fn probe(&self) -> Result<Probe> {
        match stat_if_exists(&self.path)? {
            None => Ok(Probe::Unsatisfied),
            Some(meta) if meta.is_dir() => Err(anyhow!(
                "{} exists but is a directory",
                self.path.display()
            )),
            Some(_) => Ok(Probe::Satisfied),
        }
    }

    fn apply(&self) -> Result<Applied> {
        let ids = resolve_owner(self.owner.as_ref(), self.identity.as_ref())?;
        self.generator.generate(&self.path)?;
        if let Some((uid, gid)) = ids
            && let Err(err) = self.hand_over(uid, gid)
        {
            self.discard();
            return Err(err);
        }
        Ok(Applied::clean())
    }

    fn verify(&self) -> Option<Result<Probe>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::MetadataExt;

    use super::*;
    use crate::test_support::{FakeIdentity, FakeKeys};

    #[test]
    fn generates_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(".ssh/id_ed25519");
        let keys = Rc::new(FakeKeys::default());
        let step = CredentialMaterial::new(&path, keys.clone(), Rc::new(FakeIdentity::default()));

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
        assert_eq!(keys.generated(), vec![path]);
    }

    #[test]
    fn opts_out_of_verification() {
        let step = CredentialMaterial::new(
            "/nonexistent/key",
            Rc::new(FakeKeys::default()),
            Rc::new(FakeIdentity::default()),
        );
        assert!(step.verify().is_none());
    }

    #[test]
    fn generated_files_are_handed_to_owner() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("keys/id_ed25519");
        let step = CredentialMaterial::new(
            &path,
            Rc::new(FakeKeys::default()),
            Rc::new(FakeIdentity::with_current_user("svc", "svc")),
        )
        .owned_by(Owner::new("svc", "svc"));

        step.apply().expect("apply");
        assert!(path.with_extension("pub").exists());
    }

    #[test]
    fn missing_owner_generates_nothing() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("keys/id_ed25519");
        let keys = Rc::new(FakeKeys::default());
        let identity = Rc::new(FakeIdentity::default());
        let step = CredentialMaterial::new(&path, keys.clone(), identity.clone())
            .owned_by(Owner::new("svc", "svc"));

        assert!(step.apply().is_err());
        assert!(keys.generated().is_empty());
        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);

        let meta = fs::metadata(temp.path()).expect("stat");
        identity.add_group("svc", meta.gid());
        identity.add_user("svc", meta.uid(), meta.gid());
        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
    }

    #[test]
    fn discard_removes_key_and_public_half() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("id_ed25519");
        let step = CredentialMaterial::new(
            &path,
            Rc::new(FakeKeys::default()),
            Rc::new(FakeIdentity::default()),
        );
        step.apply().expect("apply");
        assert!(step.public_path().exists());

        step.discard();
        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        assert!(!step.public_path().exists());
    }
}
