//! Idempotent probe/apply primitives built on the host adapters.
//!
//! Each primitive implements [`Converge`](crate::core::step::Converge) for one
//! kind of desired state. Collaborators are injected through [`Host`] so the
//! same primitives run against the real system or in-memory fakes.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::Path;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};

use crate::io::config::HostConfig;
use crate::io::git::{GitClient, Vcs};
use crate::io::identity::{HostIdentity, IdentityDb};
use crate::io::keys::{KeyGenerator, SelfSignedCert, SshKeygen};
use crate::io::packages::{Apt, PackageManager};
use crate::io::services::{ServiceManager, Systemd};

pub mod account;
pub mod credential;
pub mod directory;
pub mod file;
pub mod packages;
pub mod repository;
pub mod service;

pub use account::{AccountPassword, EnsureGroup, EnsureUser};
pub use credential::CredentialMaterial;
pub use directory::EnsureDirectory;
pub use file::RenderedFile;
pub use packages::EnsurePackages;
pub use repository::EnsureRepository;
pub use service::ServiceEnabled;

/// External collaborators shared by every primitive in a plan.
#[derive(Clone)]
pub struct Host {
    pub identity: Rc<dyn IdentityDb>,
    pub vcs: Rc<dyn Vcs>,
    pub packages: Rc<dyn PackageManager>,
    pub services: Rc<dyn ServiceManager>,
    pub ssh_keys: Rc<dyn KeyGenerator>,
    pub tls: Rc<dyn KeyGenerator>,
}

impl Host {
    /// Adapters for the local system, configured from `cfg`.
    pub fn system(cfg: &HostConfig) -> Self {
        let runner = cfg.commands.runner();
        Self {
            identity: Rc::new(HostIdentity::new(runner)),
            vcs: Rc::new(GitClient::new(runner)),
            packages: Rc::new(Apt::new(runner)),
            services: Rc::new(Systemd::new(runner)),
            ssh_keys: Rc::new(SshKeygen {
                key_type: cfg.ssh.key_type.clone(),
                comment: format!("{}@converge", cfg.user),
                runner,
            }),
            tls: Rc::new(SelfSignedCert {
                key_path: cfg.web.key_path.clone(),
                subject: cfg.web.subject.clone(),
                days: cfg.web.days,
                runner,
            }),
        }
    }
}

/// Expected owner of a path, by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub user: String,
    pub group: String,
}

impl Owner {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }

    /// Look up `(uid, gid)` in the identity database.
    pub fn resolve(&self, identity: &dyn IdentityDb) -> Result<(u32, u32)> {
        let uid = identity
            .user(&self.user)?
            .ok_or_else(|| anyhow!("owner account '{}' does not exist", self.user))?
            .uid;
        let gid = identity
            .group(&self.group)?
            .ok_or_else(|| anyhow!("owner group '{}' does not exist", self.group))?
            .gid;
        Ok((uid, gid))
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}

/// True when `path` already has the requested owner and permission bits.
pub(crate) fn attributes_match(
    path: &Path,
    owner: Option<&Owner>,
    mode: Option<u32>,
    identity: &dyn IdentityDb,
) -> Result<bool> {
    let meta = fs::metadata(path).with_context(|| format!("stat {}", path.display()))?;
    if let Some(owner) = owner {
        let (uid, gid) = owner.resolve(identity)?;
        if meta.uid() != uid || meta.gid() != gid {
            return Ok(false);
        }
    }
    if let Some(mode) = mode
        && meta.permissions().mode() & 0o7777 != mode
    {
        return Ok(false);
    }
    Ok(true)
}

/// Set owner and permission bits on `path` where requested.
pub(crate) fn set_attributes(
    path: &Path,
    owner: Option<&Owner>,
    mode: Option<u32>,
    identity: &dyn IdentityDb,
) -> Result<()> {
    let ids = resolve_owner(owner, identity)?;
    apply_attributes(path, ids, mode)
}

/// Owner ids, looked up before anything is written so a missing account
/// leaves no half-finished artifact behind.
pub(crate) fn resolve_owner(
    owner: Option<&Owner>,
    identity: &dyn IdentityDb,
) -> Result<Option<(u32, u32)>> {
    owner.map(|owner| owner.resolve(identity)).transpose()
}

/// chown/chmod `path` with already-resolved ids.
pub(crate) fn apply_attributes(
    path: &Path,
    ids: Option<(u32, u32)>,
    mode: Option<u32>,
) -> Result<()> {
    if let Some((uid, gid)) = ids {
        std::os::unix::fs::chown(path, Some(uid), Some(gid))
            .with_context(|| format!("chown {uid}:{gid} {}", path.display()))?;
    }
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("chmod {mode:o} {}", path.display()))?;
    }
    Ok(())
}

/// Metadata of `path` (following symlinks), or `None` when it does not exist.
pub(crate) fn stat_if_exists(path: &Path) -> Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("stat {}", path.display())),
    }
}
