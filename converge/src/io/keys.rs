//! Key material generators (`ssh-keygen`, `openssl`).
//!
//! Generated secrets are never read back; success means the generator exited
//! cleanly and left the expected file behind.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument};

use crate::io::process::CommandRunner;

pub trait KeyGenerator {
    /// Short label for plan output, e.g. `ssh-keygen ed25519`.
    fn describe(&self) -> String;

    /// Create key material at `path`.
    fn generate(&self, path: &Path) -> Result<()>;
}

/// SSH keypair without a passphrase.
#[derive(Debug, Clone)]
pub struct SshKeygen {
    pub key_type: String,
    pub comment: String,
    pub runner: CommandRunner,
}

impl KeyGenerator for SshKeygen {
    fn describe(&self) -> String {
        format!("ssh-keygen {}", self.key_type)
    }

    #[instrument(skip(self))]
    fn generate(&self, path: &Path) -> Result<()> {
        ensure_private_parent(path)?;
        info!(key_type = %self.key_type, "generating ssh key");
        let mut cmd = Command::new("ssh-keygen");
        cmd.arg("-q")
            .arg("-t")
            .arg(&self.key_type)
            .arg("-N")
            .arg("")
            .arg("-C")
            .arg(&self.comment)
            .arg("-f")
            .arg(path);
        self.runner
            .run_checked(cmd)
            .with_context(|| format!("generate ssh key {}", path.display()))?;
        Ok(())
    }
}

/// Self-signed TLS certificate; `path` receives the certificate, `key_path` the key.
#[derive(Debug, Clone)]
pub struct SelfSignedCert {
    pub key_path: PathBuf,
    pub subject: String,
    pub days: u32,
    pub runner: CommandRunner,
}

impl KeyGenerator for SelfSignedCert {
    fn describe(&self) -> String {
        format!("self-signed certificate {}", self.subject)
    }

    #[instrument(skip(self))]
    fn generate(&self, path: &Path) -> Result<()> {
        ensure_parent(path)?;
        ensure_private_parent(&self.key_path)?;
        info!(subject = %self.subject, "generating self-signed certificate");
        let mut cmd = Command::new("openssl");
        cmd.arg("req")
            .arg("-x509")
            .arg("-nodes")
            .arg("-newkey")
            .arg("rsa:2048")
            .arg("-days")
            .arg(self.days.to_string())
            .arg("-subj")
            .arg(&self.subject)
            .arg("-keyout")
            .arg(&self.key_path)
            .arg("-out")
            .arg(path);
        self.runner
            .run_checked(cmd)
            .with_context(|| format!("generate certificate {}", path.display()))?;
        fs::set_permissions(&self.key_path, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("restrict {}", self.key_path.display()))?;
        Ok(())
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("key path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))
}

/// Create the parent directory if missing, restricted to its owner.
fn ensure_private_parent(path: &Path) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("key path has no parent: {}", path.display()))?;
    if parent.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
        .with_context(|| format!("restrict {}", parent.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_parent_is_created_owner_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let key = temp.path().join(".ssh/id_ed25519");
        ensure_private_parent(&key).expect("parent");
        let mode = fs::metadata(temp.path().join(".ssh"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn existing_parent_is_left_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let before = fs::metadata(temp.path()).expect("metadata").permissions();
        ensure_private_parent(&temp.path().join("key")).expect("parent");
        let after = fs::metadata(temp.path()).expect("metadata").permissions();
        assert_eq!(before, after);
    }
}
