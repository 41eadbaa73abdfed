//! Host configuration loaded once from TOML and passed into every primitive.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::process::CommandRunner;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/converge/host.toml";

/// Host provisioning configuration (TOML).
///
/// Missing fields default to a stock single-service-account layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostConfig {
    /// Service account that owns the install.
    pub user: String,
    /// Primary group of `user`.
    pub group: String,
    /// Preferred uid; the allocator may ignore it.
    pub uid: Option<u32>,
    /// Preferred gid; the allocator may ignore it.
    pub gid: Option<u32>,
    pub home: PathBuf,
    pub shell: PathBuf,
    /// Root directory for the checkout and generated config.
    pub install_root: PathBuf,
    /// System packages required by the core install.
    pub packages: Vec<String>,
    /// PID lock file guarding against concurrent runs.
    pub lock_path: PathBuf,
    /// File holding the account password, read before the plan is built.
    pub password_file: Option<PathBuf>,
    /// Config files rendered from templates in the checkout.
    pub templates: Vec<TemplateConfig>,

    pub repository: RepositoryConfig,
    pub ssh: SshConfig,
    pub web: WebConfig,
    pub commands: CommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RepositoryConfig {
    pub url: String,
    pub dest: PathBuf,
    /// Branch to switch to after clone/pull.
    pub branch: Option<String>,
    /// Path, relative to `dest`, that proves the checkout is ours.
    pub marker: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SshConfig {
    pub key_path: PathBuf,
    pub key_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateConfig {
    pub src: PathBuf,
    pub dest: PathBuf,
    #[serde(default)]
    pub mode: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebConfig {
    pub packages: Vec<String>,
    pub service: String,
    pub site_template: PathBuf,
    pub site_dest: PathBuf,
    pub cgi_dir: PathBuf,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    /// Generate a self-signed certificate when none is present.
    pub self_signed: bool,
    pub subject: String,
    pub days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CommandConfig {
    /// Wall-clock limit for any single external command.
    pub timeout_secs: u64,
    /// Captured stdout/stderr beyond this many bytes is discarded.
    pub output_limit_bytes: usize,
}

impl Default for HostConfig {
    fn default() -> Self {
        let install_root = PathBuf::from("/opt/tools");
        Self {
            user: "tools".to_string(),
            group: "tools".to_string(),
            uid: None,
            gid: None,
            home: install_root.clone(),
            shell: PathBuf::from("/bin/bash"),
            packages: ["git", "openssh-client", "openssl", "python3", "python3-venv"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            lock_path: PathBuf::from("/run/lock/converge.pid"),
            password_file: None,
            repository: RepositoryConfig {
                dest: install_root.join("repo"),
                ..RepositoryConfig::default()
            },
            ssh: SshConfig {
                key_path: install_root.join(".ssh/id_ed25519"),
                ..SshConfig::default()
            },
            templates: Vec::new(),
            web: WebConfig::default(),
            commands: CommandConfig::default(),
            install_root,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            url: "https://github.com/example/tools.git".to_string(),
            dest: PathBuf::from("/opt/tools/repo"),
            branch: None,
            marker: PathBuf::from(".git"),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_path: PathBuf::from("/opt/tools/.ssh/id_ed25519"),
            key_type: "ed25519".to_string(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            packages: vec!["apache2".to_string()],
            service: "apache2".to_string(),
            site_template: PathBuf::from("/opt/tools/repo/etc/apache/site.conf"),
            site_dest: PathBuf::from("/etc/apache2/sites-available/tools.conf"),
            cgi_dir: PathBuf::from("/opt/tools/cgi-bin"),
            cert_path: PathBuf::from("/etc/ssl/certs/tools.crt"),
            key_path: PathBuf::from("/etc/ssl/private/tools.key"),
            self_signed: true,
            subject: "/CN=localhost".to_string(),
            days: 825,
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15 * 60,
            output_limit_bytes: 100_000,
        }
    }
}

impl CommandConfig {
    pub fn runner(&self) -> CommandRunner {
        CommandRunner::new(
            Duration::from_secs(self.timeout_secs),
            self.output_limit_bytes,
        )
    }
}

impl HostConfig {
    pub fn validate(&self) -> Result<()> {
        if self.user.trim().is_empty() {
            return Err(anyhow!("user must be non-empty"));
        }
        if self.group.trim().is_empty() {
            return Err(anyhow!("group must be non-empty"));
        }
        if self.repository.url.trim().is_empty() {
            return Err(anyhow!("repository.url must be non-empty"));
        }
        if self.web.service.trim().is_empty() {
            return Err(anyhow!("web.service must be non-empty"));
        }
        if self.commands.timeout_secs == 0 {
            return Err(anyhow!("commands.timeout_secs must be > 0"));
        }
        if self.commands.output_limit_bytes == 0 {
            return Err(anyhow!("commands.output_limit_bytes must be > 0"));
        }
        let mut paths = vec![
            ("home", &self.home),
            ("install_root", &self.install_root),
            ("lock_path", &self.lock_path),
            ("repository.dest", &self.repository.dest),
            ("ssh.key_path", &self.ssh.key_path),
            ("web.site_dest", &self.web.site_dest),
            ("web.cgi_dir", &self.web.cgi_dir),
            ("web.cert_path", &self.web.cert_path),
            ("web.key_path", &self.web.key_path),
        ];
        for template in &self.templates {
            paths.push(("templates.dest", &template.dest));
        }
        for (field, path) in paths {
            if !path.is_absolute() {
                return Err(anyhow!("{field} must be an absolute path: {}", path.display()));
            }
        }
        if self.repository.marker.is_absolute() {
            return Err(anyhow!("repository.marker must be relative to repository.dest"));
        }
        Ok(())
    }

    /// Placeholder values available to every rendered template.
    pub fn template_tokens(&self) -> Vec<(String, String)> {
        vec![
            ("USER".to_string(), self.user.clone()),
            ("GROUP".to_string(), self.group.clone()),
            ("HOME".to_string(), self.home.display().to_string()),
            (
                "INSTALL_ROOT".to_string(),
                self.install_root.display().to_string(),
            ),
            (
                "REPO_DIR".to_string(),
                self.repository.dest.display().to_string(),
            ),
            ("CGI_DIR".to_string(), self.web.cgi_dir.display().to_string()),
            (
                "CERT_FILE".to_string(),
                self.web.cert_path.display().to_string(),
            ),
            (
                "KEY_FILE".to_string(),
                self.web.key_path.display().to_string(),
            ),
        ]
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HostConfig::default()`.
pub fn load_config(path: &Path) -> Result<HostConfig> {
    if !path.exists() {
        let cfg = HostConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HostConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Render config as TOML.
pub fn render_config(cfg: &HostConfig) -> Result<String> {
    toml::to_string_pretty(cfg).context("serialize config toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, HostConfig::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("host.toml");
        fs::write(
            &path,
            "user = \"svc\"\n\n[repository]\nbranch = \"stable\"\n\n[web]\nself_signed = false\n",
        )
        .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.user, "svc");
        assert_eq!(cfg.group, "tools");
        assert_eq!(cfg.repository.branch.as_deref(), Some("stable"));
        assert_eq!(cfg.repository.marker, PathBuf::from(".git"));
        assert!(!cfg.web.self_signed);
        assert_eq!(cfg.web.service, "apache2");
    }

    #[test]
    fn rendered_default_loads_back() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("host.toml");
        let cfg = HostConfig::default();
        fs::write(&path, render_config(&cfg).expect("render")).expect("write");
        assert_eq!(load_config(&path).expect("load"), cfg);
    }

    #[test]
    fn rejects_relative_paths() {
        let cfg = HostConfig {
            install_root: PathBuf::from("opt/tools"),
            ..HostConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("install_root"));
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut cfg = HostConfig::default();
        cfg.commands.timeout_secs = 0;
        assert!(cfg.validate().is_err());
    }
}
