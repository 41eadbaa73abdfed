//! Identity database adapter: accounts and groups via `getent`/`useradd`.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::io::process::{CommandOutput, CommandRunner};

/// `getent` exit status for "key not found".
const GETENT_NOT_FOUND: i32 = 2;
/// `useradd`/`groupadd` exit status for "id already in use".
const ID_IN_USE: i32 = 4;

/// A passwd entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// A group entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub gid: u32,
}

/// Requested account shape for [`IdentityDb::create_account`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub name: String,
    pub group: String,
    pub uid_hint: Option<u32>,
    pub home: PathBuf,
    pub shell: PathBuf,
}

/// Host identity database.
pub trait IdentityDb {
    fn user(&self, name: &str) -> Result<Option<Account>>;
    fn group(&self, name: &str) -> Result<Option<Group>>;
    /// Create a group. `gid_hint` is best-effort.
    fn create_group(&self, name: &str, gid_hint: Option<u32>) -> Result<()>;
    /// Create an account. `spec.uid_hint` is best-effort.
    fn create_account(&self, spec: &AccountSpec) -> Result<()>;
    /// True when the account has a usable (set, unlocked) password.
    fn password_set(&self, name: &str) -> Result<bool>;
    fn set_password(&self, name: &str, secret: &str) -> Result<()>;

    fn account_exists(&self, name: &str) -> Result<bool> {
        Ok(self.user(name)?.is_some())
    }

    fn group_exists(&self, name: &str) -> Result<bool> {
        Ok(self.group(name)?.is_some())
    }
}

/// [`IdentityDb`] backed by the host's NSS databases and shadow tools.
#[derive(Debug, Clone)]
pub struct HostIdentity {
    runner: CommandRunner,
}

impl HostIdentity {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    fn getent(&self, database: &str, key: &str) -> Result<Option<String>> {
        let mut cmd = Command::new("getent");
        cmd.arg(database).arg(key);
        let output = self.runner.run(cmd)?;
        if output.status.code() == Some(GETENT_NOT_FOUND) {
            return Ok(None);
        }
        if !output.success() {
            return Err(anyhow!(
                "getent {database} {key} failed with status {:?}",
                output.status.code()
            ));
        }
        Ok(output.stdout_text().lines().next().map(str::to_string))
    }

    /// Run an id-allocating command, retrying without the hint if the id is taken.
    fn create_with_hint(
        &self,
        build: impl Fn(Option<u32>) -> Command,
        hint: Option<u32>,
    ) -> Result<()> {
        let output = self.runner.run(build(hint))?;
        if output.success() {
            return Ok(());
        }
        if hint.is_some() && output.status.code() == Some(ID_IN_USE) {
            warn!(hint = ?hint, "requested id already in use, letting allocator choose");
            self.runner.run_checked(build(None))?;
            return Ok(());
        }
        Err(command_failure(&build(hint), &output))
    }
}

fn command_failure(cmd: &Command, output: &CommandOutput) -> anyhow::Error {
    anyhow!(
        "{} failed with status {:?}: {}",
        crate::io::process::describe(cmd),
        output.status.code(),
        output.stderr_text().trim()
    )
}

impl IdentityDb for HostIdentity {
    #[instrument(skip(self))]
    fn user(&self, name: &str) -> Result<Option<Account>> {
        match self.getent("passwd", name)? {
            Some(line) => parse_passwd_line(&line).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    fn group(&self, name: &str) -> Result<Option<Group>> {
        match self.getent("group", name)? {
            Some(line) => parse_group_line(&line).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    fn create_group(&self, name: &str, gid_hint: Option<u32>) -> Result<()> {
        debug!("creating group");
        self.create_with_hint(
            |hint| {
                let mut cmd = Command::new("groupadd");
                if let Some(gid) = hint {
                    cmd.arg("--gid").arg(gid.to_string());
                }
                cmd.arg(name);
                cmd
            },
            gid_hint,
        )
        .with_context(|| format!("create group {name}"))
    }

    #[instrument(skip_all, fields(name = %spec.name))]
    fn create_account(&self, spec: &AccountSpec) -> Result<()> {
        debug!("creating account");
        self.create_with_hint(
            |hint| {
                let mut cmd = Command::new("useradd");
                cmd.arg("--create-home")
                    .arg("--home-dir")
                    .arg(&spec.home)
                    .arg("--gid")
                    .arg(&spec.group)
                    .arg("--shell")
                    .arg(&spec.shell);
                if let Some(uid) = hint {
                    cmd.arg("--uid").arg(uid.to_string());
                }
                cmd.arg(&spec.name);
                cmd
            },
            spec.uid_hint,
        )
        .with_context(|| format!("create account {}", spec.name))
    }

    #[instrument(skip(self))]
    fn password_set(&self, name: &str) -> Result<bool> {
        let mut cmd = Command::new("passwd");
        cmd.arg("--status").arg(name);
        let output = self.runner.run_checked(cmd)?;
        parse_passwd_status(&output.stdout_text())
    }

    #[instrument(skip(self, secret))]
    fn set_password(&self, name: &str, secret: &str) -> Result<()> {
        let input = format!("{name}:{secret}\n");
        self.runner
            .run_checked_with_input(Command::new("chpasswd"), input.as_bytes())
            .map(|_| ())
            .with_context(|| format!("set password for {name}"))
    }
}

/// Parse `name:x:uid:gid:gecos:home:shell`.
fn parse_passwd_line(line: &str) -> Result<Account> {
    let fields: Vec<&str> = line.trim_end().split(':').collect();
    if fields.len() != 7 {
        return Err(anyhow!("unexpected passwd entry: '{line}'"));
    }
    Ok(Account {
        name: fields[0].to_string(),
        uid: fields[2]
            .parse()
            .with_context(|| format!("parse uid in '{line}'"))?,
        gid: fields[3]
            .parse()
            .with_context(|| format!("parse gid in '{line}'"))?,
        home: PathBuf::from(fields[5]),
        shell: PathBuf::from(fields[6]),
    })
}

/// Parse `name:x:gid:members`.
fn parse_group_line(line: &str) -> Result<Group> {
    let fields: Vec<&str> = line.trim_end().split(':').collect();
    if fields.len() != 4 {
        return Err(anyhow!("unexpected group entry: '{line}'"));
    }
    Ok(Group {
        name: fields[0].to_string(),
        gid: fields[2]
            .parse()
            .with_context(|| format!("parse gid in '{line}'"))?,
    })
}

/// Parse `passwd --status` output: second field `P` means a usable password.
fn parse_passwd_status(out: &str) -> Result<bool> {
    let state = out
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("unexpected passwd --status output: '{}'", out.trim()))?;
    match state {
        "P" | "PS" => Ok(true),
        "L" | "LK" | "NP" | "NL" => Ok(false),
        other => Err(anyhow!("unknown password state '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_passwd_entry() {
        let account = parse_passwd_line("tools:x:1500:1500:Tools:/opt/tools:/bin/bash\n")
            .expect("parse");
        assert_eq!(
            account,
            Account {
                name: "tools".to_string(),
                uid: 1500,
                gid: 1500,
                home: PathBuf::from("/opt/tools"),
                shell: PathBuf::from("/bin/bash"),
            }
        );
    }

    #[test]
    fn rejects_short_passwd_entry() {
        assert!(parse_passwd_line("tools:x:1500").is_err());
    }

    #[test]
    fn parses_group_entry_with_members() {
        let group = parse_group_line("tools:x:1500:alice,bob").expect("parse");
        assert_eq!(group.gid, 1500);
        assert_eq!(group.name, "tools");
    }

    #[test]
    fn passwd_status_distinguishes_locked_and_set() {
        assert!(parse_passwd_status("tools P 2024-01-01 0 99999 7 -1").expect("parse"));
        assert!(!parse_passwd_status("tools L 2024-01-01 0 99999 7 -1").expect("parse"));
        assert!(!parse_passwd_status("tools NP 2024-01-01 0 99999 7 -1").expect("parse"));
        assert!(parse_passwd_status("tools").is_err());
    }
}
