//! Test-only steps and in-memory host collaborators.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::git::Vcs;
use crate::io::identity::{Account, AccountSpec, Group, IdentityDb};
use crate::io::keys::KeyGenerator;
use crate::io::packages::PackageManager;
use crate::io::services::ServiceManager;
use crate::primitives::Host;

/// Shared record of which scripted steps were probed and applied.
#[derive(Debug, Default, Clone)]
pub struct Journal {
    entries: Rc<RefCell<Vec<(String, &'static str)>>>,
}

impl Journal {
    fn record(&self, name: &str, phase: &'static str) {
        self.entries.borrow_mut().push((name.to_string(), phase));
    }

    /// True when the named step was probed or applied at all.
    pub fn touched(&self, name: &str) -> bool {
        self.entries.borrow().iter().any(|(n, _)| n == name)
    }

    pub fn applied(&self, name: &str) -> bool {
        self.entries
            .borrow()
            .iter()
            .any(|(n, phase)| n == name && *phase == "apply")
    }

    /// Phases in call order, as `name:phase`.
    pub fn calls(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .map(|(n, phase)| format!("{n}:{phase}"))
            .collect()
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    present: bool,
    probe_error: Option<String>,
    apply_error: Option<String>,
    ineffective: bool,
}

/// Step with scripted probe/apply behavior.
///
/// Clones share the same simulated host state, so a test can keep a handle
/// to a step placed in a plan and [`fix`](ScriptedStep::fix) it between runs.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    state: Rc<RefCell<ScriptState>>,
    verified: bool,
    warning: Option<String>,
    fallback: Option<String>,
    journal: Option<(Journal, String)>,
}

impl ScriptedStep {
    fn with_state(state: ScriptState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
            verified: true,
            warning: None,
            fallback: None,
            journal: None,
        }
    }

    pub fn satisfied() -> Self {
        Self::with_state(ScriptState {
            present: true,
            ..ScriptState::default()
        })
    }

    /// Absent until applied.
    pub fn unsatisfied() -> Self {
        Self::with_state(ScriptState::default())
    }

    pub fn probe_error(msg: &str) -> Self {
        Self::with_state(ScriptState {
            probe_error: Some(msg.to_string()),
            ..ScriptState::default()
        })
    }

    pub fn apply_error(msg: &str) -> Self {
        Self::with_state(ScriptState {
            apply_error: Some(msg.to_string()),
            ..ScriptState::default()
        })
    }

    /// Apply reports success but the state never appears.
    pub fn ineffective() -> Self {
        Self::with_state(ScriptState {
            ineffective: true,
            ..ScriptState::default()
        })
    }

    pub fn unverified(mut self) -> Self {
        self.verified = false;
        self
    }

    pub fn warning(mut self, msg: &str) -> Self {
        self.warning = Some(msg.to_string());
        self
    }

    pub fn fallback(mut self, msg: &str) -> Self {
        self.fallback = Some(msg.to_string());
        self
    }

    pub fn journal(mut self, journal: &Journal, name: &str) -> Self {
        self.journal = Some((journal.clone(), name.to_string()));
        self
    }

    /// Clear scripted errors, as if an operator repaired the host.
    pub fn fix(&self) {
        let mut state = self.state.borrow_mut();
        state.probe_error = None;
        state.apply_error = None;
        state.ineffective = false;
    }

    fn note(&self, phase: &'static str) {
        if let Some((journal, name)) = &self.journal {
            journal.record(name, phase);
        }
    }
}

impl Converge for ScriptedStep {
    fn describe(&self) -> String {
        "scripted step".to_string()
    }

    fn probe(&self) -> Result<Probe> {
        self.note("probe");
        let state = self.state.borrow();
        if let Some(msg) = &state.probe_error {
            return Err(anyhow!("{msg}"));
        }
        Ok(if state.present {
            Probe::Satisfied
        } else {
            Probe::Unsatisfied
        })
    }

    fn apply(&self) -> Result<Applied> {
        self.note("apply");
        let mut state = self.state.borrow_mut();
        if let Some(msg) = &state.apply_error {
            return Err(anyhow!("{msg}"));
        }
        if !state.ineffective {
            state.present = true;
        }
        Ok(Applied {
            warning: self.warning.clone(),
        })
    }

    fn verify(&self) -> Option<Result<Probe>> {
        self.verified.then(|| self.probe())
    }

    fn interactive_fallback(&self) -> Option<String> {
        self.fallback.clone()
    }
}

/// In-memory account and group database.
#[derive(Debug, Default)]
pub struct FakeIdentity {
    users: RefCell<BTreeMap<String, Account>>,
    groups: RefCell<BTreeMap<String, Group>>,
    passwords: RefCell<BTreeSet<String>>,
    fixed_ids: Option<(u32, u32)>,
}

impl FakeIdentity {
    /// Database that gives every created account and group the uid/gid of
    /// this process, so catalogs that chown to new accounts run unprivileged.
    pub fn mapped_to_current_process() -> Self {
        Self {
            fixed_ids: current_ids().ok(),
            ..Self::default()
        }
    }

    /// Database where `user`/`group` map to the uid/gid of this process, so
    /// chown to them succeeds without privileges.
    pub fn with_current_user(user: &str, group: &str) -> Self {
        let (uid, gid) = current_ids().unwrap_or((0, 0));
        let db = Self::default();
        db.add_group(group, gid);
        db.add_user(user, uid, gid);
        db
    }

    pub fn add_group(&self, name: &str, gid: u32) {
        self.groups.borrow_mut().insert(
            name.to_string(),
            Group {
                name: name.to_string(),
                gid,
            },
        );
    }

    pub fn add_user(&self, name: &str, uid: u32, gid: u32) {
        self.users.borrow_mut().insert(
            name.to_string(),
            Account {
                name: name.to_string(),
                uid,
                gid,
                home: PathBuf::from("/home").join(name),
                shell: PathBuf::from("/bin/sh"),
            },
        );
    }

    pub fn user_uid(&self, name: &str) -> Option<u32> {
        self.users.borrow().get(name).map(|a| a.uid)
    }

    pub fn group_gid(&self, name: &str) -> Option<u32> {
        self.groups.borrow().get(name).map(|g| g.gid)
    }

    fn next_free(taken: impl Iterator<Item = u32>) -> u32 {
        let taken: BTreeSet<u32> = taken.collect();
        (2000..).find(|id| !taken.contains(id)).unwrap_or(u32::MAX)
    }
}

fn current_ids() -> Result<(u32, u32)> {
    let probe = tempfile::tempdir().context("create id probe dir")?;
    let meta = fs::metadata(probe.path()).context("stat id probe dir")?;
    Ok((meta.uid(), meta.gid()))
}

impl IdentityDb for FakeIdentity {
    fn user(&self, name: &str) -> Result<Option<Account>> {
        Ok(self.users.borrow().get(name).cloned())
    }

    fn group(&self, name: &str) -> Result<Option<Group>> {
        Ok(self.groups.borrow().get(name).cloned())
    }

    fn create_group(&self, name: &str, gid_hint: Option<u32>) -> Result<()> {
        let in_use = |gid: u32| self.groups.borrow().values().any(|g| g.gid == gid);
        let gid = match (self.fixed_ids, gid_hint) {
            (Some((_, gid)), _) => gid,
            (None, Some(gid)) if !in_use(gid) => gid,
            _ => Self::next_free(self.groups.borrow().values().map(|g| g.gid)),
        };
        self.add_group(name, gid);
        Ok(())
    }

    fn create_account(&self, spec: &AccountSpec) -> Result<()> {
        let in_use = |uid: u32| self.users.borrow().values().any(|a| a.uid == uid);
        let uid = match (self.fixed_ids, spec.uid_hint) {
            (Some((uid, _)), _) => uid,
            (None, Some(uid)) if !in_use(uid) => uid,
            _ => Self::next_free(self.users.borrow().values().map(|a| a.uid)),
        };
        let gid = self.group_gid(&spec.group).unwrap_or(uid);
        self.users.borrow_mut().insert(
            spec.name.clone(),
            Account {
                name: spec.name.clone(),
                uid,
                gid,
                home: spec.home.clone(),
                shell: spec.shell.clone(),
            },
        );
        Ok(())
    }

    fn password_set(&self, name: &str) -> Result<bool> {
        Ok(self.passwords.borrow().contains(name))
    }

    fn set_password(&self, name: &str, _secret: &str) -> Result<()> {
        self.passwords.borrow_mut().insert(name.to_string());
        Ok(())
    }
}

/// Package manager over an in-memory installed set.
#[derive(Debug, Default)]
pub struct FakePackages {
    installed: RefCell<BTreeSet<String>>,
    installs: RefCell<Vec<Vec<String>>>,
    failure: Option<String>,
}

impl FakePackages {
    pub fn with_installed(names: &[&str]) -> Self {
        let pm = Self::default();
        pm.installed
            .borrow_mut()
            .extend(names.iter().map(|n| n.to_string()));
        pm
    }

    /// Every install attempt fails with `msg`.
    pub fn failing(msg: &str) -> Self {
        Self {
            failure: Some(msg.to_string()),
            ..Self::default()
        }
    }

    pub fn install_calls(&self) -> Vec<Vec<String>> {
        self.installs.borrow().clone()
    }
}

impl PackageManager for FakePackages {
    fn missing(&self, names: &[String]) -> Result<Vec<String>> {
        let installed = self.installed.borrow();
        Ok(names
            .iter()
            .filter(|n| !installed.contains(*n))
            .cloned()
            .collect())
    }

    fn install(&self, names: &[String]) -> Result<()> {
        self.installs.borrow_mut().push(names.to_vec());
        if let Some(msg) = &self.failure {
            return Err(anyhow!("{msg}"));
        }
        self.installed.borrow_mut().extend(names.iter().cloned());
        Ok(())
    }
}

/// Version control that "clones" by creating `dest/.git`.
#[derive(Debug, Default)]
pub struct FakeVcs {
    branches: RefCell<BTreeMap<PathBuf, String>>,
    clones: Cell<usize>,
}

impl FakeVcs {
    pub fn clones(&self) -> usize {
        self.clones.get()
    }
}

impl Vcs for FakeVcs {
    fn clone_or_update(&self, _url: &str, dest: &Path, branch: Option<&str>) -> Result<()> {
        if !dest.exists() {
            fs::create_dir_all(dest.join(".git"))
                .with_context(|| format!("create {}", dest.display()))?;
            self.clones.set(self.clones.get() + 1);
        }
        let mut branches = self.branches.borrow_mut();
        let current = branches
            .entry(dest.to_path_buf())
            .or_insert_with(|| "main".to_string());
        if let Some(branch) = branch {
            *current = branch.to_string();
        }
        Ok(())
    }

    fn current_branch(&self, dest: &Path) -> Result<String> {
        self.branches
            .borrow()
            .get(dest)
            .cloned()
            .ok_or_else(|| anyhow!("{} is not a working copy", dest.display()))
    }
}

/// Service manager that tracks enablement and restart counts.
#[derive(Debug, Default)]
pub struct FakeServices {
    enabled: RefCell<BTreeSet<String>>,
    restarts: RefCell<BTreeMap<String, usize>>,
}

impl FakeServices {
    pub fn restarts(&self, service: &str) -> usize {
        self.restarts.borrow().get(service).copied().unwrap_or(0)
    }
}

impl ServiceManager for FakeServices {
    fn is_enabled(&self, service: &str) -> Result<bool> {
        Ok(self.enabled.borrow().contains(service))
    }

    fn enable(&self, service: &str) -> Result<()> {
        self.enabled.borrow_mut().insert(service.to_string());
        Ok(())
    }

    fn restart(&self, service: &str) -> Result<()> {
        *self
            .restarts
            .borrow_mut()
            .entry(service.to_string())
            .or_default() += 1;
        Ok(())
    }
}

/// Key generator writing placeholder private and `.pub` files.
#[derive(Debug, Default)]
pub struct FakeKeys {
    generated: RefCell<Vec<PathBuf>>,
}

impl FakeKeys {
    pub fn generated(&self) -> Vec<PathBuf> {
        self.generated.borrow().clone()
    }
}

impl KeyGenerator for FakeKeys {
    fn describe(&self) -> String {
        "fake keygen".to_string()
    }

    fn generate(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(path, "private").with_context(|| format!("write {}", path.display()))?;
        let mut public = path.as_os_str().to_owned();
        public.push(".pub");
        fs::write(&public, "public").context("write public key")?;
        self.generated.borrow_mut().push(path.to_path_buf());
        Ok(())
    }
}

/// Typed handles to every fake behind a [`Host`].
#[derive(Debug, Default, Clone)]
pub struct FakeHost {
    pub identity: Rc<FakeIdentity>,
    pub vcs: Rc<FakeVcs>,
    pub packages: Rc<FakePackages>,
    pub services: Rc<FakeServices>,
    pub ssh_keys: Rc<FakeKeys>,
    pub tls: Rc<FakeKeys>,
}

impl FakeHost {
    pub fn host(&self) -> Host {
        Host {
            identity: self.identity.clone(),
            vcs: self.vcs.clone(),
            packages: self.packages.clone(),
            services: self.services.clone(),
            ssh_keys: self.ssh_keys.clone(),
            tls: self.tls.clone(),
        }
    }
}
