//! Existence-guarded group and account creation, and account passwords.

use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::step::Converge;
use crate::core::types::{Applied, Probe};
use crate::io::identity::{AccountSpec, IdentityDb};

/// A group named `name`, created with `gid_hint` when possible.
pub struct EnsureGroup {
    name: String,
    gid_hint: Option<u32>,
    identity: Rc<dyn IdentityDb>,
}

impl EnsureGroup {
    pub fn new(
        name: impl Into<String>,
        gid_hint: Option<u32>,
        identity: Rc<dyn IdentityDb>,
    ) -> Self {
        Self {
            name: name.into(),
            gid_hint,
            identity,
        }
    }
}

impl Converge for EnsureGroup {
    fn describe(&self) -> String {
        format!("group {}", self.name)
    }

    fn probe(&self) -> Result<Probe> {
        if self.identity.group_exists(&self.name)? {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied)
        }
    }

    fn apply(&self) -> Result<Applied> {
        self.identity.create_group(&self.name, self.gid_hint)?;
        Ok(Applied::clean())
    }
}

/// An account matching `spec`. Existence is the only thing probed.
pub struct EnsureUser {
    spec: AccountSpec,
    identity: Rc<dyn IdentityDb>,
}

impl EnsureUser {
    pub fn new(spec: AccountSpec, identity: Rc<dyn IdentityDb>) -> Self {
        Self { spec, identity }
    }
}

impl Converge for EnsureUser {
    fn describe(&self) -> String {
        format!("account {} in group {}", self.spec.name, self.spec.group)
    }

    fn probe(&self) -> Result<Probe> {
        if self.identity.account_exists(&self.spec.name)? {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied)
        }
    }

    fn apply(&self) -> Result<Applied> {
        self.identity.create_account(&self.spec)?;
        Ok(Applied::clean())
    }
}

/// A usable password on `user`, set from a secret resolved before the run.
///
/// Setting passwords non-interactively is unreliable on some releases, so the
/// primitive advertises a manual fallback instead of prompting.
pub struct AccountPassword {
    user: String,
    secret: Option<String>,
    identity: Rc<dyn IdentityDb>,
}

impl AccountPassword {
    pub fn new(
        user: impl Into<String>,
        secret: Option<String>,
        identity: Rc<dyn IdentityDb>,
    ) -> Self {
        Self {
            user: user.into(),
            secret,
            identity,
        }
    }
}

impl Converge for AccountPassword {
    fn describe(&self) -> String {
        format!("password for account {}", self.user)
    }

    fn probe(&self) -> Result<Probe> {
        if self.identity.password_set(&self.user)? {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Unsatisfied)
        }
    }

    fn apply(&self) -> Result<Applied> {
        let secret = self
            .secret
            .as_deref()
            .ok_or_else(|| anyhow!("no password supplied for {}", self.user))?;
        self.identity.set_password(&self.user, secret)?;
        Ok(Applied::clean())
    }

    fn interactive_fallback(&self) -> Option<String> {
        Some(format!(
            "run `passwd {}` interactively, then re-run",
            self.user
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::test_support::FakeIdentity;

    fn spec(name: &str) -> AccountSpec {
        AccountSpec {
            name: name.to_string(),
            group: "g".to_string(),
            uid_hint: Some(1500),
            home: PathBuf::from("/home/u"),
            shell: PathBuf::from("/bin/sh"),
        }
    }

    #[test]
    fn group_is_created_once() {
        let identity = Rc::new(FakeIdentity::default());
        let step = EnsureGroup::new("g", Some(1500), identity.clone());

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
        assert_eq!(identity.group_gid("g"), Some(1500));
    }

    #[test]
    fn account_uses_uid_hint_when_free() {
        let identity = Rc::new(FakeIdentity::default());
        let step = EnsureUser::new(spec("u"), identity.clone());

        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
        assert_eq!(identity.user_uid("u"), Some(1500));
    }

    #[test]
    fn taken_uid_hint_is_ignored() {
        let identity = Rc::new(FakeIdentity::default());
        EnsureUser::new(spec("first"), identity.clone())
            .apply()
            .expect("apply first");
        EnsureUser::new(spec("second"), identity.clone())
            .apply()
            .expect("apply second");
        assert_ne!(identity.user_uid("second"), Some(1500));
    }

    #[test]
    fn password_apply_without_secret_fails_with_fallback() {
        let identity = Rc::new(FakeIdentity::default());
        let step = AccountPassword::new("u", None, identity);

        assert_eq!(step.probe().expect("probe"), Probe::Unsatisfied);
        assert!(step.apply().is_err());
        assert!(step.interactive_fallback().is_some_and(|hint| hint.contains("passwd u")));
    }

    #[test]
    fn password_is_set_from_secret() {
        let identity = Rc::new(FakeIdentity::default());
        let step = AccountPassword::new("u", Some("hunter2".to_string()), identity.clone());

        step.apply().expect("apply");
        assert_eq!(step.probe().expect("probe"), Probe::Satisfied);
    }
}
