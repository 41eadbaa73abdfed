//! Static step catalogs: the compiled tables of what a host should look like.
//!
//! Every catalog is built from the same primitive library; per-target
//! differences are just different step lists. Steps are declared in a sensible
//! order and dependency edges pin the order that matters.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::core::plan::{BuildError, Plan};
use crate::core::step::Step;
use crate::io::config::HostConfig;
use crate::io::identity::AccountSpec;
use crate::primitives::{
    AccountPassword, CredentialMaterial, EnsureDirectory, EnsureGroup, EnsurePackages,
    EnsureRepository, EnsureUser, Host, Owner, RenderedFile, ServiceEnabled,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Catalog {
    /// Service account, tool repository, configs and keys.
    Core,
    /// Web server, CGI directory, TLS material and site config.
    Web,
    /// `core` followed by `web`.
    All,
}

impl Catalog {
    pub fn as_str(self) -> &'static str {
        match self {
            Catalog::Core => "core",
            Catalog::Web => "web",
            Catalog::All => "all",
        }
    }
}

/// Build and validate the plan for `catalog`.
///
/// `secret` is the account password resolved by the caller; without one the
/// password step is skipped.
pub fn build(
    catalog: Catalog,
    cfg: &HostConfig,
    host: &Host,
    secret: Option<String>,
) -> Result<Plan, BuildError> {
    let steps = match catalog {
        Catalog::Core => core_steps(cfg, host, secret),
        Catalog::Web => web_steps(cfg, host),
        Catalog::All => {
            let mut steps = core_steps(cfg, host, secret);
            steps.extend(web_steps(cfg, host));
            steps
        }
    };
    Plan::build(steps)
}

fn owner(cfg: &HostConfig) -> Owner {
    Owner::new(&cfg.user, &cfg.group)
}

fn tokens(cfg: &HostConfig) -> BTreeMap<String, String> {
    cfg.template_tokens().into_iter().collect()
}

/// Relative template sources live inside the cloned repository.
fn template_source(cfg: &HostConfig, src: &Path) -> PathBuf {
    if src.is_absolute() {
        src.to_path_buf()
    } else {
        cfg.repository.dest.join(src)
    }
}

pub fn core_steps(cfg: &HostConfig, host: &Host, secret: Option<String>) -> Vec<Step> {
    let mut steps = vec![
        Step::new(
            "install-root",
            EnsureDirectory::new(&cfg.install_root, host.identity.clone()).mode(0o755),
        ),
        Step::new(
            "packages",
            EnsurePackages::new(cfg.packages.clone(), host.packages.clone()),
        ),
        Step::new(
            "group",
            EnsureGroup::new(&cfg.group, cfg.gid, host.identity.clone()),
        ),
        Step::new(
            "user",
            EnsureUser::new(
                AccountSpec {
                    name: cfg.user.clone(),
                    group: cfg.group.clone(),
                    uid_hint: cfg.uid,
                    home: cfg.home.clone(),
                    shell: cfg.shell.clone(),
                },
                host.identity.clone(),
            ),
        )
        .after(&["group"]),
        Step::new(
            "home",
            EnsureDirectory::new(&cfg.home, host.identity.clone()).owned_by(owner(cfg)),
        )
        .after(&["user", "install-root"]),
        Step::new(
            "repository",
            EnsureRepository::new(&cfg.repository.url, &cfg.repository.dest, host.vcs.clone())
                .branch(cfg.repository.branch.clone())
                .marker(&cfg.repository.marker),
        )
        .after(&["install-root", "packages", "user"]),
    ];

    for template in &cfg.templates {
        let file = RenderedFile::new(
            template_source(cfg, &template.src),
            &template.dest,
            tokens(cfg),
            host.identity.clone(),
        )
        .mode(template.mode);
        // System paths outside the install root stay root-owned.
        let file = if template.dest.starts_with(&cfg.install_root) {
            file.owned_by(owner(cfg))
        } else {
            file
        };
        steps.push(
            Step::new(format!("template:{}", template.dest.display()), file)
                .after(&["repository", "user"]),
        );
    }

    steps.push(
        Step::new(
            "ssh-key",
            CredentialMaterial::new(&cfg.ssh.key_path, host.ssh_keys.clone(), host.identity.clone())
                .owned_by(owner(cfg)),
        )
        .after(&["user", "home"]),
    );

    let no_secret = secret.is_none();
    steps.push(
        Step::new(
            "password",
            AccountPassword::new(&cfg.user, secret, host.identity.clone()),
        )
        .after(&["user"])
        .skip_when("no password supplied", move || no_secret),
    );
    steps
}

pub fn web_steps(cfg: &HostConfig, host: &Host) -> Vec<Step> {
    let web = &cfg.web;
    let mut steps = vec![
        Step::new(
            "web-packages",
            EnsurePackages::new(web.packages.clone(), host.packages.clone()),
        ),
        Step::new(
            "cgi-dir",
            EnsureDirectory::new(&web.cgi_dir, host.identity.clone())
                .owned_by(owner(cfg))
                .mode(0o755),
        ),
    ];

    let mut site_deps = vec!["web-packages", "cgi-dir"];
    if web.self_signed {
        steps.push(
            Step::new(
                "tls",
                CredentialMaterial::new(&web.cert_path, host.tls.clone(), host.identity.clone()),
            )
            .after(&["web-packages"]),
        );
        site_deps.push("tls");
    }

    steps.push(
        Step::new(
            "site-config",
            RenderedFile::new(
                template_source(cfg, &web.site_template),
                &web.site_dest,
                tokens(cfg),
                host.identity.clone(),
            )
            .mode(Some(0o644)),
        )
        .after(&site_deps),
    );
    steps.push(
        Step::new(
            "web-service",
            ServiceEnabled::new(&web.service, host.services.clone())
                .restart_requires(vec![web.cert_path.clone(), web.key_path.clone()]),
        )
        .after(&["site-config"]),
    );
    steps
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::core::types::StepStatus;
    use crate::engine;
    use crate::io::config::TemplateConfig;
    use crate::test_support::{FakeHost, FakeIdentity};

    fn config(root: &Path) -> HostConfig {
        let mut cfg = HostConfig::default();
        cfg.install_root = root.join("opt/tools");
        cfg.home = root.join("home/tools");
        cfg.repository.dest = cfg.install_root.join("repo");
        cfg.ssh.key_path = cfg.install_root.join(".ssh/id_ed25519");
        cfg.web.cgi_dir = cfg.install_root.join("cgi-bin");
        cfg.web.site_template = root.join("site.conf.in");
        cfg.web.site_dest = root.join("etc/apache2/tools.conf");
        cfg.web.cert_path = root.join("etc/ssl/tools.crt");
        cfg.web.key_path = root.join("etc/ssl/tools.key");
        cfg
    }

    fn fake_host() -> FakeHost {
        FakeHost {
            identity: std::rc::Rc::new(FakeIdentity::mapped_to_current_process()),
            ..FakeHost::default()
        }
    }

    #[test]
    fn core_order_respects_dependencies() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let plan = build(Catalog::Core, &cfg, &fake_host().host(), None).expect("build");
        assert_eq!(
            plan.names(),
            vec![
                "install-root",
                "packages",
                "group",
                "user",
                "home",
                "repository",
                "ssh-key",
                "password"
            ]
        );
    }

    #[test]
    fn all_places_core_before_web() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let plan = build(Catalog::All, &cfg, &fake_host().host(), None).expect("build");
        let names = plan.names();
        assert_eq!(names.first(), Some(&"install-root"));
        assert_eq!(names.last(), Some(&"web-service"));
        assert_eq!(names.len(), 13);
    }

    #[test]
    fn web_without_self_signed_has_no_tls_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(temp.path());
        cfg.web.self_signed = false;
        let plan = build(Catalog::Web, &cfg, &fake_host().host(), None).expect("build");
        assert!(!plan.names().contains(&"tls"));
    }

    #[test]
    fn duplicate_template_destination_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut cfg = config(temp.path());
        let template = TemplateConfig {
            src: PathBuf::from("etc/profile.in"),
            dest: cfg.install_root.join(".profile"),
            mode: None,
        };
        cfg.templates = vec![template.clone(), template];
        let err = build(Catalog::Core, &cfg, &fake_host().host(), None).unwrap_err();
        assert!(matches!(err, BuildError::DuplicateName(_)));
    }

    #[test]
    fn relative_template_source_resolves_into_repository() {
        let cfg = HostConfig::default();
        assert_eq!(
            template_source(&cfg, Path::new("etc/profile.in")),
            cfg.repository.dest.join("etc/profile.in")
        );
        assert_eq!(
            template_source(&cfg, Path::new("/srv/t.in")),
            PathBuf::from("/srv/t.in")
        );
    }

    #[test]
    fn full_run_converges_then_skips_everything() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        fs::write(&cfg.web.site_template, "ScriptAlias /cgi-bin/ {{ CGI_DIR }}/\n")
            .expect("write template");
        let fakes = fake_host();
        let host = fakes.host();

        let plan = build(Catalog::All, &cfg, &host, Some("s3cret".to_string())).expect("build");
        let first = engine::run(&plan);
        assert!(first.is_success(), "{:?}", first.outcomes());
        assert_eq!(first.count(StepStatus::Applied), plan.len());

        let rendered = fs::read_to_string(&cfg.web.site_dest).expect("read site config");
        assert!(rendered.contains(&cfg.web.cgi_dir.display().to_string()));
        // FakeKeys never writes the separate TLS key file.
        assert_eq!(first.warnings().count(), 1);

        let second = engine::run(&plan);
        assert_eq!(second.count(StepStatus::Skipped), plan.len());
        assert_eq!(fakes.ssh_keys.generated().len(), 1);
    }

    #[test]
    fn password_step_skipped_without_secret() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = config(temp.path());
        let fakes = fake_host();
        let plan = build(Catalog::Core, &cfg, &fakes.host(), None).expect("build");

        let report = engine::run(&plan);
        let password = report
            .outcomes()
            .iter()
            .find(|o| o.name == "password")
            .expect("password outcome");
        assert_eq!(password.status, StepStatus::Skipped);
        assert_eq!(password.detail.as_deref(), Some("no password supplied"));
    }
}
