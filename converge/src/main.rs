//! Idempotent host convergence CLI.
//!
//! Builds a static step catalog from the host config, orders it, and either
//! prints it (`plan`), probes it (`check`) or converges the host (`apply`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

use converge::catalog::{self, Catalog};
use converge::core::plan::Plan;
use converge::core::report::{RunReport, RunStatus};
use converge::core::types::StepOutcome;
use converge::engine::{self, CheckState};
use converge::exit_codes;
use converge::io::config::{DEFAULT_CONFIG_PATH, HostConfig, load_config, render_config};
use converge::io::lock::{LockError, RunLock};
use converge::logging::{self, LogOptions, TransitionLog};
use converge::primitives::Host;

const PASSWORD_ENV: &str = "CONVERGE_PASSWORD";

#[derive(Parser)]
#[command(
    name = "converge",
    version,
    about = "Converge a host toward its declared state with idempotent steps"
)]
struct Cli {
    /// Host configuration file (missing file = defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(flatten)]
    log: LogArgs,
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct LogArgs {
    /// Debug diagnostics.
    #[arg(short = 'd', long, global = true)]
    debug: bool,
    /// Info diagnostics.
    #[arg(short = 'i', long = "log-info", global = true)]
    info: bool,
    /// Only warnings and errors.
    #[arg(short = 'q', long, global = true)]
    quiet: bool,
    /// No output at all.
    #[arg(short = 'S', long, global = true)]
    silent: bool,
    /// Write transition lines and diagnostics to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    /// Append to `--log-file` instead of truncating it.
    #[arg(long, global = true)]
    log_append: bool,
    /// Numeric threshold (0 EMR .. 3 ERR, 4 WRN, 5 LOG, 6 INF, 7 DBG).
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..=7))]
    log_level: Option<u8>,
    /// Keep error and warning lines on stdout.
    #[arg(long, global = true)]
    no_log_stderr: bool,
    /// Send transition lines to syslog instead of the console.
    #[arg(short = 's', long, global = true)]
    syslog: bool,
}

impl LogArgs {
    fn options(&self) -> LogOptions {
        LogOptions {
            debug: self.debug,
            info: self.info,
            quiet: self.quiet,
            silent: self.silent,
            log_level: self.log_level,
            log_file: self.log_file.clone(),
            append: self.log_append,
            no_stderr: self.no_log_stderr,
            syslog: self.syslog,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the validated step order.
    Plan {
        #[arg(long, value_enum, default_value_t = Catalog::All)]
        catalog: Catalog,
    },
    /// Converge the host: probe every step and apply what is missing.
    Apply {
        #[arg(long, value_enum, default_value_t = Catalog::All)]
        catalog: Catalog,
        /// Write the run report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Do not take the run lock.
        #[arg(long)]
        no_lock: bool,
    },
    /// Probe every step without changing anything.
    Check {
        #[arg(long, value_enum, default_value_t = Catalog::All)]
        catalog: Catalog,
    },
    /// Print the effective configuration as TOML.
    Config,
}

fn main() {
    let cli = Cli::parse();
    let code = match logging::init(&cli.log.options()) {
        Ok(sink) => match run(cli, &sink) {
            Ok(code) => code,
            Err(err) => {
                eprintln!("{err:#}");
                exit_codes::INVALID
            }
        },
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli, sink: &TransitionLog) -> Result<i32> {
    let cfg = load_config(&cli.config)?;
    debug!(config = %cli.config.display(), "config loaded");
    match cli.command {
        Command::Plan { catalog } => cmd_plan(&cfg, catalog),
        Command::Apply {
            catalog,
            report,
            no_lock,
        } => cmd_apply(&cfg, catalog, report.as_deref(), no_lock, sink),
        Command::Check { catalog } => cmd_check(&cfg, catalog),
        Command::Config => {
            print!("{}", render_config(&cfg)?);
            Ok(exit_codes::OK)
        }
    }
}

fn build_plan(cfg: &HostConfig, catalog: Catalog, secret: Option<String>) -> Result<Plan> {
    let host = Host::system(cfg);
    let plan = catalog::build(catalog, cfg, &host, secret)
        .with_context(|| format!("build {} catalog", catalog.as_str()))?;
    debug!(catalog = catalog.as_str(), steps = plan.len(), "plan built");
    Ok(plan)
}

fn cmd_plan(cfg: &HostConfig, catalog: Catalog) -> Result<i32> {
    let plan = build_plan(cfg, catalog, None)?;
    for (position, step) in plan.steps().iter().enumerate() {
        let mut line = format!(
            "{:>2}. {}: {}",
            position + 1,
            step.name(),
            step.action().describe()
        );
        if !step.depends_on().is_empty() {
            line.push_str(&format!(" (after {})", step.depends_on().join(", ")));
        }
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_check(cfg: &HostConfig, catalog: Catalog) -> Result<i32> {
    let plan = build_plan(cfg, catalog, None)?;
    for line in engine::check(&plan) {
        let state = match &line.state {
            CheckState::Satisfied => "satisfied".to_string(),
            CheckState::WouldApply => "would apply".to_string(),
            CheckState::Skipped(reason) => format!("skipped ({reason})"),
            CheckState::Unknown(cause) => format!("unknown: {cause}"),
        };
        println!("{}: {state} [{}]", line.name, line.description);
    }
    Ok(exit_codes::OK)
}

fn cmd_apply(
    cfg: &HostConfig,
    catalog: Catalog,
    report_path: Option<&Path>,
    no_lock: bool,
    sink: &TransitionLog,
) -> Result<i32> {
    let secret = resolve_secret(cfg)?;
    let plan = build_plan(cfg, catalog, secret)?;

    let _lock = if no_lock {
        None
    } else {
        match RunLock::acquire(&cfg.lock_path) {
            Ok(lock) => Some(lock),
            Err(err @ LockError::Held { .. }) => {
                eprintln!("{err}; refusing to start");
                return Ok(exit_codes::LOCKED);
            }
            Err(LockError::Io(err)) => return Err(err),
        }
    };

    info!(catalog = catalog.as_str(), steps = plan.len(), "converging");
    let started = Instant::now();
    let report = engine::run_with(&plan, |outcome| sink.transition(outcome));
    sink.summary(&report, started.elapsed().as_secs());

    if let Some(path) = report_path {
        write_report(path, &report)?;
    }

    match report.into_result() {
        Ok(_) => Ok(exit_codes::OK),
        Err(failure) => {
            eprintln!("{failure}");
            Ok(exit_codes::FAILED)
        }
    }
}

/// Account password from `password_file`, else from `CONVERGE_PASSWORD`.
fn resolve_secret(cfg: &HostConfig) -> Result<Option<String>> {
    if let Some(path) = &cfg.password_file {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("read password file {}", path.display()))?;
        let secret = raw.lines().next().unwrap_or_default().to_string();
        return Ok((!secret.is_empty()).then_some(secret));
    }
    Ok(std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|secret| !secret.is_empty()))
}

#[derive(Serialize)]
struct ReportFile<'a> {
    status: RunStatus,
    exit_code: i32,
    failing_step: Option<&'a str>,
    outcomes: &'a [StepOutcome],
}

/// Serialize the report to pretty-printed JSON with trailing newline.
fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    let file = ReportFile {
        status: report.status(),
        exit_code: if report.is_success() {
            exit_codes::OK
        } else {
            exit_codes::FAILED
        },
        failing_step: report.failing_step(),
        outcomes: report.outcomes(),
    };
    let mut payload = serde_json::to_string_pretty(&file).context("serialize report json")?;
    payload.push('\n');
    fs::write(path, payload).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plan_defaults_to_all() {
        let cli = Cli::parse_from(["converge", "plan"]);
        assert!(matches!(
            cli.command,
            Command::Plan {
                catalog: Catalog::All
            }
        ));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parse_apply_with_report_and_flags() {
        let cli = Cli::parse_from([
            "converge",
            "apply",
            "--catalog",
            "web",
            "--report",
            "/tmp/r.json",
            "--no-lock",
            "-q",
        ]);
        assert!(cli.log.quiet);
        match cli.command {
            Command::Apply {
                catalog,
                report,
                no_lock,
            } => {
                assert_eq!(catalog, Catalog::Web);
                assert_eq!(report, Some(PathBuf::from("/tmp/r.json")));
                assert!(no_lock);
            }
            _ => panic!("expected apply"),
        }
    }

    #[test]
    fn global_flags_before_subcommand() {
        let cli = Cli::parse_from([
            "converge",
            "--config",
            "/srv/host.toml",
            "-S",
            "--log-file",
            "/tmp/c.log",
            "--log-append",
            "check",
        ]);
        let opts = cli.log.options();
        assert!(opts.silent);
        assert!(opts.append);
        assert_eq!(opts.log_file, Some(PathBuf::from("/tmp/c.log")));
        assert_eq!(cli.config, PathBuf::from("/srv/host.toml"));
    }

    #[test]
    fn level_stream_and_syslog_flags() {
        let cli = Cli::parse_from([
            "converge",
            "--log-level",
            "3",
            "--no-log-stderr",
            "-s",
            "plan",
        ]);
        let opts = cli.log.options();
        assert_eq!(opts.log_level, Some(3));
        assert!(opts.no_stderr);
        assert!(opts.syslog);
        assert_eq!(opts.filter_directive(), "error");
    }

    #[test]
    fn log_level_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["converge", "--log-level", "8", "plan"]).is_err());
    }

    #[test]
    fn unknown_catalog_is_rejected() {
        assert!(Cli::try_parse_from(["converge", "plan", "--catalog", "db"]).is_err());
    }

    #[test]
    fn password_file_first_line_is_the_secret() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pw");
        fs::write(&path, "hunter2\ntrailing\n").expect("write");
        let cfg = HostConfig {
            password_file: Some(path),
            ..HostConfig::default()
        };
        assert_eq!(
            resolve_secret(&cfg).expect("secret"),
            Some("hunter2".to_string())
        );
    }

    #[test]
    fn empty_password_file_means_no_secret() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("pw");
        fs::write(&path, "").expect("write");
        let cfg = HostConfig {
            password_file: Some(path),
            ..HostConfig::default()
        };
        assert_eq!(resolve_secret(&cfg).expect("secret"), None);
    }
}
