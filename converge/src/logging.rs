//! Log setup and the step transition sink.
//!
//! Two outputs:
//!
//! - **Diagnostics**: `tracing` events filtered by `RUST_LOG`, or by the level
//!   flags when it is unset. They go to stderr or `--log-file`.
//! - **Transition lines**: one timestamped line per step outcome, written by
//!   [`TransitionLog`]. These are product output and do not go through
//!   `tracing`. They go to the console (ERR/WRN on stderr, LOG on stdout),
//!   to `--log-file`, or to syslog with `--syslog`.
//!
//! Levels follow the classic numeric scale: 0 EMR, 1 ALR, 2 CRI, 3 ERR,
//! 4 WRN, 5 LOG, 6 INF, 7 DBG. A line prints when its level is at or below the
//! effective threshold.

use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Local, TimeZone, Utc};
use chrono_tz::Tz;
use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::core::elapsed;
use crate::core::report::RunReport;
use crate::core::types::{StepOutcome, StepStatus};

/// Threshold used when no level flag is given (LOG).
pub const DEFAULT_LEVEL: u8 = 5;

/// Level flags and log destination from the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogOptions {
    pub debug: bool,
    pub info: bool,
    pub quiet: bool,
    pub silent: bool,
    /// Numeric threshold; `None` means [`DEFAULT_LEVEL`].
    pub log_level: Option<u8>,
    pub log_file: Option<PathBuf>,
    pub append: bool,
    /// Keep ERR/WRN lines on stdout with everything else.
    pub no_stderr: bool,
    pub syslog: bool,
}

impl LogOptions {
    /// Effective threshold, or `None` when silenced.
    ///
    /// Silent beats quiet beats info beats debug beats `--log-level`.
    pub fn threshold(&self) -> Option<u8> {
        if self.silent {
            None
        } else if self.quiet {
            Some(4)
        } else if self.info {
            Some(6)
        } else if self.debug {
            Some(7)
        } else {
            Some(self.log_level.unwrap_or(DEFAULT_LEVEL))
        }
    }

    /// Diagnostic filter directive matching the threshold.
    pub fn filter_directive(&self) -> &'static str {
        match self.threshold() {
            None => "off",
            Some(0..=3) => "error",
            Some(4 | 5) => "warn",
            Some(6) => "info",
            Some(_) => "debug",
        }
    }
}

/// Level of a transition or summary line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Err,
    Wrn,
    Log,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Err => "ERR",
            Level::Wrn => "WRN",
            Level::Log => "LOG",
        }
    }

    pub fn severity(self) -> u8 {
        match self {
            Level::Err => 3,
            Level::Wrn => 4,
            Level::Log => 5,
        }
    }

    /// Console stream for this level.
    pub fn stream(self, no_stderr: bool) -> Stream {
        if no_stderr || self.severity() >= 5 {
            Stream::Stdout
        } else {
            Stream::Stderr
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

fn enabled(threshold: Option<u8>, level: Level) -> bool {
    threshold.is_some_and(|max| level.severity() <= max)
}

/// Initialize the tracing subscriber and open the transition sink.
///
/// `RUST_LOG` wins over the level flags when set.
pub fn init(opts: &LogOptions) -> Result<TransitionLog> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(opts.filter_directive()));

    let file = match &opts.log_file {
        Some(path) => {
            let mut open = OpenOptions::new();
            open.create(true);
            if opts.append {
                open.append(true);
            } else {
                open.write(true).truncate(true);
            }
            let file = open
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            Some(Arc::new(file))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter);
    match &file {
        Some(file) => registry
            .with(fmt::layer().with_writer(file.clone()).with_ansi(false).compact())
            .try_init(),
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .try_init(),
    }
    .context("install tracing subscriber")?;

    let sink = if opts.syslog {
        let formatter = Formatter3164 {
            facility: Facility::LOG_LOCAL2,
            hostname: None,
            process: "converge".to_string(),
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter).map_err(|err| anyhow!("connect to syslog: {err}"))?;
        Sink::Syslog(Mutex::new(logger))
    } else if let Some(file) = file {
        Sink::File(file)
    } else {
        Sink::Console {
            no_stderr: opts.no_stderr,
        }
    };

    Ok(TransitionLog {
        sink,
        threshold: opts.threshold(),
        zone: local_zone(),
    })
}

enum Sink {
    Console { no_stderr: bool },
    File(Arc<File>),
    Syslog(Mutex<Logger<LoggerBackend, Formatter3164>>),
}

/// Writes transition and summary lines to the configured destination.
pub struct TransitionLog {
    sink: Sink,
    threshold: Option<u8>,
    zone: Option<Tz>,
}

impl TransitionLog {
    /// Emit the line for one step outcome.
    pub fn transition(&self, outcome: &StepOutcome) {
        self.emit(level(outcome), &message(outcome));
    }

    /// Emit the end-of-run summary; ERR when the run halted.
    pub fn summary(&self, report: &RunReport, elapsed_secs: u64) {
        let level = if report.failing_step().is_some() {
            Level::Err
        } else {
            Level::Log
        };
        self.emit(level, &summary_line(report, elapsed_secs));
    }

    fn emit(&self, level: Level, message: &str) {
        if !enabled(self.threshold, level) {
            return;
        }
        let line = || format!("{} {}: {message}", self.timestamp(), level.as_str());
        let result = match &self.sink {
            Sink::Console { no_stderr } => match level.stream(*no_stderr) {
                Stream::Stdout => writeln!(std::io::stdout(), "{}", line()),
                Stream::Stderr => writeln!(std::io::stderr(), "{}", line()),
            }
            .map_err(|err| err.to_string()),
            Sink::File(file) => {
                writeln!(file.as_ref(), "{}", line()).map_err(|err| err.to_string())
            }
            Sink::Syslog(logger) => match logger.lock() {
                Ok(mut logger) => match level {
                    Level::Err => logger.err(message),
                    Level::Wrn => logger.warning(message),
                    Level::Log => logger.notice(message),
                }
                .map_err(|err| err.to_string()),
                Err(_) => Err("syslog writer poisoned".to_string()),
            },
        };
        if let Err(err) = result {
            tracing::warn!(err = %err, "failed to write transition line");
        }
    }

    fn timestamp(&self) -> String {
        let now = Utc::now();
        match self.zone {
            Some(zone) => timestamp(&now.with_timezone(&zone)),
            None => timestamp(&now.with_timezone(&Local)),
        }
    }
}

/// Local zone from `TZ`, else the system setting. Named zones print their
/// abbreviation ("EST"); without one the numeric offset is used.
fn local_zone() -> Option<Tz> {
    std::env::var("TZ")
        .ok()
        .and_then(|name| zone_named(&name))
        .or_else(|| {
            iana_time_zone::get_timezone()
                .ok()
                .and_then(|name| zone_named(&name))
        })
}

fn zone_named(name: &str) -> Option<Tz> {
    name.trim_start_matches(':').parse().ok()
}

fn timestamp<Z: TimeZone>(now: &DateTime<Z>) -> String
where
    Z::Offset: Display,
{
    format!("{}:", now.format("%Y-%m-%d %H:%M:%S %Z"))
}

fn level(outcome: &StepOutcome) -> Level {
    match outcome.status {
        StepStatus::Failed => Level::Err,
        StepStatus::Applied if outcome.has_warning() => Level::Wrn,
        _ => Level::Log,
    }
}

/// `<status> <step>[: detail]`
fn message(outcome: &StepOutcome) -> String {
    let mut line = format!("{} {}", outcome.status.as_str(), outcome.name);
    if let Some(detail) = &outcome.detail {
        line.push_str(": ");
        line.push_str(detail);
    }
    line
}

/// `YYYY-MM-DD HH:MM:SS TZ: LVL: <status> <step>[: detail]`
pub fn format_transition<Z: TimeZone>(now: &DateTime<Z>, outcome: &StepOutcome) -> String
where
    Z::Offset: Display,
{
    format!(
        "{} {}: {}",
        timestamp(now),
        level(outcome).as_str(),
        message(outcome)
    )
}

/// Per-status counts plus elapsed time in long form.
pub fn summary_line(report: &RunReport, elapsed_secs: u64) -> String {
    let verdict = match report.failing_step() {
        Some(step) => format!("halted at {step}"),
        None => "converged".to_string(),
    };
    format!(
        "{verdict}: {} applied, {} skipped, {} failed in {}",
        report.count(StepStatus::Applied),
        report.count(StepStatus::Skipped),
        report.count(StepStatus::Failed),
        elapsed::describe(elapsed_secs)
    )
}
