//! Idempotent convergence engine for single-host provisioning.
//!
//! A host's desired state is declared as a static catalog of steps. Each step
//! probes whether its piece of state already holds and applies a mutation only
//! when it does not, so re-running a plan is always safe. The architecture
//! keeps a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (step contract, plan ordering,
//!   run report). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting adapters (subprocesses, package manager, git,
//!   identity database, templates, services, key generation, config, lock).
//! - **[`primitives`]**: Probe/apply implementations on top of the `io` traits.
//!
//! [`engine`] drives a built plan; [`catalog`] holds the compiled step tables.

pub mod catalog;
pub mod core;
pub mod engine;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod primitives;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
