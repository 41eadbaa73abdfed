//! Side-effecting adapters for the host collaborators the engine calls out to.

pub mod config;
pub mod git;
pub mod identity;
pub mod keys;
pub mod lock;
pub mod packages;
pub mod process;
pub mod services;
pub mod template;
