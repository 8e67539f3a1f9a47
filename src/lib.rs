//! Drives a multi-repository product release from a declarative manifest.
//!
//! Progress is kept as slash-command replies on a release tracker pull
//! request, so every invocation rebuilds its state from the comment thread
//! and advances the release by one step.
pub mod branch;
pub mod changelog;
pub mod cli;
pub mod command;
pub mod env;
pub mod error;
pub mod forge;
pub mod git;
pub mod gomod;
pub mod manifest;
pub mod orchestrator;
pub mod reply;
pub mod shell;
pub mod version;

pub use error::{AutomatonError, Result};

#[cfg(test)]
pub mod test_helpers;
