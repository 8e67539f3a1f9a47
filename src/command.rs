//! Subcommand implementations.
//!
//! - **run**: advance a release by one step against its tracker pull request
//! - **list_versions**: print the versions a manifest releases
//! - **update_vars**: rewrite variables of an env file

/// Drive the release state machine once.
pub mod run;

/// List the single-tag versions of a manifest.
pub mod list_versions;

/// Rewrite `KEY=value` lines of an env file.
pub mod update_vars;
