//! GitHub collaborator used by the release state machine.
//!
//! The state machine only talks to the forge through the [`traits::Forge`]
//! trait so runs can be exercised against a mock.

/// Default color for labels created by release-automaton, in hex format.
pub const DEFAULT_LABEL_COLOR: &str = "a47dab";
/// Label guarding a release tracker while a run is in progress.
pub const LOCKED_LABEL: &str = "locked";
/// Label asking the forge to merge a pull request once checks pass.
pub const AUTOMERGE_LABEL: &str = "automerge";

/// GitHub API client implementation.
pub mod github;

/// Request and response types shared by forge implementations.
pub mod request;

/// Common trait for forge abstraction.
pub mod traits;

/// Repository and pull request url parsing.
pub mod util;
