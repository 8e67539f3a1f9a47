//! Custom error types for release-automaton.
//!
//! Every operation of the release state machine returns [`Result`] so a
//! single run can be unit tested transition by transition. The binary turns
//! the first error it sees into a process level failure report.

use thiserror::Error;

/// Main error type for release-automaton operations.
#[derive(Error, Debug)]
pub enum AutomatonError {
    // Cli args errors
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    // Manifest errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid version {version}: {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error(
        "version {0} is invalid because it is a patch release but includes a pre-release component"
    )]
    PatchPrerelease(String),

    #[error("repo {repo} is missing branch {branch} for tag {tag}")]
    MissingBranch {
        repo: String,
        tag: String,
        branch: String,
    },

    // Comment protocol errors
    #[error("Malformed reply \"{line}\": {reason}")]
    MalformedReply { line: String, reason: String },

    #[error("Unknown reply type {0}")]
    UnknownReply(String),

    #[error("Invalid or unsupported url: {0}")]
    InvalidUrl(String),

    // Forge/Git errors
    #[error("Forge operation failed: {0}")]
    ForgeError(String),

    #[error("Git operation failed: {0}")]
    GitError(#[from] git2::Error),

    #[error("Command `{command}` failed: {reason}")]
    CommandFailed { command: String, reason: String },

    #[error("go.mod error: {0}")]
    GoModError(String),

    // Network/API errors
    #[error("Network request failed: {0}")]
    NetworkError(String),

    #[error("API rate limit exceeded")]
    RateLimitExceeded,

    #[error("Template rendering failed: {0}")]
    TemplateError(#[from] tera::Error),

    #[error("JSON parse error: {0}")]
    JsonParseError(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParseError(#[from] serde_yaml::Error),

    #[error("Regular expression error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Logger initialization error: {0}")]
    LoggerError(#[from] log::SetLoggerError),

    // Generic wrapper for other errors
    #[error(transparent)]
    Other(#[from] color_eyre::Report),
}

/// Result type alias using AutomatonError
pub type Result<T> = std::result::Result<T, AutomatonError>;

impl AutomatonError {
    /// Create a forge error with context
    pub fn forge(msg: impl Into<String>) -> Self {
        Self::ForgeError(msg.into())
    }

    /// Create an invalid config error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn invalid_version(
        version: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            reason: reason.to_string(),
        }
    }

    pub fn missing_branch(
        repo: impl Into<String>,
        tag: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self::MissingBranch {
            repo: repo.into(),
            tag: tag.into(),
            branch: branch.into(),
        }
    }

    pub fn malformed_reply(
        line: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::MalformedReply {
            line: line.into(),
            reason: reason.into(),
        }
    }

    pub fn command_failed(
        command: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

// Implement From for std::io::Error - wraps in Other variant for generic I/O errors
impl From<std::io::Error> for AutomatonError {
    fn from(err: std::io::Error) -> Self {
        Self::Other(color_eyre::Report::from(err))
    }
}

impl From<reqwest::Error> for AutomatonError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status()
            && status.as_u16() == 429
        {
            return Self::RateLimitExceeded;
        }
        Self::NetworkError(err.to_string())
    }
}

// Implement From for octocrab errors (GitHub API)
impl From<octocrab::Error> for AutomatonError {
    fn from(err: octocrab::Error) -> Self {
        match &err {
            octocrab::Error::GitHub { source, .. }
                if source.message.contains("rate limit") =>
            {
                Self::RateLimitExceeded
            }
            _ => Self::ForgeError(format!("GitHub API error: {}", err)),
        }
    }
}
