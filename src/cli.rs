//! CLI argument parsing.
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;

use crate::{
    AutomatonError, Result,
    git::GitCredentials,
    orchestrator::config::{DEFAULT_TRUNK_BRANCH, DEFAULT_WORKSPACE},
};

/// Global CLI arguments for GitHub access and debugging.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = false, global = true)]
    /// Enable debug logging.
    pub debug: bool,

    #[arg(
        long,
        env = "GITHUB_TOKEN",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    /// GitHub personal access token.
    pub github_token: String,

    #[arg(long, env = "GITHUB_USER", default_value = "", global = true)]
    /// GitHub user pushing over https.
    pub github_user: String,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Release automation subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Advance a release by one step and report where it stands.
    Run(RunArgs),

    /// Print the versions released by a manifest, newest first.
    ListVersions {
        #[arg(long)]
        /// Path or http(s) url of the release file.
        release_file: String,
    },

    /// Rewrite KEY=value lines of an env file.
    UpdateVars(UpdateVarsArgs),
}

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    #[arg(long)]
    /// Path or http(s) url of the release file.
    pub release_file: String,

    #[arg(long)]
    /// Release tracker pull request url.
    pub release_tracker: String,

    #[arg(long, default_value_t = 0)]
    /// Ignore tracker comments posted after this comment id.
    pub comment_id: u64,

    #[arg(long, default_value = DEFAULT_WORKSPACE)]
    /// Directory repositories are cloned into. Wiped on every run.
    pub workspace: PathBuf,

    #[arg(long, default_value = ".")]
    /// Checkout of the repository holding the release changelogs.
    pub script_root: PathBuf,

    #[arg(long, default_value = DEFAULT_TRUNK_BRANCH)]
    /// Default branch of every released repository.
    pub trunk_branch: String,
}

#[derive(clap::Args, Debug)]
pub struct UpdateVarsArgs {
    #[arg(long)]
    /// Env file to rewrite.
    pub env_file: PathBuf,

    #[arg(long, value_delimiter = ',')]
    /// Comma separated KEY=value pairs.
    pub vars: Vec<String>,
}

impl Args {
    /// GitHub token, required by every command that talks to GitHub.
    pub fn github_token(&self) -> Result<SecretString> {
        if self.github_token.is_empty() {
            return Err(AutomatonError::InvalidArgs(
                "must set github token".into(),
            ));
        }
        Ok(SecretString::from(self.github_token.clone()))
    }

    /// Credentials used to push over https.
    pub fn git_credentials(&self) -> Result<GitCredentials> {
        let token = self.github_token()?;
        let user = if self.github_user.is_empty() {
            // GitHub accepts any user name with a token
            "x-access-token".to_string()
        } else {
            self.github_user.clone()
        };
        Ok(GitCredentials { user, token })
    }
}

impl UpdateVarsArgs {
    /// Parsed `KEY=value` pairs in the order given.
    pub fn pairs(&self) -> Result<Vec<(String, String)>> {
        self.vars
            .iter()
            .map(|pair| {
                pair.split_once('=')
                    .filter(|(key, _)| !key.is_empty())
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .ok_or_else(|| {
                        AutomatonError::InvalidArgs(format!(
                            "expected KEY=value, found {pair}"
                        ))
                    })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for CLI argument parsing.
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn parses_run_defaults() {
        let args = Args::try_parse_from([
            "release-automaton",
            "run",
            "--release-file",
            "releases/v2020.6.16/release.json",
            "--release-tracker",
            "https://github.com/stashed/CHANGELOG/pull/1",
            "--github-token",
            "token",
        ])
        .unwrap();

        assert!(!args.debug);
        let Command::Run(run) = &args.command else {
            panic!("expected run command");
        };
        assert_eq!(run.comment_id, 0);
        assert_eq!(run.workspace, PathBuf::from(DEFAULT_WORKSPACE));
        assert_eq!(run.script_root, PathBuf::from("."));
        assert_eq!(run.trunk_branch, DEFAULT_TRUNK_BRANCH);
        assert_eq!(args.github_token().unwrap().expose_secret(), "token");
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "release-automaton",
            "list-versions",
            "--release-file",
            "release.json",
            "--debug",
        ])
        .unwrap();

        assert!(args.debug);
        assert!(matches!(args.command, Command::ListVersions { .. }));
    }

    #[test]
    fn requires_github_token() {
        let args = Args {
            debug: false,
            github_token: "".into(),
            github_user: "".into(),
            command: Command::ListVersions {
                release_file: "release.json".into(),
            },
        };

        assert!(matches!(
            args.git_credentials(),
            Err(AutomatonError::InvalidArgs(_))
        ));
    }

    #[test]
    fn defaults_git_user() {
        let args = Args {
            debug: false,
            github_token: "token".into(),
            github_user: "".into(),
            command: Command::ListVersions {
                release_file: "release.json".into(),
            },
        };

        let creds = args.git_credentials().unwrap();
        assert_eq!(creds.user, "x-access-token");
    }

    #[test]
    fn parses_var_pairs() {
        let args = UpdateVarsArgs {
            env_file: PathBuf::from("Makefile.env"),
            vars: vec!["STASH_VERSION=v0.9.0".into(), "CHART=".into()],
        };

        assert_eq!(
            args.pairs().unwrap(),
            vec![
                ("STASH_VERSION".to_string(), "v0.9.0".to_string()),
                ("CHART".to_string(), "".to_string()),
            ]
        );

        let args = UpdateVarsArgs {
            env_file: PathBuf::from("Makefile.env"),
            vars: vec!["charts".into()],
        };
        assert!(args.pairs().is_err());
    }
}
