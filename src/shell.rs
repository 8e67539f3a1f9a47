//! Runs manifest commands inside a repository checkout.
//!
//! Commands are split with shell quoting rules but are not handed to a
//! shell. A single trailing `> file` or `>> file` redirect of stdout is
//! supported.
use log::*;
use std::{
    fs::{File, OpenOptions},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use crate::{AutomatonError, Result, env::TemplateVars};

#[cfg_attr(test, mockall::automock)]
pub trait CommandRunner {
    /// Run `command` in `dir` with `env` added to the inherited environment.
    fn run(&self, dir: &Path, command: &str, env: &TemplateVars) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Redirect {
    None,
    Truncate(PathBuf),
    Append(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedCommand {
    program: String,
    args: Vec<String>,
    redirect: Redirect,
}

/// Redirects are split off at the first `>>` or `>` before quoting is
/// considered, so a quoted `>` such as `echo '<a>'` is misread as one.
fn parse_command(dir: &Path, command: &str) -> Result<ParsedCommand> {
    let resolve = |target: &str| {
        let target = PathBuf::from(target.trim());
        if target.is_absolute() {
            target
        } else {
            dir.join(target)
        }
    };

    let (cmdline, redirect) = if let Some((cmd, file)) = command.split_once(">>")
    {
        (cmd, Redirect::Append(resolve(file)))
    } else if let Some((cmd, file)) = command.split_once('>') {
        (cmd, Redirect::Truncate(resolve(file)))
    } else {
        (command, Redirect::None)
    };

    let mut fields = shell_words::split(cmdline).map_err(|e| {
        AutomatonError::command_failed(command, e.to_string())
    })?;

    if fields.is_empty() {
        return Err(AutomatonError::command_failed(command, "missing command"));
    }

    let program = fields.remove(0);

    Ok(ParsedCommand {
        program,
        args: fields,
        redirect,
    })
}

/// Executes commands as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, dir: &Path, command: &str, env: &TemplateVars) -> Result<()> {
        let parsed = parse_command(dir, command)?;
        info!("[{}] $ {command}", dir.display());

        let stdout = match &parsed.redirect {
            Redirect::None => Stdio::inherit(),
            Redirect::Truncate(path) => Stdio::from(File::create(path)?),
            Redirect::Append(path) => Stdio::from(
                OpenOptions::new().create(true).append(true).open(path)?,
            ),
        };

        let status = Command::new(&parsed.program)
            .args(&parsed.args)
            .current_dir(dir)
            .envs(env)
            .stdout(stdout)
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| AutomatonError::command_failed(command, e.to_string()))?;

        if !status.success() {
            return Err(AutomatonError::command_failed(
                command,
                format!("exited with {status}"),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_command_redirects() {
        let dir = Path::new("/work/repo");

        let parsed = parse_command(dir, "echo 'a b' c").unwrap();
        assert_eq!(parsed.program, "echo");
        assert_eq!(parsed.args, vec!["a b", "c"]);
        assert_eq!(parsed.redirect, Redirect::None);

        let parsed = parse_command(dir, "echo x >> out.txt").unwrap();
        assert_eq!(
            parsed.redirect,
            Redirect::Append(PathBuf::from("/work/repo/out.txt"))
        );

        let parsed = parse_command(dir, "echo x > /tmp/out.txt").unwrap();
        assert_eq!(
            parsed.redirect,
            Redirect::Truncate(PathBuf::from("/tmp/out.txt"))
        );
    }

    #[test]
    fn test_parse_command_rejects_empty_and_unbalanced() {
        let dir = Path::new("/");
        assert!(parse_command(dir, "   ").is_err());
        assert!(parse_command(dir, "echo 'oops").is_err());
    }

    #[test]
    fn test_parse_command_splits_redirect_before_quotes() {
        let dir = Path::new("/work/repo");

        // the quoted `>` ends the command line, leaving `'<a` unbalanced
        assert!(parse_command(dir, "echo '<a>'").is_err());

        let parsed = parse_command(dir, "echo '<a' b>c").unwrap();
        assert_eq!(parsed.args, vec!["<a", "b"]);
        assert_eq!(
            parsed.redirect,
            Redirect::Truncate(PathBuf::from("/work/repo/c"))
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_run_writes_and_appends_stdout() {
        let dir = TempDir::new().unwrap();
        let runner = ShellRunner::new();
        let env = TemplateVars::from([("STASH_TAG".to_string(), "v0.9.0".to_string())]);

        runner.run(dir.path(), "echo first > out.txt", &env).unwrap();
        runner.run(dir.path(), "echo second >> out.txt", &env).unwrap();
        runner
            .run(dir.path(), "sh -c 'echo $STASH_TAG' >> out.txt", &env)
            .unwrap();

        let content = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content, "first\nsecond\nv0.9.0\n");

        runner.run(dir.path(), "echo reset > out.txt", &env).unwrap();
        let content = std::fs::read_to_string(dir.path().join("out.txt")).unwrap();
        assert_eq!(content, "reset\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_reports_failures() {
        let dir = TempDir::new().unwrap();
        let err = ShellRunner::new()
            .run(dir.path(), "false", &TemplateVars::new())
            .unwrap_err();
        assert!(matches!(err, AutomatonError::CommandFailed { .. }));
    }
}
