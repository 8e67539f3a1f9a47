//! `update-vars` command.
use log::*;

use crate::{Result, cli::UpdateVarsArgs};

/// Rewrite the env file in place.
pub fn execute(args: &UpdateVarsArgs) -> Result<()> {
    let pairs = args.pairs()?;
    let content = std::fs::read_to_string(&args.env_file)?;
    let updated = update_vars(&content, &pairs);

    if updated != content {
        info!("updating {}", args.env_file.display());
        std::fs::write(&args.env_file, updated)?;
    }

    Ok(())
}

/// Replace the value of every `KEY=` line whose key is given. Later pairs
/// win over earlier ones; other lines are kept untouched.
pub fn update_vars(content: &str, pairs: &[(String, String)]) -> String {
    content
        .split('\n')
        .map(|line| {
            pairs
                .iter()
                .rev()
                .find(|(key, _)| {
                    line.strip_prefix(key.as_str())
                        .is_some_and(|rest| rest.starts_with('='))
                })
                .map(|(key, value)| format!("{key}={value}"))
                .unwrap_or_else(|| line.to_string())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ENV: &str = "STASH_VERSION=v0.9.0\nSTASH_VERSION_SUFFIX=x\n# comment\nCHARTS=stash\n";

    #[test]
    fn test_only_matching_keys_change() {
        let updated = update_vars(
            ENV,
            &[("STASH_VERSION".into(), "v0.10.0".into())],
        );
        assert_eq!(
            updated,
            "STASH_VERSION=v0.10.0\nSTASH_VERSION_SUFFIX=x\n# comment\nCHARTS=stash\n"
        );
    }

    #[test]
    fn test_unknown_keys_are_ignored() {
        let updated = update_vars(ENV, &[("MISSING".into(), "1".into())]);
        assert_eq!(updated, ENV);
    }

    #[test]
    fn test_execute_rewrites_file() {
        let dir = TempDir::new().unwrap();
        let env_file = dir.path().join("Makefile.env");
        std::fs::write(&env_file, ENV).unwrap();

        execute(&UpdateVarsArgs {
            env_file: env_file.clone(),
            vars: vec!["CHARTS=stash-enterprise".into()],
        })
        .unwrap();

        let content = std::fs::read_to_string(&env_file).unwrap();
        assert!(content.contains("CHARTS=stash-enterprise\n"));
        assert!(content.starts_with("STASH_VERSION=v0.9.0\n"));
    }

    #[test]
    fn test_missing_file_fails() {
        let result = execute(&UpdateVarsArgs {
            env_file: PathBuf::from("/nonexistent/Makefile.env"),
            vars: vec!["CHARTS=stash".into()],
        });
        assert!(result.is_err());
    }
}
