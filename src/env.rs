//! Template variables handed to project commands and branch templates.
use regex::{Captures, Regex};
use std::{collections::BTreeMap, sync::LazyLock};
use url::Url;

use crate::{AutomatonError, Result};

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:\{(?<braced>[A-Za-z_][A-Za-z0-9_]*)\}|(?<bare>[A-Za-z_][A-Za-z0-9_]*))")
        .expect("template variable regex is valid")
});

pub type TemplateVars = BTreeMap<String, String>;

/// `github.com/stashed/stash` -> `STASHED_STASH_TAG`
pub fn repo_url_to_tag_key(repo_url: &str) -> Result<String> {
    repo_url_to_key(repo_url, "tag")
}

/// `stash-enterprise` -> `STASH_ENTERPRISE_VERSION`
pub fn key_to_version_key(key: &str) -> String {
    to_env_key(&format!("{key}/version"))
}

fn repo_url_to_key(repo_url: &str, suffix: &str) -> Result<String> {
    let with_scheme = if repo_url.contains("://") {
        repo_url.to_string()
    } else {
        format!("https://{repo_url}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|_| AutomatonError::InvalidUrl(repo_url.to_string()))?;
    Ok(to_env_key(&format!("{}/{suffix}", url.path())))
}

fn to_env_key(key: &str) -> String {
    key.trim_matches('/')
        .replace("//", "/")
        .replace(['/', '-'], "_")
        .to_uppercase()
}

/// Replace `${VAR}` and `$VAR` references. Unknown variables expand to an
/// empty string.
pub fn substitute(template: &str, vars: &TemplateVars) -> String {
    VAR_REGEX
        .replace_all(template, |caps: &Captures| {
            let name = caps
                .name("braced")
                .or_else(|| caps.name("bare"))
                .map(|m| m.as_str())
                .unwrap_or_default();
            vars.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Merge `overrides` on top of `base`.
pub fn merge_vars(base: &TemplateVars, overrides: TemplateVars) -> TemplateVars {
    let mut merged = base.clone();
    merged.extend(overrides);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_url_to_tag_key() {
        assert_eq!(
            repo_url_to_tag_key("github.com/stashed/stash").unwrap(),
            "STASHED_STASH_TAG"
        );
        assert_eq!(
            repo_url_to_tag_key("https://github.com/kubedb/mongodb-init")
                .unwrap(),
            "KUBEDB_MONGODB_INIT_TAG"
        );
    }

    #[test]
    fn test_key_to_version_key() {
        assert_eq!(key_to_version_key("stash-enterprise"), "STASH_ENTERPRISE_VERSION");
    }

    #[test]
    fn test_substitute() {
        let vars = TemplateVars::from([
            ("TAG".to_string(), "v1.2.0".to_string()),
            ("RELEASE".to_string(), "v2020.6.16".to_string()),
        ]);
        assert_eq!(substitute("release-${TAG}", &vars), "release-v1.2.0");
        assert_eq!(
            substitute("./hack/release.sh $RELEASE ${TAG}", &vars),
            "./hack/release.sh v2020.6.16 v1.2.0"
        );
        assert_eq!(substitute("x${MISSING}y", &vars), "xy");
        assert_eq!(substitute("no vars here", &vars), "no vars here");
    }

    #[test]
    fn test_merge_vars_prefers_overrides() {
        let base = TemplateVars::from([
            ("A".to_string(), "1".to_string()),
            ("B".to_string(), "2".to_string()),
        ]);
        let merged =
            merge_vars(&base, TemplateVars::from([("B".into(), "3".into())]));
        assert_eq!(merged["A"], "1");
        assert_eq!(merged["B"], "3");
    }
}
