use url::Url;

use crate::{
    AutomatonError, Result,
    forge::request::{PullRequestRef, RepoRef},
};

const GITHUB_HOST: &str = "github.com";

fn parse_github_url(raw: &str) -> Result<(Url, Vec<String>)> {
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };

    let url = Url::parse(&with_scheme)
        .map_err(|_| AutomatonError::InvalidUrl(raw.to_string()))?;

    if url.host_str() != Some(GITHUB_HOST) {
        return Err(AutomatonError::InvalidUrl(raw.to_string()));
    }

    let segments = url
        .path_segments()
        .map(|s| s.map(String::from).collect::<Vec<_>>())
        .unwrap_or_default();

    Ok((url, segments))
}

/// Parse `github.com/<owner>/<repo>`, with or without a scheme.
pub fn parse_repo_url(raw: &str) -> Result<RepoRef> {
    let (_, segments) = parse_github_url(raw)?;
    match segments.as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok(RepoRef::new(owner, repo))
        }
        _ => Err(AutomatonError::InvalidUrl(raw.to_string())),
    }
}

/// Parse `https://github.com/<owner>/<repo>/pull/<number>`.
pub fn parse_pull_request_url(raw: &str) -> Result<PullRequestRef> {
    let (_, segments) = parse_github_url(raw)?;
    match segments.as_slice() {
        [owner, repo, pull, number]
            if pull == "pull" && !owner.is_empty() && !repo.is_empty() =>
        {
            let number = number
                .parse::<u64>()
                .map_err(|_| AutomatonError::InvalidUrl(raw.to_string()))?;
            Ok(PullRequestRef {
                repo: RepoRef::new(owner, repo),
                number,
            })
        }
        _ => Err(AutomatonError::InvalidUrl(raw.to_string())),
    }
}

/// Browser url of pull request `number` in `repo_url`.
pub fn pull_request_html_url(repo_url: &str, number: u64) -> String {
    let repo_url = repo_url
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    format!("https://{repo_url}/pull/{number}")
}
