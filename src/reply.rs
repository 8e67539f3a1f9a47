//! Reply protocol spoken on the release tracker pull request.
//!
//! Every line of a tracker comment that starts with a known slash token is a
//! reply: a single fact about the state of one repository, such as
//! `/tagged github.com/stashed/stash` or
//! `/ready-to-tag github.com/stashed/stash 6f1c2e0`. Lines that do not start
//! with a known token are human chatter and are ignored, but a known token
//! with the wrong number of fields is rejected so a typo never silently
//! drops state.
use log::*;
use std::{collections::HashSet, fmt, str::FromStr};

use crate::{
    AutomatonError, Result,
    forge::util::{parse_pull_request_url, pull_request_html_url},
};

pub mod store;

pub use store::{MergeData, Replies, ReplyIndex};

/// Discriminant of a [`Reply`], one per slash token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReplyKind {
    OkToRelease,
    Done,
    Tagged,
    Pr,
    ReadyToTag,
    CherryPicked,
    Go,
    Chart,
    ChartPublished,
    KrewManifest,
    KrewManifestPublished,
}

impl ReplyKind {
    pub fn token(&self) -> &'static str {
        match self {
            ReplyKind::OkToRelease => "/ok-to-release",
            ReplyKind::Done => "/done",
            ReplyKind::Tagged => "/tagged",
            ReplyKind::Pr => "/pr",
            ReplyKind::ReadyToTag => "/ready-to-tag",
            ReplyKind::CherryPicked => "/cherry-picked",
            ReplyKind::Go => "/go",
            ReplyKind::Chart => "/chart",
            ReplyKind::ChartPublished => "/chart-published",
            ReplyKind::KrewManifest => "/krew-manifest",
            ReplyKind::KrewManifestPublished => "/krew-manifest-published",
        }
    }

    /// Accepted number of fields after the token, inclusive.
    fn arity(&self) -> (usize, usize) {
        match self {
            ReplyKind::OkToRelease | ReplyKind::Done => (0, 0),
            ReplyKind::Tagged
            | ReplyKind::Pr
            | ReplyKind::ChartPublished
            | ReplyKind::KrewManifest
            | ReplyKind::KrewManifestPublished => (1, 1),
            ReplyKind::ReadyToTag | ReplyKind::Chart => (2, 2),
            ReplyKind::CherryPicked => (3, 3),
            ReplyKind::Go => (2, 3),
        }
    }
}

impl FromStr for ReplyKind {
    type Err = AutomatonError;

    fn from_str(s: &str) -> Result<Self> {
        let kind = match s {
            "/ok-to-release" => ReplyKind::OkToRelease,
            "/done" => ReplyKind::Done,
            "/tagged" => ReplyKind::Tagged,
            "/pr" => ReplyKind::Pr,
            "/ready-to-tag" => ReplyKind::ReadyToTag,
            "/cherry-picked" => ReplyKind::CherryPicked,
            "/go" => ReplyKind::Go,
            "/chart" => ReplyKind::Chart,
            "/chart-published" => ReplyKind::ChartPublished,
            "/krew-manifest" => ReplyKind::KrewManifest,
            "/krew-manifest-published" => ReplyKind::KrewManifestPublished,
            other => return Err(AutomatonError::UnknownReply(other.into())),
        };
        Ok(kind)
    }
}

impl fmt::Display for ReplyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// One fact recorded on the release tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    OkToRelease,
    Done,
    Tagged {
        repo: String,
    },
    Pr {
        repo: String,
        number: u64,
    },
    ReadyToTag {
        repo: String,
        merge_commit_sha: String,
    },
    CherryPicked {
        repo: String,
        branch: String,
        merge_commit_sha: String,
    },
    Go {
        repo: String,
        module_path: String,
        vcs_root: Option<String>,
    },
    Chart {
        repo: String,
        tag: String,
    },
    ChartPublished {
        repo: String,
    },
    KrewManifest {
        repo: String,
    },
    KrewManifestPublished {
        repo: String,
    },
}

/// Identity of a reply within its kind. Two replies of the same kind with
/// equal keys describe the same fact; the later one wins on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReplyKey {
    pub repo: String,
    pub qualifier: String,
}

impl Reply {
    pub fn kind(&self) -> ReplyKind {
        match self {
            Reply::OkToRelease => ReplyKind::OkToRelease,
            Reply::Done => ReplyKind::Done,
            Reply::Tagged { .. } => ReplyKind::Tagged,
            Reply::Pr { .. } => ReplyKind::Pr,
            Reply::ReadyToTag { .. } => ReplyKind::ReadyToTag,
            Reply::CherryPicked { .. } => ReplyKind::CherryPicked,
            Reply::Go { .. } => ReplyKind::Go,
            Reply::Chart { .. } => ReplyKind::Chart,
            Reply::ChartPublished { .. } => ReplyKind::ChartPublished,
            Reply::KrewManifest { .. } => ReplyKind::KrewManifest,
            Reply::KrewManifestPublished { .. } => {
                ReplyKind::KrewManifestPublished
            }
        }
    }

    pub fn key(&self) -> ReplyKey {
        let (repo, qualifier) = match self {
            Reply::OkToRelease | Reply::Done => ("", String::new()),
            Reply::Tagged { repo }
            | Reply::ReadyToTag { repo, .. }
            | Reply::Go { repo, .. }
            | Reply::ChartPublished { repo }
            | Reply::KrewManifest { repo }
            | Reply::KrewManifestPublished { repo } => {
                (repo.as_str(), String::new())
            }
            Reply::Pr { repo, number } => (repo.as_str(), number.to_string()),
            Reply::CherryPicked { repo, branch, .. } => {
                (repo.as_str(), branch.clone())
            }
            Reply::Chart { repo, tag } => (repo.as_str(), tag.clone()),
        };
        ReplyKey {
            repo: repo.to_string(),
            qualifier,
        }
    }

    /// Repository the reply is about, if any.
    pub fn repo(&self) -> Option<&str> {
        match self {
            Reply::OkToRelease | Reply::Done => None,
            Reply::Tagged { repo }
            | Reply::Pr { repo, .. }
            | Reply::ReadyToTag { repo, .. }
            | Reply::CherryPicked { repo, .. }
            | Reply::Go { repo, .. }
            | Reply::Chart { repo, .. }
            | Reply::ChartPublished { repo }
            | Reply::KrewManifest { repo }
            | Reply::KrewManifestPublished { repo } => Some(repo),
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind();
        match self {
            Reply::OkToRelease | Reply::Done => write!(f, "{kind}"),
            Reply::Tagged { repo }
            | Reply::ChartPublished { repo }
            | Reply::KrewManifest { repo }
            | Reply::KrewManifestPublished { repo } => {
                write!(f, "{kind} {repo}")
            }
            Reply::Pr { repo, number } => {
                write!(f, "{kind} {}", pull_request_html_url(repo, *number))
            }
            Reply::ReadyToTag {
                repo,
                merge_commit_sha,
            } => write!(f, "{kind} {repo} {merge_commit_sha}"),
            Reply::CherryPicked {
                repo,
                branch,
                merge_commit_sha,
            } => write!(f, "{kind} {repo} {branch} {merge_commit_sha}"),
            Reply::Go {
                repo,
                module_path,
                vcs_root,
            } => match vcs_root {
                Some(root) => write!(f, "{kind} {repo} {module_path} {root}"),
                None => write!(f, "{kind} {repo} {module_path}"),
            },
            Reply::Chart { repo, tag } => write!(f, "{kind} {repo} {tag}"),
        }
    }
}

/// Parse one comment line.
///
/// Returns `Ok(None)` for lines that are not replies, including unknown
/// slash tokens, and an error for a known token with the wrong number of
/// fields.
pub fn parse_reply(line: &str) -> Result<Option<Reply>> {
    let fields = line.split_whitespace().collect::<Vec<_>>();
    let Some((token, args)) = fields.split_first() else {
        return Ok(None);
    };
    if !token.starts_with('/') {
        return Ok(None);
    }
    let Ok(kind) = token.parse::<ReplyKind>() else {
        debug!("ignoring unknown reply token: {token}");
        return Ok(None);
    };

    let (min, max) = kind.arity();
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            format!("expected {min} field(s), found {}", args.len())
        } else {
            format!("expected {min} to {max} fields, found {}", args.len())
        };
        return Err(AutomatonError::malformed_reply(line.trim(), expected));
    }

    let arg = |i: usize| args[i].to_string();

    let reply = match kind {
        ReplyKind::OkToRelease => Reply::OkToRelease,
        ReplyKind::Done => Reply::Done,
        ReplyKind::Tagged => Reply::Tagged { repo: arg(0) },
        ReplyKind::Pr => {
            let pr = parse_pull_request_url(args[0]).map_err(|e| {
                AutomatonError::malformed_reply(line.trim(), e.to_string())
            })?;
            Reply::Pr {
                repo: pr.repo.url(),
                number: pr.number,
            }
        }
        ReplyKind::ReadyToTag => Reply::ReadyToTag {
            repo: arg(0),
            merge_commit_sha: arg(1),
        },
        ReplyKind::CherryPicked => Reply::CherryPicked {
            repo: arg(0),
            branch: arg(1),
            merge_commit_sha: arg(2),
        },
        ReplyKind::Go => Reply::Go {
            repo: arg(0),
            module_path: arg(1),
            vcs_root: args.get(2).map(|s| s.to_string()),
        },
        ReplyKind::Chart => Reply::Chart {
            repo: arg(0),
            tag: arg(1),
        },
        ReplyKind::ChartPublished => Reply::ChartPublished { repo: arg(0) },
        ReplyKind::KrewManifest => Reply::KrewManifest { repo: arg(0) },
        ReplyKind::KrewManifestPublished => {
            Reply::KrewManifestPublished { repo: arg(0) }
        }
    };

    Ok(Some(reply))
}

/// Parse every reply in a comment body, top to bottom.
pub fn parse_comment(body: &str) -> Result<Vec<Reply>> {
    let mut replies = vec![];
    for line in body.lines() {
        if let Some(reply) = parse_reply(line)? {
            replies.push(reply);
        }
    }
    Ok(replies)
}

/// Drop repeated lines, keeping the first occurrence of each.
pub fn uniq_comments(lines: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    lines
        .into_iter()
        .filter(|line| seen.insert(line.clone()))
        .collect()
}
