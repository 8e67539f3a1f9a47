//! In-memory reply store rebuilt from the tracker comment thread.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use crate::reply::{Reply, ReplyKind};

/// Replies bucketed by kind. Within a bucket replies keep insertion order
/// and no two share a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Replies {
    buckets: BTreeMap<ReplyKind, Vec<Reply>>,
}

impl Replies {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `reply`, replacing any reply with the same key. The new reply
    /// moves to the end of its bucket.
    pub fn merge(&mut self, reply: Reply) {
        let bucket = self.buckets.entry(reply.kind()).or_default();
        let key = reply.key();
        bucket.retain(|existing| existing.key() != key);
        bucket.push(reply);
    }

    pub fn merge_all(&mut self, replies: impl IntoIterator<Item = Reply>) {
        for reply in replies {
            self.merge(reply);
        }
    }

    /// Insert `reply` only if no reply with the same key exists. Returns
    /// whether it was inserted.
    pub fn append_if_missing(&mut self, reply: Reply) -> bool {
        let bucket = self.buckets.entry(reply.kind()).or_default();
        let key = reply.key();
        if bucket.iter().any(|existing| existing.key() == key) {
            return false;
        }
        bucket.push(reply);
        true
    }

    pub fn get(&self, kind: ReplyKind) -> &[Reply] {
        self.buckets.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, kind: ReplyKind) -> bool {
        !self.get(kind).is_empty()
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `(repo, ref)` pair, where ref is a branch or a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeData {
    pub repo: String,
    pub reference: String,
}

impl MergeData {
    pub fn new(repo: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            reference: reference.into(),
        }
    }
}

impl fmt::Display for MergeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repo, self.reference)
    }
}

/// Lookup sets derived by replaying a [`Replies`] store.
#[derive(Debug, Clone, Default)]
pub struct ReplyIndex {
    /// repos already tagged
    pub tagged: HashSet<String>,
    /// (repo, branch) -> merge commit sha
    pub merged: HashMap<MergeData, String>,
    /// (repo, tag) whose chart has been merged
    pub charts_merged: HashSet<MergeData>,
    /// chart consumer repos already published
    pub chart_published: HashSet<String>,
    /// repos with an open prepare pull request
    pub open_prs: HashSet<String>,
}

impl ReplyIndex {
    /// Replay `replies`. Ready-to-tag facts are recorded against
    /// `trunk_branch`.
    pub fn build(replies: &Replies, trunk_branch: &str) -> Self {
        let mut index = Self::default();

        for reply in replies.get(ReplyKind::Tagged) {
            if let Reply::Tagged { repo } = reply {
                index.tagged.insert(repo.clone());
            }
        }

        for reply in replies.get(ReplyKind::ReadyToTag) {
            if let Reply::ReadyToTag {
                repo,
                merge_commit_sha,
            } = reply
            {
                index.merged.insert(
                    MergeData::new(repo, trunk_branch),
                    merge_commit_sha.clone(),
                );
            }
        }

        for reply in replies.get(ReplyKind::CherryPicked) {
            if let Reply::CherryPicked {
                repo,
                branch,
                merge_commit_sha,
            } = reply
            {
                index
                    .merged
                    .insert(MergeData::new(repo, branch), merge_commit_sha.clone());
            }
        }

        for reply in replies.get(ReplyKind::Chart) {
            if let Reply::Chart { repo, tag } = reply {
                index.charts_merged.insert(MergeData::new(repo, tag));
            }
        }

        for reply in replies.get(ReplyKind::ChartPublished) {
            if let Reply::ChartPublished { repo } = reply {
                index.chart_published.insert(repo.clone());
            }
        }

        for reply in replies.get(ReplyKind::Pr) {
            if let Reply::Pr { repo, .. } = reply {
                index.open_prs.insert(repo.clone());
            }
        }

        index
    }

    /// Merge commit recorded for `repo`. Cherry-picked repos look up the
    /// given branch, everything else the trunk branch. Facts recorded
    /// without a sha count as unknown.
    pub fn merged_commit_sha(
        &self,
        repo: &str,
        branch: &str,
        uses_cherry_pick: bool,
        trunk_branch: &str,
    ) -> Option<&str> {
        let reference = if uses_cherry_pick { branch } else { trunk_branch };
        self.merged
            .get(&MergeData::new(repo, reference))
            .map(String::as_str)
            .filter(|sha| !sha.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(repo: &str) -> Reply {
        Reply::Tagged { repo: repo.into() }
    }

    fn cherry(repo: &str, branch: &str, sha: &str) -> Reply {
        Reply::CherryPicked {
            repo: repo.into(),
            branch: branch.into(),
            merge_commit_sha: sha.into(),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut once = Replies::new();
        once.merge(tagged("github.com/a/a"));

        let mut twice = once.clone();
        twice.merge(tagged("github.com/a/a"));

        assert_eq!(once, twice);
        assert_eq!(twice.get(ReplyKind::Tagged).len(), 1);
    }

    #[test]
    fn test_merge_replaces_same_key_and_moves_to_end() {
        let mut replies = Replies::new();
        replies.merge(cherry("r", "release-1.0", "aaa"));
        replies.merge(cherry("r", "release-2.0", "bbb"));
        replies.merge(cherry("r", "release-1.0", "ccc"));

        let bucket = replies.get(ReplyKind::CherryPicked);
        assert_eq!(bucket.len(), 2);
        assert_eq!(bucket[0], cherry("r", "release-2.0", "bbb"));
        assert_eq!(bucket[1], cherry("r", "release-1.0", "ccc"));
    }

    #[test]
    fn test_append_if_missing_inserts_once() {
        let mut replies = Replies::new();
        assert!(replies.append_if_missing(cherry("r", "release-1.0", "aaa")));
        assert!(!replies.append_if_missing(cherry("r", "release-1.0", "bbb")));

        // first writer wins
        assert_eq!(
            replies.get(ReplyKind::CherryPicked),
            &[cherry("r", "release-1.0", "aaa")]
        );
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_singleton_replies() {
        let mut replies = Replies::new();
        assert!(!replies.contains(ReplyKind::OkToRelease));
        replies.merge(Reply::OkToRelease);
        replies.merge(Reply::OkToRelease);
        assert!(replies.contains(ReplyKind::OkToRelease));
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_index_replays_store() {
        let mut replies = Replies::new();
        replies.merge_all([
            tagged("github.com/a/a"),
            Reply::ReadyToTag {
                repo: "github.com/a/b".into(),
                merge_commit_sha: "b1".into(),
            },
            cherry("github.com/a/pg", "release-9.6", "c1"),
            Reply::Chart {
                repo: "github.com/a/a".into(),
                tag: "v1.0.0".into(),
            },
            Reply::ChartPublished {
                repo: "github.com/a/installer".into(),
            },
            Reply::Pr {
                repo: "github.com/a/c".into(),
                number: 3,
            },
        ]);

        let index = ReplyIndex::build(&replies, "master");
        assert!(index.tagged.contains("github.com/a/a"));
        assert_eq!(
            index.merged[&MergeData::new("github.com/a/b", "master")],
            "b1"
        );
        assert_eq!(
            index.merged[&MergeData::new("github.com/a/pg", "release-9.6")],
            "c1"
        );
        assert!(
            index
                .charts_merged
                .contains(&MergeData::new("github.com/a/a", "v1.0.0"))
        );
        assert!(index.chart_published.contains("github.com/a/installer"));
        assert!(index.open_prs.contains("github.com/a/c"));

        assert_eq!(
            index.merged_commit_sha("github.com/a/b", "release-1.0", false, "master"),
            Some("b1")
        );
        assert_eq!(
            index.merged_commit_sha("github.com/a/pg", "release-9.6", true, "master"),
            Some("c1")
        );
        assert_eq!(
            index.merged_commit_sha("github.com/a/pg", "release-10", true, "master"),
            None
        );
    }

    #[test]
    fn test_merge_data_display() {
        assert_eq!(
            MergeData::new("github.com/a/a", "v1.0.0").to_string(),
            "github.com/a/a@v1.0.0"
        );
    }
}
