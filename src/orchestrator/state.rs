//! Per-run state rebuilt from the manifest and the tracker comment thread.
use log::*;
use std::collections::HashMap;

use crate::{
    Result,
    env::{TemplateVars, key_to_version_key, repo_url_to_tag_key},
    forge::request::IssueComment,
    gomod::{GoImport, ModCache},
    manifest::Release,
    reply::{Replies, Reply, ReplyKind, parse_comment, uniq_comments},
};

#[derive(Debug, Default)]
pub struct RunState {
    pub replies: Replies,
    /// module path -> repository it was cloned from during the release
    pub mod_cache: ModCache,
    /// repo url -> tag, for single-tag projects
    pub repo_versions: HashMap<String, String>,
    /// `<OWNER>_<REPO>_TAG` and `<KEY>_VERSION` variables
    pub env_vars: TemplateVars,
    /// replies of the comment that triggered the run
    trigger: Vec<Reply>,
    /// lines to post at the end of the current group
    comments: Vec<String>,
}

impl RunState {
    pub fn new(release: &Release) -> Result<Self> {
        let mut state = Self::default();

        for (repo_url, project) in release.projects.iter().flatten() {
            if let Some(tag) = &project.tag {
                state.repo_versions.insert(repo_url.clone(), tag.clone());
                state
                    .env_vars
                    .insert(repo_url_to_tag_key(repo_url)?, tag.clone());
                if !project.key.is_empty() {
                    state
                        .env_vars
                        .insert(key_to_version_key(&project.key), tag.clone());
                }
            }

            if project.ready_to_tag {
                state.replies.merge(Reply::ReadyToTag {
                    repo: repo_url.clone(),
                    merge_commit_sha: String::new(),
                });
            }
        }

        Ok(state)
    }

    /// Replay the tracker thread. With a non-zero `cutoff`, comments posted
    /// after the comment with that id are ignored.
    pub fn load_comments(
        &mut self,
        mut comments: Vec<IssueComment>,
        cutoff: u64,
    ) -> Result<()> {
        if cutoff > 0
            && let Some(idx) = comments.iter().position(|c| c.id == cutoff)
        {
            comments.truncate(idx + 1);
        }

        for comment in comments.iter() {
            self.replies.merge_all(parse_comment(&comment.body)?);
        }

        if let Some(last) = comments.last() {
            self.trigger = parse_comment(&last.body)?;
        }

        for reply in self.replies.get(ReplyKind::Go) {
            if let Reply::Go {
                repo,
                module_path,
                vcs_root,
            } = reply
            {
                self.mod_cache.insert(
                    module_path.clone(),
                    GoImport {
                        repo_root: repo.clone(),
                        vcs_root: vcs_root.clone(),
                    },
                );
            }
        }

        debug!(
            "loaded {} replies from {} comments",
            self.replies.len(),
            comments.len()
        );

        Ok(())
    }

    /// Whether the triggering comment reported a merged chart.
    pub fn triggered_by_chart(&self) -> bool {
        self.trigger.iter().any(|r| r.kind() == ReplyKind::Chart)
    }

    /// Queue `reply` for the tracker without recording it.
    pub fn emit(&mut self, reply: &Reply) {
        self.comments.push(reply.to_string());
    }

    /// Record `reply` unless the same fact is already known, queueing it
    /// for the tracker when it is new.
    pub fn record(&mut self, reply: Reply) -> bool {
        let line = reply.to_string();
        let inserted = self.replies.append_if_missing(reply);
        if inserted {
            self.comments.push(line);
        }
        inserted
    }

    /// Queue the `/go` reply for a cached module.
    pub fn emit_go(&mut self, module_path: &str) {
        let Some(import) = self.mod_cache.get(module_path) else {
            warn!("go module {module_path} was never detected");
            return;
        };
        let reply = Reply::Go {
            repo: import.repo_root.clone(),
            module_path: module_path.to_string(),
            vcs_root: import.vcs_root.clone(),
        };
        self.emit(&reply);
    }

    pub fn has_comments(&self) -> bool {
        !self.comments.is_empty()
    }

    /// Drain the queued lines into one comment body.
    pub fn take_comment(&mut self) -> Option<String> {
        if self.comments.is_empty() {
            return None;
        }
        let lines = uniq_comments(std::mem::take(&mut self.comments));
        Some(lines.join("\n"))
    }
}
