//! Release step: cut and push tags, record them in the changelog, and
//! trigger chart publishing.
use log::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    AutomatonError, Result,
    branch::{BranchRequest, ReleasePlan, resolve_branch},
    changelog::update_changelog,
    forge::{
        AUTOMERGE_LABEL,
        request::{FindPrRequest, PrLabelsRequest},
        util::parse_repo_url,
    },
    git::GitRepo,
    manifest::{ChangelogStatus, Project},
    orchestrator::{Orchestrator, prepare::Checkout, state::RunState},
    reply::{Reply, ReplyIndex},
    version::ReleaseVersion,
};

impl Orchestrator {
    /// Tag every version of a project that is ready to be released.
    pub(super) async fn release_project(
        &self,
        state: &mut RunState,
        repo_url: &str,
        project: &Project,
    ) -> Result<()> {
        project.check_addressing(repo_url)?;

        let Checkout { repo, module_path } =
            self.checkout_project(state, repo_url).await?;

        // tag -> cherry-pick branch
        let tags: BTreeMap<String, Option<String>> =
            match (&project.tag, &project.tags) {
                (Some(tag), _) => BTreeMap::from([(tag.clone(), None)]),
                (None, Some(tags)) => tags
                    .iter()
                    .map(|(tag, branch)| (tag.clone(), Some(branch.clone())))
                    .collect(),
                (None, None) => BTreeMap::new(),
            };

        if self.all_tags_exist(repo.as_ref(), tags.keys())? {
            info!("all tags of {repo_url} already exist");
            state.record(Reply::Tagged {
                repo: repo_url.to_string(),
            });
            if let Some(module) = &module_path {
                state.emit_go(module);
            }
            return Ok(());
        }

        let trunk = self.config.trunk_branch.as_str();
        let tracker = self.config.release_tracker.clone();
        let uses_cherry_pick = project.uses_cherry_pick();
        let index = ReplyIndex::build(&state.replies, trunk);

        for (tag, cherry_pick_branch) in tags.iter() {
            // left behind by an earlier run that failed on a later tag
            if let Some(sha) = repo.remote_tag_sha(tag)? {
                info!("{repo_url}@{tag} already exists at {sha}");
                if project.changelog == ChangelogStatus::AddToChangelog {
                    self.add_to_changelog(repo.as_ref(), repo_url, tag)?;
                }
                continue;
            }

            let vars = self.command_vars(
                state,
                repo.workdir(),
                &tracker,
                Some((repo_url, tag)),
            )?;

            let target = resolve_branch(
                BranchRequest {
                    repo_url,
                    tag,
                    cherry_pick_branch: cherry_pick_branch.as_deref(),
                    release_branch_template: &project.release_branch,
                },
                &vars,
                |branch| repo.remote_branch_exists(branch),
            )?;

            let merged_sha = index
                .merged_commit_sha(repo_url, &target.branch, uses_cherry_pick, trunk)
                .map(String::from);

            info!(
                "releasing {repo_url}@{tag} on {} ({:?})",
                target.branch, target.plan
            );

            match target.plan {
                ReleasePlan::Pinned => {
                    repo.checkout(&target.branch)?;
                    if let Some(sha) = &merged_sha {
                        repo.reset_hard(sha)?;
                    }
                }
                ReleasePlan::MergeInto => {
                    repo.checkout(&target.branch)?;
                    if target.branch != trunk {
                        repo.merge(merged_sha.as_deref().unwrap_or(trunk))?;
                    }
                }
                ReleasePlan::Create => {
                    repo.checkout(trunk)?;
                    if let Some(sha) = &merged_sha {
                        repo.reset_hard(sha)?;
                    }
                    repo.checkout_new_branch(&target.branch)?;
                }
            }

            repo.tag(
                tag,
                &[
                    tag.clone(),
                    format!("ProductLine: {}", self.release.product_line),
                    format!("Release: {}", self.release.release),
                    format!("Release-tracker: {tracker}"),
                ],
            )?;
            repo.push(true)?;

            if project.changelog == ChangelogStatus::AddToChangelog {
                self.add_to_changelog(repo.as_ref(), repo_url, tag)?;
            }
        }

        state.replies.merge(Reply::Tagged {
            repo: repo_url.to_string(),
        });
        state.emit(&Reply::Tagged {
            repo: repo_url.to_string(),
        });
        if let Some(module) = &module_path {
            state.emit_go(module);
        }

        Ok(())
    }

    /// Append the commits between `tag` and the previous release of at
    /// least the same importance to the release changelog.
    fn add_to_changelog(
        &self,
        repo: &dyn GitRepo,
        repo_url: &str,
        tag: &str,
    ) -> Result<()> {
        let current = ReleaseVersion::parse(tag)?;

        let mut names = repo.list_tags()?.into_iter().collect::<BTreeSet<_>>();
        names.insert(tag.to_string());

        let mut versions = names
            .iter()
            .filter_map(|name| match ReleaseVersion::parse(name) {
                Ok(version) => Some(version),
                Err(e) => {
                    debug!("skipping tag {name}: {e}");
                    None
                }
            })
            .filter(|version| current.admits(version))
            .collect::<Vec<_>>();
        versions.sort();

        let idx = versions
            .iter()
            .position(|v| v.original() == tag)
            .ok_or_else(|| {
                AutomatonError::invalid_version(tag, "missing from tag list")
            })?;

        let start = match idx {
            0 => repo.first_commit()?,
            _ => versions[idx - 1].original().to_string(),
        };
        let commits = repo.list_commits(&start, tag)?;
        debug!("{} commits in {repo_url} {start}..{tag}", commits.len());

        update_changelog(
            &self.config.changelog_root.join(&self.release.release),
            &self.release,
            &self.config.release_tracker,
            repo_url,
            tag,
            commits,
        )?;

        self.commit_script_root()
    }

    /// Commit and push the changelog checkout if anything changed.
    pub(super) fn commit_script_root(&self) -> Result<()> {
        let repo = self.git.open_local(&self.config.script_root)?;
        if !repo.is_modified()? {
            return Ok(());
        }
        repo.commit(&["Update changelog".to_string()], true)?;
        repo.push(false)
    }

    /// Label the open chart registry pull request for automerge.
    pub(super) async fn publish_charts(&self, repo_url: &str) -> Result<()> {
        let repo = parse_repo_url(repo_url)?;
        let head_branch = format!(
            "{}@{}",
            self.release.product_line, self.release.release
        );

        let pr = self
            .forge
            .find_open_pr(
                &repo,
                FindPrRequest {
                    head_branch: head_branch.clone(),
                    base_branch: self.config.trunk_branch.clone(),
                },
            )
            .await?;

        let Some(pr) = pr else {
            warn!("no open chart pr for {head_branch} in {repo_url}");
            return Ok(());
        };

        if pr.labels.iter().any(|l| l == AUTOMERGE_LABEL) {
            debug!("{} is already labelled {AUTOMERGE_LABEL}", pr.html_url);
            return Ok(());
        }

        info!("labelling {} for {AUTOMERGE_LABEL}", pr.html_url);
        self.forge
            .add_labels(
                &repo,
                PrLabelsRequest {
                    pr_number: pr.number,
                    labels: vec![AUTOMERGE_LABEL.into()],
                },
            )
            .await
    }
}
