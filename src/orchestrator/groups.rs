//! Group sequencing.
use log::*;
use std::collections::BTreeSet;

use crate::{
    Result,
    changelog::{Changelog, ChangelogTemplate, DOCS_CHANGELOG_MD},
    manifest::{ChangelogStatus, IndependentProjects, Project},
    orchestrator::{
        Orchestrator, RunStatus, prepare::PrepareOutcome, state::RunState,
    },
    reply::{MergeData, Reply, ReplyIndex, ReplyKind},
};

/// Every repo of the group reached its terminal state.
fn group_done(group: &IndependentProjects, index: &ReplyIndex) -> bool {
    group.iter().all(|(repo_url, project)| {
        if project.is_chart_consumer() {
            index.chart_published.contains(repo_url)
        } else {
            index.tagged.contains(repo_url)
        }
    })
}

/// Every cherry-pick branch of the project has a recorded merge.
fn cherry_picked(repo_url: &str, project: &Project, index: &ReplyIndex) -> bool {
    let Some(tags) = &project.tags else {
        return false;
    };
    tags.values().all(|branch| {
        index.merged.contains_key(&MergeData::new(repo_url, branch))
    })
}

fn report_waiting<T: ToString>(header: &str, items: &BTreeSet<T>) -> Vec<String> {
    let items = items.iter().map(|i| i.to_string()).collect::<Vec<_>>();
    println!("{header}");
    for item in items.iter() {
        println!(">>> {item}");
    }
    info!("{header} {}", items.join(", "));
    items
}

impl Orchestrator {
    /// Walk the manifest groups until one of them halts the run.
    pub(super) async fn release_groups(
        &self,
        state: &mut RunState,
    ) -> Result<RunStatus> {
        let trunk = self.config.trunk_branch.as_str();

        for (idx, group) in self.release.projects.iter().enumerate() {
            let index = ReplyIndex::build(&state.replies, trunk);

            if group_done(group, &index) {
                debug!("group {idx} is done");
                continue;
            }

            info!("processing group {idx}");

            let mut not_tagged = BTreeSet::new();
            let mut charts_yet_to_merge = BTreeSet::new();
            let mut charts_ready = BTreeSet::new();

            for (repo_url, project) in group.iter() {
                if !project.is_chart_consumer() {
                    if state.triggered_by_chart() {
                        info!(
                            "run was triggered by {}, deferring group {idx}",
                            ReplyKind::Chart
                        );
                        return Ok(RunStatus::Deferred);
                    }
                    if !index.tagged.contains(repo_url) {
                        not_tagged.insert(repo_url.clone());
                    }
                    continue;
                }

                let pending = self.pending_charts(project, &index);
                if pending.is_empty() {
                    if !index.chart_published.contains(repo_url) {
                        charts_ready.insert(repo_url.clone());
                    }
                } else {
                    charts_yet_to_merge.extend(pending);
                }
            }

            let mut ready_to_tag = BTreeSet::new();
            let mut open_prs = BTreeSet::new();

            if idx == 0 {
                // nothing earlier to wait for
                ready_to_tag = std::mem::take(&mut not_tagged);
            } else {
                for reply in state.replies.get(ReplyKind::ReadyToTag) {
                    if let Reply::ReadyToTag { repo, .. } = reply
                        && not_tagged.remove(repo)
                    {
                        ready_to_tag.insert(repo.clone());
                    }
                }

                let picked = not_tagged
                    .iter()
                    .filter(|repo_url| {
                        cherry_picked(repo_url, &group[repo_url.as_str()], &index)
                    })
                    .cloned()
                    .collect::<Vec<_>>();
                for repo_url in picked {
                    not_tagged.remove(&repo_url);
                    ready_to_tag.insert(repo_url);
                }

                for repo_url in index.open_prs.iter() {
                    if not_tagged.remove(repo_url) {
                        open_prs.insert(repo_url.clone());
                    }
                }
            }

            for repo_url in not_tagged.iter() {
                let project = &group[repo_url.as_str()];
                if project.is_tagless() {
                    self.prepare_tagless(state, repo_url, project).await?;
                } else {
                    self.prepare_project(state, repo_url, project).await?;
                }
            }

            for repo_url in ready_to_tag.iter() {
                self.release_project(state, repo_url, &group[repo_url.as_str()])
                    .await?;
            }

            for repo_url in charts_ready.iter() {
                self.publish_charts(repo_url).await?;
            }

            if let Some(comment) = state.take_comment() {
                self.post_comment(&comment).await?;
                return Ok(RunStatus::InProgress);
            }

            if !open_prs.is_empty() {
                let repos = report_waiting("Waiting for prs to close:", &open_prs);
                return Ok(RunStatus::AwaitingOpenPr(repos));
            }

            if !charts_yet_to_merge.is_empty() {
                let charts = report_waiting(
                    "Waiting for charts to be merged:",
                    &charts_yet_to_merge,
                );
                return Ok(RunStatus::AwaitingChartMerge(charts));
            }

            if !charts_ready.is_empty() {
                let repos = report_waiting(
                    "Waiting for charts to be published:",
                    &charts_ready,
                );
                return Ok(RunStatus::AwaitingChartPublish(repos));
            }
        }

        let index = ReplyIndex::build(&state.replies, trunk);
        for (repo_url, external) in self.release.external_projects.iter() {
            if index.open_prs.contains(repo_url) {
                info!("skipping {repo_url}, pr already open");
                continue;
            }
            // external projects do not report back to the tracker
            self.prepare_external(state, repo_url, &external.commands, None)
                .await?;
        }

        state.emit(&Reply::Done);
        if let Some(comment) = state.take_comment() {
            self.post_comment(&comment).await?;
        }

        Ok(RunStatus::Done)
    }

    /// Charts of upstream repos this consumer still waits for.
    fn pending_charts(
        &self,
        project: &Project,
        index: &ReplyIndex,
    ) -> Vec<MergeData> {
        project
            .chart_repos
            .iter()
            .filter_map(|chart_repo| {
                self.release
                    .find_repo_tags(chart_repo)
                    .map(|tags| (chart_repo, tags))
            })
            .flat_map(|(chart_repo, tags)| {
                tags.into_iter()
                    .map(move |tag| MergeData::new(chart_repo, tag))
            })
            .filter(|data| !index.charts_merged.contains(data))
            .collect()
    }

    /// Prepare an in-group project without tags on its trunk branch and
    /// refresh the website changelog digest.
    async fn prepare_tagless(
        &self,
        state: &mut RunState,
        repo_url: &str,
        project: &Project,
    ) -> Result<()> {
        let tracker = self.config.release_tracker.clone();
        let outcome = self
            .prepare_external(state, repo_url, &project.commands, Some(&tracker))
            .await?;

        if let PrepareOutcome::Unchanged { head_sha } = outcome {
            state.emit(&Reply::ReadyToTag {
                repo: repo_url.to_string(),
                merge_commit_sha: head_sha,
            });
        }

        let template = match project.changelog {
            ChangelogStatus::StandaloneWebsite => Some(ChangelogTemplate::Standalone),
            ChangelogStatus::SharedWebsite => Some(ChangelogTemplate::Shared),
            ChangelogStatus::AddToChangelog | ChangelogStatus::Skip => None,
        };

        if let Some(template) = template {
            let dir = self.config.changelog_root.join(&self.release.release);
            let changelog = Changelog::load(&dir, &self.release, &tracker)?;
            changelog.write_markdown(&dir.join(DOCS_CHANGELOG_MD), template)?;
        }

        self.commit_script_root()
    }
}
