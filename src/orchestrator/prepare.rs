//! Prepare step: run project commands on a fresh branch and open a pull
//! request for whatever they changed.
use log::*;
use std::{collections::BTreeMap, path::Path};

use crate::{
    AutomatonError, Result,
    env::{TemplateVars, merge_vars, repo_url_to_tag_key, substitute},
    forge::{
        AUTOMERGE_LABEL,
        request::{CreatePrRequest, FindPrRequest, PrLabelsRequest, PullRequest},
        util::parse_repo_url,
    },
    git::GitRepo,
    gomod::{GO_MOD, GoImport, detect_go_mod, update_go_mod},
    manifest::Project,
    orchestrator::{Orchestrator, state::RunState},
    reply::Reply,
};

/// A cloned repository and the Go module it declares, when that module was
/// not seen before in this run.
pub(super) struct Checkout {
    pub repo: Box<dyn GitRepo>,
    pub module_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum PrepareOutcome {
    PullRequest(u64),
    Unchanged { head_sha: String },
}

impl Orchestrator {
    /// Clone `repo_url` and register its Go module in the run's cache.
    pub(super) async fn checkout_project(
        &self,
        state: &mut RunState,
        repo_url: &str,
    ) -> Result<Checkout> {
        let repo = self.git.open_or_clone(repo_url)?;
        let module_path = detect_go_mod(repo.workdir(), &state.mod_cache)?;

        if let Some(module) = &module_path {
            let vcs = self.vcs_resolver.detect_vcs_root(module).await?;
            let vcs_root = (vcs != repo_url).then_some(vcs);
            debug!("{repo_url} provides go module {module} (vcs root {vcs_root:?})");
            state.mod_cache.insert(
                module.clone(),
                GoImport {
                    repo_root: repo_url.to_string(),
                    vcs_root,
                },
            );
        }

        Ok(Checkout { repo, module_path })
    }

    /// Variables handed to project commands and branch templates.
    pub(super) fn command_vars(
        &self,
        state: &RunState,
        workdir: &Path,
        release_tracker: &str,
        tagged: Option<(&str, &str)>,
    ) -> Result<TemplateVars> {
        let mut vars = TemplateVars::from([
            (
                "SCRIPT_ROOT".to_string(),
                self.config.script_root.display().to_string(),
            ),
            ("WORKSPACE".to_string(), workdir.display().to_string()),
            ("PRODUCT_LINE".to_string(), self.release.product_line.clone()),
            ("RELEASE".to_string(), self.release.release.clone()),
            ("RELEASE_TRACKER".to_string(), release_tracker.to_string()),
        ]);

        if let Some((repo_url, tag)) = tagged {
            vars.insert(repo_url_to_tag_key(repo_url)?, tag.to_string());
            vars.insert("TAG".to_string(), tag.to_string());
        }

        Ok(merge_vars(&vars, state.env_vars.clone()))
    }

    /// Point go.mod at the versions of this release, then tidy and vendor
    /// if anything moved.
    fn update_go_module(
        &self,
        state: &RunState,
        repo: &dyn GitRepo,
        vars: &TemplateVars,
    ) -> Result<()> {
        let workdir = repo.workdir();
        if !workdir.join(GO_MOD).exists() {
            return Ok(());
        }

        update_go_mod(workdir, &state.mod_cache, &state.repo_versions)?;

        if repo.is_modified()? {
            self.shell.run(workdir, "go mod tidy", vars)?;
            self.shell.run(workdir, "go mod vendor", vars)?;
        }

        Ok(())
    }

    fn run_commands(
        &self,
        repo: &dyn GitRepo,
        commands: &[String],
        vars: &TemplateVars,
    ) -> Result<()> {
        for command in commands.iter() {
            let command = substitute(command, vars);
            self.shell.run(repo.workdir(), &command, vars)?;
        }
        Ok(())
    }

    /// Reuse the open pull request for the same head and base, or create
    /// one, and make sure it carries the automerge label.
    async fn open_pr(
        &self,
        repo_url: &str,
        req: CreatePrRequest,
    ) -> Result<PullRequest> {
        let repo = parse_repo_url(repo_url)?;

        let existing = self
            .forge
            .find_open_pr(
                &repo,
                FindPrRequest {
                    head_branch: req.head_branch.clone(),
                    base_branch: req.base_branch.clone(),
                },
            )
            .await?;

        let pr = match existing {
            Some(pr) => {
                info!("found open pr {}", pr.html_url);
                pr
            }
            None => {
                let pr = self.forge.create_pr(&repo, req).await?;
                info!("created pr {}", pr.html_url);
                pr
            }
        };

        if !pr.labels.iter().any(|l| l == AUTOMERGE_LABEL) {
            self.forge
                .add_labels(
                    &repo,
                    PrLabelsRequest {
                        pr_number: pr.number,
                        labels: vec![AUTOMERGE_LABEL.into()],
                    },
                )
                .await?;
        }

        Ok(pr)
    }

    /// Prepare every tag of a tag-driven project.
    pub(super) async fn prepare_project(
        &self,
        state: &mut RunState,
        repo_url: &str,
        project: &Project,
    ) -> Result<()> {
        project.check_addressing(repo_url)?;

        let Checkout {
            repo,
            mut module_path,
        } = self.checkout_project(state, repo_url).await?;

        let trunk = self.config.trunk_branch.clone();

        // tag -> branch the prepare pr is opened against
        let mut tags: BTreeMap<String, String> = match (&project.tag, &project.tags) {
            (Some(tag), _) => BTreeMap::from([(tag.clone(), trunk.clone())]),
            (None, Some(tags)) => tags.clone(),
            (None, None) => BTreeMap::new(),
        };

        if self.all_tags_exist(repo.as_ref(), tags.keys())? {
            info!("all tags of {repo_url} already exist");
            if let Some(tag) = &project.tag {
                let sha = repo.remote_tag_sha(tag)?.unwrap_or_default();
                state.record(Reply::ReadyToTag {
                    repo: repo_url.to_string(),
                    merge_commit_sha: sha,
                });
            }
            if let Some(cherry_picks) = &project.tags {
                for (tag, branch) in cherry_picks.iter() {
                    let sha = repo.remote_tag_sha(tag)?.unwrap_or_default();
                    state.record(Reply::CherryPicked {
                        repo: repo_url.to_string(),
                        branch: branch.clone(),
                        merge_commit_sha: sha,
                    });
                }
            }
            state.record(Reply::Tagged {
                repo: repo_url.to_string(),
            });
            if let Some(module) = &module_path {
                state.emit_go(module);
            }
            return Ok(());
        }

        let uses_cherry_pick = project.uses_cherry_pick();
        if uses_cherry_pick {
            // fixes also land on trunk through a pr against it
            tags.insert(self.release.release.clone(), trunk.clone());
        }

        let tracker = self.config.release_tracker.clone();

        for (tag, branch) in tags.iter() {
            if uses_cherry_pick && !repo.remote_branch_exists(branch)? {
                return Err(AutomatonError::missing_branch(repo_url, tag, branch));
            }

            let vars = self.command_vars(
                state,
                repo.workdir(),
                &tracker,
                Some((repo_url, tag)),
            )?;

            let head_branch = format!("{}-{branch}", self.release.release);

            repo.checkout(branch)?;
            repo.checkout_new_branch(&head_branch)?;

            self.update_go_module(state, repo.as_ref(), &vars)?;
            self.run_commands(repo.as_ref(), &project.commands, &vars)?;

            if repo.is_modified()? {
                let mut messages = vec![
                    format!("Prepare for release {tag}"),
                    format!("ProductLine: {}", self.release.product_line),
                    format!("Release: {}", self.release.release),
                ];
                // the trunk pr of a cherry-pick project must not report
                // back to the tracker
                if !uses_cherry_pick || *branch != trunk {
                    messages.push(format!("Release-tracker: {tracker}"));
                }

                repo.commit(&messages, true)?;
                repo.push(true)?;

                let pr = self
                    .open_pr(
                        repo_url,
                        CreatePrRequest {
                            head_branch,
                            base_branch: branch.clone(),
                            title: messages[0].clone(),
                            body: repo.last_commit_body()?,
                        },
                    )
                    .await?;

                state.emit(&Reply::Pr {
                    repo: repo_url.to_string(),
                    number: pr.number,
                });
            } else {
                info!("{repo_url} needs no changes for {tag}");
                state.emit(&Reply::ReadyToTag {
                    repo: repo_url.to_string(),
                    merge_commit_sha: repo.head_sha()?,
                });
            }

            if let Some(module) = module_path.take() {
                state.emit_go(&module);
            }
        }

        Ok(())
    }

    /// Prepare a repository on its trunk branch. Pull requests carry the
    /// tracker trailer only when `release_tracker` is given.
    pub(super) async fn prepare_external(
        &self,
        state: &mut RunState,
        repo_url: &str,
        commands: &[String],
        release_tracker: Option<&str>,
    ) -> Result<PrepareOutcome> {
        let repo = self.git.open_or_clone(repo_url)?;
        let trunk = self.config.trunk_branch.clone();

        let vars = self.command_vars(
            state,
            repo.workdir(),
            release_tracker.unwrap_or_default(),
            None,
        )?;

        let head_branch = format!(
            "{}-{}",
            self.release.product_line, self.release.release
        );

        repo.checkout(&trunk)?;
        repo.checkout_new_branch(&head_branch)?;

        self.update_go_module(state, repo.as_ref(), &vars)?;
        self.run_commands(repo.as_ref(), commands, &vars)?;

        if !repo.is_modified()? {
            info!("{repo_url} needs no changes");
            return Ok(PrepareOutcome::Unchanged {
                head_sha: repo.head_sha()?,
            });
        }

        let mut messages = vec![
            format!(
                "Update for release {}@{}",
                self.release.product_line, self.release.release
            ),
            format!("ProductLine: {}", self.release.product_line),
            format!("Release: {}", self.release.release),
        ];
        if let Some(tracker) = release_tracker {
            messages.push(format!("Release-tracker: {tracker}"));
        }

        repo.commit(&messages, true)?;
        repo.push(true)?;

        let pr = self
            .open_pr(
                repo_url,
                CreatePrRequest {
                    head_branch,
                    base_branch: trunk,
                    title: messages[0].clone(),
                    body: messages[1..].join("\n"),
                },
            )
            .await?;

        state.emit(&Reply::Pr {
            repo: repo_url.to_string(),
            number: pr.number,
        });

        Ok(PrepareOutcome::PullRequest(pr.number))
    }

    /// True when every tag is already on the remote; vacuously true for
    /// projects without tags.
    pub(super) fn all_tags_exist<'a>(
        &self,
        repo: &dyn GitRepo,
        tags: impl IntoIterator<Item = &'a String>,
    ) -> Result<bool> {
        for tag in tags {
            if repo.remote_tag_sha(tag)?.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
