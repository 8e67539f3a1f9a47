//! Release state machine driven by the release tracker pull request.
//!
//! A run rebuilds its state from the tracker comment thread, walks the
//! manifest groups in order and stops at the first group that either
//! produced new facts (posted as one comment) or is blocked on something
//! outside of this run: open pull requests, unmerged charts or charts that
//! still have to be published.
use derive_builder::Builder;
use log::*;
use std::rc::Rc;

use crate::{
    AutomatonError, Result,
    forge::{
        LOCKED_LABEL,
        request::{PrLabelsRequest, PullRequestState, ReviewState},
        traits::Forge,
    },
    git::GitWorkspace,
    gomod::VcsRootResolver,
    manifest::Release,
    orchestrator::{config::OrchestratorConfig, state::RunState},
    reply::ReplyKind,
    shell::CommandRunner,
};

pub mod config;
mod groups;
mod prepare;
mod release;
pub mod state;

/// Why a run did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Draft,
    NotOpen,
    NotApproved,
    NotOkToRelease,
    AlreadyDone,
    Locked,
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Skipped(SkipReason),
    /// New facts were posted to the tracker; the next run picks them up.
    InProgress,
    /// repos with an open prepare pull request
    AwaitingOpenPr(Vec<String>),
    /// `repo@tag` charts not merged yet
    AwaitingChartMerge(Vec<String>),
    /// chart consumer repos labelled for publishing
    AwaitingChartPublish(Vec<String>),
    /// The run was triggered by a chart reply and tag-driven work waits for
    /// the next trigger.
    Deferred,
    Done,
}

#[derive(Builder)]
#[builder(setter(into), build_fn(private, name = "_build"))]
pub struct OrchestratorParams {
    pub config: Rc<OrchestratorConfig>,
    pub release: Rc<Release>,
    pub forge: Rc<dyn Forge>,
    pub git: Rc<dyn GitWorkspace>,
    pub shell: Rc<dyn CommandRunner>,
    pub vcs_resolver: Rc<dyn VcsRootResolver>,
}

impl OrchestratorParamsBuilder {
    pub fn build(&self) -> Result<Orchestrator> {
        let params = self._build().map_err(|e| {
            AutomatonError::invalid_config(format!(
                "Failed to build orchestrator: {}",
                e
            ))
        })?;
        Orchestrator::new(params)
    }
}

pub struct Orchestrator {
    config: Rc<OrchestratorConfig>,
    release: Rc<Release>,
    forge: Rc<dyn Forge>,
    git: Rc<dyn GitWorkspace>,
    shell: Rc<dyn CommandRunner>,
    vcs_resolver: Rc<dyn VcsRootResolver>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorParamsBuilder {
        OrchestratorParamsBuilder::default()
    }

    pub fn new(params: OrchestratorParams) -> Result<Self> {
        params.release.validate()?;

        Ok(Self {
            config: params.config,
            release: params.release,
            forge: params.forge,
            git: params.git,
            shell: params.shell,
            vcs_resolver: params.vcs_resolver,
        })
    }

    /// Advance the release by one step.
    pub async fn run(&self) -> Result<RunStatus> {
        self.git.wipe()?;

        let tracker = &self.config.tracker;

        let pr = self
            .forge
            .get_pull_request(&tracker.repo, tracker.number)
            .await?;

        if pr.draft {
            info!("release tracker pr is currently in draft mode");
            return Ok(RunStatus::Skipped(SkipReason::Draft));
        }

        if pr.state != PullRequestState::Open {
            info!("release tracker pr is not open");
            return Ok(RunStatus::Skipped(SkipReason::NotOpen));
        }

        if !self.tracker_approved().await? {
            info!("release tracker pr must be approved to continue");
            return Ok(RunStatus::Skipped(SkipReason::NotApproved));
        }

        let mut state = RunState::new(&self.release)?;

        let comments = self
            .forge
            .list_issue_comments(&tracker.repo, tracker.number)
            .await?;
        state.load_comments(comments, self.config.comment_id)?;

        if !state.replies.contains(ReplyKind::OkToRelease) {
            info!("release tracker has no {} yet", ReplyKind::OkToRelease);
            return Ok(RunStatus::Skipped(SkipReason::NotOkToRelease));
        }

        if state.replies.contains(ReplyKind::Done) {
            info!("release is already done");
            return Ok(RunStatus::Skipped(SkipReason::AlreadyDone));
        }

        let labels = self
            .forge
            .list_labels(&tracker.repo, tracker.number)
            .await?;

        if labels.iter().any(|l| l == LOCKED_LABEL) {
            info!("release tracker is already locked, exiting");
            return Ok(RunStatus::Skipped(SkipReason::Locked));
        }

        self.forge
            .add_labels(
                &tracker.repo,
                PrLabelsRequest {
                    pr_number: tracker.number,
                    labels: vec![LOCKED_LABEL.into()],
                },
            )
            .await?;

        let result = self.release_groups(&mut state).await;

        // the lock is released even when the run failed
        let unlocked = self
            .forge
            .remove_label(&tracker.repo, tracker.number, LOCKED_LABEL)
            .await;

        let status = result?;
        unlocked?;

        info!("run finished: {status:?}");

        Ok(status)
    }

    /// Any requested change blocks, otherwise one approval is enough.
    async fn tracker_approved(&self) -> Result<bool> {
        let tracker = &self.config.tracker;
        let reviews = self
            .forge
            .list_reviews(&tracker.repo, tracker.number)
            .await?;

        if reviews.contains(&ReviewState::ChangesRequested) {
            return Ok(false);
        }

        Ok(reviews.contains(&ReviewState::Approved))
    }

    async fn post_comment(&self, body: &str) -> Result<()> {
        let tracker = &self.config.tracker;
        info!("posting to release tracker:\n{body}");
        self.forge
            .create_comment(&tracker.repo, tracker.number, body)
            .await
    }
}
