use derive_builder::Builder;
use std::path::PathBuf;

use crate::{
    AutomatonError, Result,
    forge::{request::PullRequestRef, util::parse_pull_request_url},
};

pub const DEFAULT_TRUNK_BRANCH: &str = "master";
pub const DEFAULT_WORKSPACE: &str = "/tmp/workspace";
pub const CHANGELOG_DIR: &str = "CHANGELOG";

#[derive(Debug, Builder)]
#[builder(setter(into), build_fn(private, name = "_build"))]
pub struct OrchestratorConfigParams {
    /// Browser url of the release tracker pull request.
    pub release_tracker: String,
    /// Id of the comment that triggered this run; later comments are
    /// ignored. Zero disables the cutoff.
    #[builder(default)]
    pub comment_id: u64,
    /// Checkout holding the changelogs.
    pub script_root: PathBuf,
    #[builder(default = "PathBuf::from(DEFAULT_WORKSPACE)")]
    pub workspace: PathBuf,
    #[builder(default = "DEFAULT_TRUNK_BRANCH.to_string()")]
    pub trunk_branch: String,
}

impl OrchestratorConfigParamsBuilder {
    pub fn build(&self) -> Result<OrchestratorConfig> {
        let params = self._build().map_err(|e| {
            AutomatonError::invalid_config(format!(
                "Failed to build orchestrator config: {}",
                e
            ))
        })?;
        OrchestratorConfig::new(params)
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub release_tracker: String,
    pub tracker: PullRequestRef,
    pub comment_id: u64,
    pub script_root: PathBuf,
    pub changelog_root: PathBuf,
    pub workspace: PathBuf,
    pub trunk_branch: String,
}

impl OrchestratorConfig {
    pub fn builder() -> OrchestratorConfigParamsBuilder {
        OrchestratorConfigParamsBuilder::default()
    }

    pub fn new(params: OrchestratorConfigParams) -> Result<Self> {
        let tracker = parse_pull_request_url(&params.release_tracker)?;

        if params.trunk_branch.is_empty() {
            return Err(AutomatonError::invalid_config(
                "trunk branch must not be empty",
            ));
        }

        Ok(Self {
            changelog_root: params.script_root.join(CHANGELOG_DIR),
            release_tracker: params.release_tracker,
            tracker,
            comment_id: params.comment_id,
            script_root: params.script_root,
            workspace: params.workspace,
            trunk_branch: params.trunk_branch,
        })
    }
}
