//! `run` command: advance a release by one step.
use log::*;
use std::rc::Rc;

use crate::{
    Result,
    cli::{Args, RunArgs},
    forge::{github::Github, traits::Forge},
    git::{Git2Workspace, GitWorkspace},
    gomod::{GoImportResolver, VcsRootResolver},
    manifest::load_manifest,
    orchestrator::{Orchestrator, RunStatus, config::OrchestratorConfig},
    shell::{CommandRunner, ShellRunner},
};

/// Load the manifest, wire the GitHub, git and shell collaborators and run
/// the release state machine once.
pub async fn execute(args: &Args, run: &RunArgs) -> Result<RunStatus> {
    let release = load_manifest(&run.release_file).await?;
    info!(
        "running release {}@{} ({} groups)",
        release.product_line,
        release.release,
        release.projects.len()
    );

    let config = OrchestratorConfig::builder()
        .release_tracker(run.release_tracker.clone())
        .comment_id(run.comment_id)
        .script_root(std::path::absolute(&run.script_root)?)
        .workspace(run.workspace.clone())
        .trunk_branch(run.trunk_branch.clone())
        .build()?;

    let forge: Rc<dyn Forge> = Rc::new(Github::new(args.github_token()?)?);
    let git: Rc<dyn GitWorkspace> = Rc::new(Git2Workspace::new(
        config.workspace.clone(),
        args.git_credentials()?,
    ));
    let shell: Rc<dyn CommandRunner> = Rc::new(ShellRunner::new());
    let vcs_resolver: Rc<dyn VcsRootResolver> =
        Rc::new(GoImportResolver::new());

    let orchestrator = Orchestrator::builder()
        .config(Rc::new(config))
        .release(Rc::new(release))
        .forge(forge)
        .git(git)
        .shell(shell)
        .vcs_resolver(vcs_resolver)
        .build()?;

    let status = orchestrator.run().await?;
    println!("{}", describe(&status));

    Ok(status)
}

/// One line summary of a run.
pub fn describe(status: &RunStatus) -> String {
    match status {
        RunStatus::Skipped(reason) => format!("nothing to do: {reason:?}"),
        RunStatus::InProgress => {
            "release in progress, posted new replies to the tracker".into()
        }
        RunStatus::AwaitingOpenPr(repos) => {
            format!("waiting for {} open pr(s)", repos.len())
        }
        RunStatus::AwaitingChartMerge(charts) => {
            format!("waiting for {} chart(s) to be merged", charts.len())
        }
        RunStatus::AwaitingChartPublish(repos) => {
            format!("waiting for {} chart repo(s) to publish", repos.len())
        }
        RunStatus::Deferred => "deferred until the next trigger".into(),
        RunStatus::Done => "release is done".into(),
    }
}
