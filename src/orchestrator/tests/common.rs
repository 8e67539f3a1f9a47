//! Common test utilities for orchestrator tests.

use std::{
    rc::Rc,
    sync::{Arc, Mutex},
};

use crate::{
    Result,
    forge::{
        LOCKED_LABEL,
        request::{IssueComment, PullRequest, ReviewState},
        traits::{Forge, MockForge},
    },
    gomod::{MockVcsRootResolver, VcsRootResolver},
    git::GitWorkspace,
    manifest::{Project, Release},
    orchestrator::{Orchestrator, RunStatus, config::OrchestratorConfig},
    shell::CommandRunner,
    test_helpers::{FakeHost, open_pull_request},
};

pub const TRACKER: &str = "https://github.com/stashed/CHANGELOG/pull/1";
pub const TRACKER_REPO: &str = "github.com/stashed/CHANGELOG";
pub const RELEASE: &str = "v2020.6.16";
pub const REPO_A: &str = "github.com/example/a";
pub const REPO_B: &str = "github.com/example/b";
pub const REPO_C: &str = "github.com/example/c";

pub fn project(tag: &str) -> Project {
    Project {
        tag: Some(tag.into()),
        ..Project::default()
    }
}

/// Release of product line `stash` with the given groups.
pub fn release_with(groups: Vec<Vec<(&str, Project)>>) -> Release {
    Release {
        product_line: "stash".into(),
        release: RELEASE.into(),
        projects: groups
            .into_iter()
            .map(|group| {
                group
                    .into_iter()
                    .map(|(url, project)| (url.to_string(), project))
                    .collect()
            })
            .collect(),
        ..Release::default()
    }
}

pub fn comment(id: u64, body: &str) -> IssueComment {
    IssueComment {
        id,
        body: body.into(),
    }
}

/// Tracker thread where the release was approved and `bodies` followed.
pub fn thread(bodies: &[&str]) -> Vec<IssueComment> {
    std::iter::once("/ok-to-release")
        .chain(bodies.iter().copied())
        .enumerate()
        .map(|(idx, body)| comment(idx as u64 + 1, body))
        .collect()
}

/// Mock forge serving the tracker pull request, its reviews and its thread.
pub fn tracker_forge_with(
    tracker: PullRequest,
    reviews: Vec<ReviewState>,
    comments: Vec<IssueComment>,
) -> MockForge {
    let mut forge = MockForge::new();

    forge
        .expect_get_pull_request()
        .returning(move |_, _| Ok(tracker.clone()));

    forge
        .expect_list_reviews()
        .returning(move |_, _| Ok(reviews.clone()));

    forge
        .expect_list_issue_comments()
        .returning(move |_, _| Ok(comments.clone()));

    forge
}

/// Mock forge with an open, approved tracker pull request whose thread is
/// `comments`. The run is expected to take and release the lock once.
pub fn tracker_forge(comments: Vec<IssueComment>) -> MockForge {
    let mut forge = tracker_forge_with(
        open_pull_request(TRACKER_REPO, 1, &[]),
        vec![ReviewState::Commented, ReviewState::Approved],
        comments,
    );

    forge.expect_list_labels().returning(|_, _| Ok(vec![]));

    forge
        .expect_add_labels()
        .withf(|_, req| req.labels == vec![LOCKED_LABEL.to_string()])
        .times(1)
        .returning(|_, _| Ok(()));

    forge
        .expect_remove_label()
        .withf(|_, _, label| label == LOCKED_LABEL)
        .times(1)
        .returning(|_, _, _| Ok(()));

    forge
}

/// Record every comment posted to the tracker.
pub fn capture_comments(forge: &mut MockForge) -> Arc<Mutex<Vec<String>>> {
    let posted = Arc::new(Mutex::new(vec![]));
    let sink = Arc::clone(&posted);
    forge.expect_create_comment().returning(move |_, _, body| {
        sink.lock().unwrap().push(body.to_string());
        Ok(())
    });
    posted
}

pub fn create_test_orchestrator(
    forge: MockForge,
    host: &FakeHost,
    release: Release,
) -> Orchestrator {
    create_test_orchestrator_with(forge, host, release, MockVcsRootResolver::new(), 0)
}

pub fn create_test_orchestrator_with(
    forge: MockForge,
    host: &FakeHost,
    release: Release,
    resolver: MockVcsRootResolver,
    comment_id: u64,
) -> Orchestrator {
    let config = OrchestratorConfig::builder()
        .release_tracker(TRACKER)
        .comment_id(comment_id)
        .script_root(host.script_root())
        .workspace(host.root().join("workspace"))
        .build()
        .unwrap();

    let forge: Rc<dyn Forge> = Rc::new(forge);
    let git: Rc<dyn GitWorkspace> = Rc::new(host.clone());
    let shell: Rc<dyn CommandRunner> = Rc::new(host.clone());
    let vcs_resolver: Rc<dyn VcsRootResolver> = Rc::new(resolver);

    Orchestrator::builder()
        .config(Rc::new(config))
        .release(Rc::new(release))
        .forge(forge)
        .git(git)
        .shell(shell)
        .vcs_resolver(vcs_resolver)
        .build()
        .unwrap()
}

/// Run once against `host` and return the status with every posted
/// comment. `configure` adds expectations beyond the tracker basics.
pub async fn run_release(
    host: &FakeHost,
    release: Release,
    comments: Vec<IssueComment>,
    configure: impl FnOnce(&mut MockForge),
) -> (Result<RunStatus>, Vec<String>) {
    let mut forge = tracker_forge(comments);
    let posted = capture_comments(&mut forge);
    configure(&mut forge);

    let orchestrator = create_test_orchestrator(forge, host, release);
    run_with(orchestrator, posted).await
}

/// Run a prepared orchestrator and collect what it posted.
pub async fn run_with(
    orchestrator: Orchestrator,
    posted: Arc<Mutex<Vec<String>>>,
) -> (Result<RunStatus>, Vec<String>) {
    let status = orchestrator.run().await;
    // verifies the mock expectations
    drop(orchestrator);

    let posted = posted.lock().unwrap().clone();
    (status, posted)
}
