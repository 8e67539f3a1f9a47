//! Common test helper functions shared across test modules.
//!
//! [`FakeHost`] stands in for both the git workspace and the command runner
//! so tests can script remote state (branches, tags) and inspect every git
//! action and command a run performed.
use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    rc::Rc,
};
use tempfile::TempDir;

use crate::{
    Result,
    changelog::Commit,
    env::TemplateVars,
    forge::request::{PullRequest, PullRequestState},
    git::{GitRepo, GitWorkspace},
    shell::CommandRunner,
};

/// Scripted state of one fake clone and its remote.
#[derive(Debug, Clone, Default)]
pub struct FakeRepoState {
    pub workdir: PathBuf,
    pub remote_branches: BTreeSet<String>,
    /// tag -> sha on the remote
    pub remote_tags: BTreeMap<String, String>,
    pub local_tags: Vec<String>,
    pub current_branch: String,
    pub head: String,
    /// working tree differs from HEAD
    pub dirty: bool,
    /// every command run in this repo leaves the working tree dirty
    pub commands_modify: bool,
    pub history: Vec<Commit>,
    /// git actions in order, e.g. `checkout release-1.0`
    pub actions: Vec<String>,
    pub commits: Vec<Vec<String>>,
    /// tag -> annotation paragraphs
    pub tag_messages: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Default)]
struct HostState {
    repos: BTreeMap<String, FakeRepoState>,
    commands: Vec<(PathBuf, String)>,
    wipes: usize,
}

/// In-memory git host, workspace and command runner.
#[derive(Clone)]
pub struct FakeHost {
    root: Rc<TempDir>,
    state: Rc<RefCell<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            root: Rc::new(TempDir::new().unwrap()),
            state: Rc::new(RefCell::new(HostState::default())),
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Directory used as the changelog checkout.
    pub fn script_root(&self) -> PathBuf {
        self.root().join("script-root")
    }

    /// Register a remote repository with the given branches.
    pub fn add_repo(&self, repo_url: &str, branches: &[&str]) {
        let workdir = self.root().join("workspace").join(repo_url);
        self.state.borrow_mut().repos.insert(
            repo_url.to_string(),
            FakeRepoState {
                workdir,
                remote_branches: branches.iter().map(|b| b.to_string()).collect(),
                current_branch: "master".into(),
                head: format!("{}-head", repo_url.rsplit('/').next().unwrap()),
                history: vec![Commit {
                    sha: "0123456789abcdef".into(),
                    subject: "Initial commit".into(),
                }],
                ..FakeRepoState::default()
            },
        );
    }

    pub fn update_repo(&self, repo_url: &str, f: impl FnOnce(&mut FakeRepoState)) {
        let mut state = self.state.borrow_mut();
        f(state.repos.get_mut(repo_url).unwrap());
    }

    pub fn repo(&self, repo_url: &str) -> FakeRepoState {
        self.state.borrow().repos.get(repo_url).unwrap().clone()
    }

    pub fn has_repo(&self, repo_url: &str) -> bool {
        self.state.borrow().repos.contains_key(repo_url)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state
            .borrow()
            .commands
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn wipes(&self) -> usize {
        self.state.borrow().wipes
    }

    fn key_for_dir(&self, dir: &Path) -> Option<String> {
        self.state
            .borrow()
            .repos
            .iter()
            .find(|(_, repo)| repo.workdir == dir)
            .map(|(key, _)| key.clone())
    }
}

impl GitWorkspace for FakeHost {
    fn wipe(&self) -> Result<()> {
        self.state.borrow_mut().wipes += 1;
        Ok(())
    }

    fn open_or_clone(&self, repo_url: &str) -> Result<Box<dyn GitRepo>> {
        if !self.state.borrow().repos.contains_key(repo_url) {
            self.add_repo(repo_url, &["master"]);
        }
        let workdir = self.repo(repo_url).workdir;
        std::fs::create_dir_all(&workdir)?;
        Ok(Box::new(FakeRepo {
            host: self.clone(),
            key: repo_url.to_string(),
            workdir,
        }))
    }

    fn open_local(&self, path: &Path) -> Result<Box<dyn GitRepo>> {
        let key = match self.key_for_dir(path) {
            Some(key) => key,
            None => {
                let key = path.display().to_string();
                self.state.borrow_mut().repos.insert(
                    key.clone(),
                    FakeRepoState {
                        workdir: path.to_path_buf(),
                        current_branch: "master".into(),
                        head: "script-head".into(),
                        ..FakeRepoState::default()
                    },
                );
                key
            }
        };
        Ok(Box::new(FakeRepo {
            host: self.clone(),
            key,
            workdir: path.to_path_buf(),
        }))
    }
}

impl CommandRunner for FakeHost {
    fn run(&self, dir: &Path, command: &str, _env: &TemplateVars) -> Result<()> {
        let key = self.key_for_dir(dir);
        let mut state = self.state.borrow_mut();
        state.commands.push((dir.to_path_buf(), command.to_string()));
        if let Some(key) = key
            && let Some(repo) = state.repos.get_mut(&key)
            && repo.commands_modify
        {
            repo.dirty = true;
        }
        Ok(())
    }
}

pub struct FakeRepo {
    host: FakeHost,
    key: String,
    workdir: PathBuf,
}

impl FakeRepo {
    fn with<T>(&self, f: impl FnOnce(&mut FakeRepoState) -> T) -> T {
        let mut state = self.host.state.borrow_mut();
        f(state.repos.get_mut(&self.key).unwrap())
    }
}

impl GitRepo for FakeRepo {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        self.with(|r| {
            r.actions.push(format!("checkout {branch}"));
            r.current_branch = branch.to_string();
        });
        Ok(())
    }

    fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        self.with(|r| {
            r.actions.push(format!("checkout -b {branch}"));
            r.current_branch = branch.to_string();
        });
        Ok(())
    }

    fn reset_hard(&self, sha: &str) -> Result<()> {
        self.with(|r| {
            r.actions.push(format!("reset --hard {sha}"));
            r.head = sha.to_string();
        });
        Ok(())
    }

    fn merge(&self, reference: &str) -> Result<()> {
        self.with(|r| r.actions.push(format!("merge {reference}")));
        Ok(())
    }

    fn is_modified(&self) -> Result<bool> {
        Ok(self.with(|r| r.dirty))
    }

    fn commit(&self, messages: &[String], _signoff: bool) -> Result<()> {
        self.with(|r| {
            r.actions.push("commit".into());
            r.commits.push(messages.to_vec());
            r.dirty = false;
            r.head = format!("commit-{}", r.commits.len());
        });
        Ok(())
    }

    fn push(&self, with_tags: bool) -> Result<()> {
        self.with(|r| {
            r.actions.push(format!("push {}", r.current_branch));
            r.remote_branches.insert(r.current_branch.clone());
            if with_tags {
                let head = r.head.clone();
                for tag in r.local_tags.clone() {
                    r.remote_tags.entry(tag).or_insert_with(|| head.clone());
                }
            }
        });
        Ok(())
    }

    fn tag(&self, tag: &str, messages: &[String]) -> Result<()> {
        let exists = self.with(|r| {
            r.remote_tags.contains_key(tag) || r.local_tags.iter().any(|t| t == tag)
        });
        if exists {
            return Err(git2::Error::from_str("tag already exists").into());
        }
        self.with(|r| {
            r.actions.push(format!("tag {tag}"));
            r.local_tags.push(tag.to_string());
            r.tag_messages.insert(tag.to_string(), messages.to_vec());
        });
        Ok(())
    }

    fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        Ok(self.with(|r| r.remote_branches.contains(branch)))
    }

    fn remote_tag_sha(&self, tag: &str) -> Result<Option<String>> {
        Ok(self.with(|r| r.remote_tags.get(tag).cloned()))
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        Ok(self.with(|r| {
            let mut tags = r.remote_tags.keys().cloned().collect::<BTreeSet<_>>();
            tags.extend(r.local_tags.iter().cloned());
            tags.into_iter().collect()
        }))
    }

    fn first_commit(&self) -> Result<String> {
        Ok("root".into())
    }

    fn head_sha(&self) -> Result<String> {
        Ok(self.with(|r| r.head.clone()))
    }

    fn list_commits(&self, _start: &str, _end: &str) -> Result<Vec<Commit>> {
        Ok(self.with(|r| r.history.clone()))
    }

    fn last_commit_body(&self) -> Result<String> {
        Ok(self.with(|r| {
            r.commits
                .last()
                .map(|m| m.iter().skip(1).cloned().collect::<Vec<_>>().join("\n\n"))
                .unwrap_or_default()
        }))
    }
}

/// Open, non-draft pull request with the given labels.
pub fn open_pull_request(repo_url: &str, number: u64, labels: &[&str]) -> PullRequest {
    PullRequest {
        number,
        html_url: format!("https://{repo_url}/pull/{number}"),
        state: PullRequestState::Open,
        draft: false,
        labels: labels.iter().map(|l| l.to_string()).collect(),
    }
}
