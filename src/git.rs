//! Git operations used while preparing and releasing repositories.
//!
//! The orchestrator only talks to the [`GitWorkspace`] and [`GitRepo`]
//! traits; [`Git2Workspace`] is the `git2` backed implementation used by the
//! binary. Every mutating action is logged at info level.
use git2::{
    AutotagOption, BranchType, Direction, FetchOptions, IndexAddOption, Oid,
    PushOptions, RemoteCallbacks, ResetType, Signature, Sort,
    build::{CheckoutBuilder, RepoBuilder},
};
use log::*;
use secrecy::{ExposeSecret, SecretString};
use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{
    AutomatonError, Result, changelog::Commit, forge::util::parse_repo_url,
};

const ORIGIN: &str = "origin";

/// A local clone of one repository.
pub trait GitRepo {
    fn workdir(&self) -> &Path;
    /// Switch to `branch`, creating it from the remote branch if needed.
    fn checkout(&self, branch: &str) -> Result<()>;
    /// Create `branch` at HEAD and switch to it.
    fn checkout_new_branch(&self, branch: &str) -> Result<()>;
    fn reset_hard(&self, sha: &str) -> Result<()>;
    /// Merge `reference` (a branch name or sha) into the current branch.
    fn merge(&self, reference: &str) -> Result<()>;
    /// Stage everything and report whether the index differs from HEAD.
    fn is_modified(&self) -> Result<bool>;
    /// Commit the index. Messages become paragraphs of the commit message.
    fn commit(&self, messages: &[String], signoff: bool) -> Result<()>;
    /// Push the current branch, and all local tags when `with_tags` is set.
    fn push(&self, with_tags: bool) -> Result<()>;
    /// Create an annotated tag at HEAD.
    fn tag(&self, tag: &str, messages: &[String]) -> Result<()>;
    fn remote_branch_exists(&self, branch: &str) -> Result<bool>;
    /// Commit sha of `tag` on the remote, if the tag exists there.
    fn remote_tag_sha(&self, tag: &str) -> Result<Option<String>>;
    fn list_tags(&self) -> Result<Vec<String>>;
    fn first_commit(&self) -> Result<String>;
    fn head_sha(&self) -> Result<String>;
    /// Commits on the ancestry path `start..end`, newest first.
    fn list_commits(&self, start: &str, end: &str) -> Result<Vec<Commit>>;
    /// Message of HEAD without its subject line.
    fn last_commit_body(&self) -> Result<String>;
}

/// Directory holding the clones of one run.
pub trait GitWorkspace {
    /// Remove and recreate the workspace directory.
    fn wipe(&self) -> Result<()>;
    /// Open `<workspace>/<owner>/<repo>`, cloning it first if absent.
    fn open_or_clone(&self, repo_url: &str) -> Result<Box<dyn GitRepo>>;
    /// Open an existing checkout outside the workspace.
    fn open_local(&self, path: &Path) -> Result<Box<dyn GitRepo>>;
}

/// Credentials for https remotes.
#[derive(Clone)]
pub struct GitCredentials {
    pub user: String,
    pub token: SecretString,
}

fn get_auth_callbacks<'r>(creds: &GitCredentials) -> RemoteCallbacks<'r> {
    let user = creds.user.clone();
    let token = creds.token.expose_secret().to_string();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        git2::Cred::userpass_plaintext(&user, &token)
    });
    callbacks
}

pub struct Git2Workspace {
    root: PathBuf,
    creds: GitCredentials,
}

impl Git2Workspace {
    pub fn new(root: impl Into<PathBuf>, creds: GitCredentials) -> Self {
        Self {
            root: root.into(),
            creds,
        }
    }
}

impl GitWorkspace for Git2Workspace {
    fn wipe(&self) -> Result<()> {
        info!("resetting workspace {}", self.root.display());
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    fn open_or_clone(&self, repo_url: &str) -> Result<Box<dyn GitRepo>> {
        let repo_ref = parse_repo_url(repo_url)?;
        let path = self.root.join(&repo_ref.owner).join(&repo_ref.repo);

        if path.exists() {
            return self.open_local(&path);
        }

        fs::create_dir_all(self.root.join(&repo_ref.owner))?;

        let url = format!("https://{}.git", repo_ref.url());
        info!("cloning {url} into {}", path.display());

        let mut fetch_options = FetchOptions::new();
        fetch_options.remote_callbacks(get_auth_callbacks(&self.creds));
        fetch_options.download_tags(AutotagOption::All);

        let repo = RepoBuilder::new()
            .fetch_options(fetch_options)
            .clone(&url, &path)?;

        Ok(Box::new(Git2Repo::new(repo, self.creds.clone())?))
    }

    fn open_local(&self, path: &Path) -> Result<Box<dyn GitRepo>> {
        let repo = git2::Repository::open(path)?;
        Ok(Box::new(Git2Repo::new(repo, self.creds.clone())?))
    }
}

pub struct Git2Repo {
    repo: git2::Repository,
    workdir: PathBuf,
    creds: GitCredentials,
}

impl Git2Repo {
    pub fn new(repo: git2::Repository, creds: GitCredentials) -> Result<Self> {
        let workdir = repo
            .workdir()
            .ok_or_else(|| {
                AutomatonError::GitError(git2::Error::from_str(
                    "repository has no working directory",
                ))
            })?
            .to_path_buf();
        Ok(Self {
            repo,
            workdir,
            creds,
        })
    }

    fn signature(&self) -> Result<Signature<'static>> {
        let config = self.repo.config()?.snapshot()?;
        let user = config.get_str("user.name")?;
        let email = config.get_str("user.email")?;
        Ok(Signature::now(user, email)?)
    }

    fn current_branch(&self) -> Result<String> {
        let head = self.repo.head()?;
        head.shorthand().map(String::from).ok_or_else(|| {
            AutomatonError::GitError(git2::Error::from_str(
                "HEAD does not point at a branch",
            ))
        })
    }

    fn switch_branch(&self, branch: &str) -> Result<()> {
        let ref_name = format!("refs/heads/{branch}");
        let target = self.repo.revparse_single(&ref_name)?;
        self.repo.checkout_tree(&target, None)?;
        self.repo.set_head(&ref_name)?;
        Ok(())
    }

    fn resolve_commit(&self, spec: &str) -> Result<git2::Commit<'_>> {
        Ok(self.repo.revparse_single(spec)?.peel_to_commit()?)
    }

    /// `ls-remote` of origin.
    fn remote_refs(&self) -> Result<Vec<(String, Oid)>> {
        let mut remote = self.repo.find_remote(ORIGIN)?;
        let connection = remote.connect_auth(
            Direction::Fetch,
            Some(get_auth_callbacks(&self.creds)),
            None,
        )?;
        let refs = connection
            .list()?
            .iter()
            .map(|head| (head.name().to_string(), head.oid()))
            .collect::<Vec<_>>();
        Ok(refs)
    }
}

impl GitRepo for Git2Repo {
    fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn checkout(&self, branch: &str) -> Result<()> {
        info!("git checkout {branch}");
        if self.repo.find_branch(branch, BranchType::Local).is_err() {
            let remote_branch = format!("{ORIGIN}/{branch}");
            let commit = self
                .repo
                .find_branch(&remote_branch, BranchType::Remote)?
                .get()
                .peel_to_commit()?;
            let mut local = self.repo.branch(branch, &commit, false)?;
            local.set_upstream(Some(remote_branch.as_str()))?;
        }
        self.switch_branch(branch)
    }

    fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        info!("git checkout -b {branch}");
        let commit = self.repo.head()?.peel_to_commit()?;
        self.repo.branch(branch, &commit, true)?;
        self.switch_branch(branch)
    }

    fn reset_hard(&self, sha: &str) -> Result<()> {
        info!("git reset --hard {sha}");
        let target = self.repo.revparse_single(sha)?;
        self.repo.reset(&target, ResetType::Hard, None)?;
        Ok(())
    }

    fn merge(&self, reference: &str) -> Result<()> {
        let branch = self.current_branch()?;
        info!("git merge {reference} into {branch}");

        let theirs = self.resolve_commit(reference)?;
        let annotated = self.repo.find_annotated_commit(theirs.id())?;
        let (analysis, _) = self.repo.merge_analysis(&[&annotated])?;

        if analysis.is_up_to_date() {
            return Ok(());
        }

        if analysis.is_fast_forward() {
            let ref_name = format!("refs/heads/{branch}");
            let mut head_ref = self.repo.find_reference(&ref_name)?;
            head_ref.set_target(theirs.id(), &format!("merge {reference}"))?;
            self.repo.set_head(&ref_name)?;
            self.repo
                .checkout_head(Some(CheckoutBuilder::new().force()))?;
            return Ok(());
        }

        self.repo.merge(&[&annotated], None, None)?;

        let mut index = self.repo.index()?;
        if index.has_conflicts() {
            self.repo.cleanup_state()?;
            return Err(AutomatonError::GitError(git2::Error::from_str(
                &format!("merging {reference} into {branch} has conflicts"),
            )));
        }

        let tree = self.repo.find_tree(index.write_tree()?)?;
        let ours = self.repo.head()?.peel_to_commit()?;
        let sig = self.signature()?;
        self.repo.commit(
            Some("HEAD"),
            &sig,
            &sig,
            &format!("Merge {reference} into {branch}"),
            &tree,
            &[&ours, &theirs],
        )?;
        self.repo.cleanup_state()?;

        Ok(())
    }

    fn is_modified(&self) -> Result<bool> {
        let mut index = self.repo.index()?;
        index.add_all(["*"], IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"], None)?;
        index.write()?;

        let head_tree = self.repo.head()?.peel_to_tree()?;
        let diff =
            self.repo
                .diff_tree_to_index(Some(&head_tree), Some(&index), None)?;

        Ok(diff.deltas().len() > 0)
    }

    fn commit(&self, messages: &[String], signoff: bool) -> Result<()> {
        let sig = self.signature()?;
        let mut message = messages.join("\n\n");
        if signoff {
            message.push_str(&format!(
                "\n\nSigned-off-by: {} <{}>",
                sig.name().unwrap_or_default(),
                sig.email().unwrap_or_default()
            ));
        }
        info!("git commit -m {:?}", messages.first());

        let mut index = self.repo.index()?;
        let tree = self.repo.find_tree(index.write_tree()?)?;
        let parent = self.repo.head()?.peel_to_commit()?;
        self.repo
            .commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&parent])?;
        Ok(())
    }

    fn push(&self, with_tags: bool) -> Result<()> {
        let branch = self.current_branch()?;

        let mut refspecs = vec![format!("refs/heads/{branch}:refs/heads/{branch}")];
        if with_tags {
            let tags = self.repo.tag_names(None)?;
            refspecs.extend(
                tags.iter().flatten().map(|t| format!("refs/tags/{t}")),
            );
        }
        info!("git push {ORIGIN} {branch} (tags: {with_tags})");

        let mut callbacks = get_auth_callbacks(&self.creds);
        callbacks.push_update_reference(|refname, status| match status {
            Some(msg) => Err(git2::Error::from_str(&format!(
                "failed to push {refname}: {msg}"
            ))),
            None => Ok(()),
        });
        let mut push_opts = PushOptions::new();
        push_opts.remote_callbacks(callbacks);

        let mut remote = self.repo.find_remote(ORIGIN)?;
        remote.push(&refspecs, Some(&mut push_opts))?;
        Ok(())
    }

    fn tag(&self, tag: &str, messages: &[String]) -> Result<()> {
        info!("git tag -a {tag}");
        let target = self.repo.head()?.peel_to_commit()?;
        let sig = self.signature()?;
        self.repo.tag(
            tag,
            target.as_object(),
            &sig,
            &messages.join("\n\n"),
            false,
        )?;
        Ok(())
    }

    fn remote_branch_exists(&self, branch: &str) -> Result<bool> {
        let name = format!("refs/heads/{branch}");
        Ok(self.remote_refs()?.iter().any(|(r, _)| *r == name))
    }

    fn remote_tag_sha(&self, tag: &str) -> Result<Option<String>> {
        let name = format!("refs/tags/{tag}");
        let peeled = format!("{name}^{{}}");
        let refs = self.remote_refs()?;

        if let Some((_, oid)) = refs.iter().find(|(r, _)| *r == peeled) {
            return Ok(Some(oid.to_string()));
        }

        let Some((_, oid)) = refs.iter().find(|(r, _)| *r == name) else {
            return Ok(None);
        };

        // annotated tags known locally can still be peeled to their commit
        let sha = self
            .repo
            .find_object(*oid, None)
            .and_then(|obj| obj.peel_to_commit())
            .map(|commit| commit.id())
            .unwrap_or(*oid);

        Ok(Some(sha.to_string()))
    }

    fn list_tags(&self) -> Result<Vec<String>> {
        let tags = self.repo.tag_names(None)?;
        Ok(tags.iter().flatten().map(String::from).collect())
    }

    fn first_commit(&self) -> Result<String> {
        let mut walk = self.repo.revwalk()?;
        walk.push_head()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

        for oid in walk {
            let commit = self.repo.find_commit(oid?)?;
            if commit.parent_count() == 0 {
                return Ok(commit.id().to_string());
            }
        }

        Err(AutomatonError::GitError(git2::Error::from_str(
            "repository has no root commit",
        )))
    }

    fn head_sha(&self) -> Result<String> {
        Ok(self.repo.head()?.peel_to_commit()?.id().to_string())
    }

    fn list_commits(&self, start: &str, end: &str) -> Result<Vec<Commit>> {
        let start = self.resolve_commit(start)?.id();
        let end = self.resolve_commit(end)?.id();

        let mut walk = self.repo.revwalk()?;
        walk.push(end)?;
        walk.hide(start)?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut commits = vec![];
        for oid in walk {
            let oid = oid?;
            // --ancestry-path
            if !self.repo.graph_descendant_of(oid, start)? {
                continue;
            }
            let commit = self.repo.find_commit(oid)?;
            commits.push(Commit {
                sha: oid.to_string(),
                subject: commit.summary().unwrap_or_default().to_string(),
            });
        }

        Ok(commits)
    }

    fn last_commit_body(&self) -> Result<String> {
        let head = self.repo.head()?.peel_to_commit()?;
        Ok(head.body().unwrap_or_default().trim().to_string())
    }
}
