//! Traits related to the remote git forge
use async_trait::async_trait;

use crate::{
    Result,
    forge::request::{
        CreatePrRequest, FindPrRequest, IssueComment, PrLabelsRequest,
        PullRequest, RepoRef, ReviewState,
    },
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Forge: Send + Sync {
    async fn get_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequest>;

    /// Issue comments in creation order, across all pages.
    async fn list_issue_comments(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<IssueComment>>;

    async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<()>;

    async fn list_reviews(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ReviewState>>;

    async fn find_open_pr(
        &self,
        repo: &RepoRef,
        req: FindPrRequest,
    ) -> Result<Option<PullRequest>>;

    async fn create_pr(
        &self,
        repo: &RepoRef,
        req: CreatePrRequest,
    ) -> Result<PullRequest>;

    async fn add_labels(
        &self,
        repo: &RepoRef,
        req: PrLabelsRequest,
    ) -> Result<()>;

    async fn remove_label(
        &self,
        repo: &RepoRef,
        number: u64,
        label: &str,
    ) -> Result<()>;

    async fn list_labels(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<String>>;
}
