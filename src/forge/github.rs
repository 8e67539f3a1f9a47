//! Implements the Forge trait for Github
use async_trait::async_trait;
use log::*;
use octocrab::{
    Octocrab,
    models::{IssueState, pulls::ReviewState as GithubReviewState},
    params,
};
use secrecy::SecretString;

use crate::{
    Result,
    forge::{
        DEFAULT_LABEL_COLOR,
        request::{
            CreatePrRequest, FindPrRequest, IssueComment, PrLabelsRequest,
            PullRequest, PullRequestState, RepoRef, ReviewState,
        },
        traits::Forge,
    },
};

const DEFAULT_PAGE_SIZE: u8 = 100;

/// GitHub forge implementation using Octocrab for tracker comments, reviews,
/// labels and pull requests.
pub struct Github {
    instance: Octocrab,
}

impl Github {
    /// Create GitHub client with personal access token authentication.
    pub fn new(token: SecretString) -> Result<Self> {
        let instance = Octocrab::builder().personal_token(token).build()?;
        Ok(Self { instance })
    }

    fn to_pull_request(pr: octocrab::models::pulls::PullRequest) -> PullRequest {
        let state = match pr.state {
            Some(IssueState::Open) => PullRequestState::Open,
            _ => PullRequestState::Closed,
        };
        PullRequest {
            number: pr.number,
            html_url: pr.html_url.map(|u| u.to_string()).unwrap_or_default(),
            state,
            draft: pr.draft.unwrap_or(false),
            labels: pr
                .labels
                .unwrap_or_default()
                .into_iter()
                .map(|l| l.name)
                .collect(),
        }
    }

    /// Create any of `labels` missing from the repository.
    async fn ensure_labels(&self, repo: &RepoRef, labels: &[String]) -> Result<()> {
        let page = self
            .instance
            .issues(&repo.owner, &repo.repo)
            .list_labels_for_repo()
            .per_page(DEFAULT_PAGE_SIZE)
            .send()
            .await?;
        let existing = self.instance.all_pages(page).await?;

        for name in labels {
            if !existing.iter().any(|l| &l.name == name) {
                info!("creating label {name} in {repo}");
                self.instance
                    .issues(&repo.owner, &repo.repo)
                    .create_label(name, DEFAULT_LABEL_COLOR, "")
                    .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Forge for Github {
    async fn get_pull_request(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<PullRequest> {
        let pr = self
            .instance
            .pulls(&repo.owner, &repo.repo)
            .get(number)
            .await?;
        Ok(Self::to_pull_request(pr))
    }

    async fn list_issue_comments(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<IssueComment>> {
        let page = self
            .instance
            .issues(&repo.owner, &repo.repo)
            .list_comments(number)
            .per_page(DEFAULT_PAGE_SIZE)
            .send()
            .await?;
        let comments = self.instance.all_pages(page).await?;

        debug!("found {} comments on {repo}#{number}", comments.len());

        Ok(comments
            .into_iter()
            .map(|c| IssueComment {
                id: c.id.into_inner(),
                body: c.body.unwrap_or_default(),
            })
            .collect())
    }

    async fn create_comment(
        &self,
        repo: &RepoRef,
        number: u64,
        body: &str,
    ) -> Result<()> {
        info!("commenting on {repo}#{number}:\n{body}");
        self.instance
            .issues(&repo.owner, &repo.repo)
            .create_comment(number, body)
            .await?;
        Ok(())
    }

    async fn list_reviews(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<ReviewState>> {
        let page = self
            .instance
            .pulls(&repo.owner, &repo.repo)
            .list_reviews(number)
            .per_page(DEFAULT_PAGE_SIZE)
            .send()
            .await?;
        let reviews = self.instance.all_pages(page).await?;

        Ok(reviews
            .into_iter()
            .map(|r| match r.state {
                Some(GithubReviewState::Approved) => ReviewState::Approved,
                Some(GithubReviewState::ChangesRequested) => {
                    ReviewState::ChangesRequested
                }
                Some(GithubReviewState::Commented) => ReviewState::Commented,
                _ => ReviewState::Other,
            })
            .collect())
    }

    async fn find_open_pr(
        &self,
        repo: &RepoRef,
        req: FindPrRequest,
    ) -> Result<Option<PullRequest>> {
        let prs = self
            .instance
            .pulls(&repo.owner, &repo.repo)
            .list()
            .state(params::State::Open)
            .head(format!("{}:{}", repo.owner, req.head_branch))
            .base(req.base_branch)
            .per_page(1)
            .send()
            .await?;

        Ok(prs.into_iter().next().map(Self::to_pull_request))
    }

    async fn create_pr(
        &self,
        repo: &RepoRef,
        req: CreatePrRequest,
    ) -> Result<PullRequest> {
        info!(
            "opening pr in {repo}: {} -> {}",
            req.head_branch, req.base_branch
        );
        let pr = self
            .instance
            .pulls(&repo.owner, &repo.repo)
            .create(req.title, req.head_branch, req.base_branch)
            .body(req.body)
            .maintainer_can_modify(true)
            .draft(false)
            .send()
            .await?;

        Ok(Self::to_pull_request(pr))
    }

    async fn add_labels(
        &self,
        repo: &RepoRef,
        req: PrLabelsRequest,
    ) -> Result<()> {
        if req.labels.is_empty() {
            return Ok(());
        }

        self.ensure_labels(repo, &req.labels).await?;

        info!("labelling {repo}#{}: {:?}", req.pr_number, req.labels);
        self.instance
            .issues(&repo.owner, &repo.repo)
            .add_labels(req.pr_number, &req.labels)
            .await?;

        Ok(())
    }

    async fn remove_label(
        &self,
        repo: &RepoRef,
        number: u64,
        label: &str,
    ) -> Result<()> {
        info!("removing label {label} from {repo}#{number}");
        self.instance
            .issues(&repo.owner, &repo.repo)
            .remove_label(number, label)
            .await?;
        Ok(())
    }

    async fn list_labels(
        &self,
        repo: &RepoRef,
        number: u64,
    ) -> Result<Vec<String>> {
        let page = self
            .instance
            .issues(&repo.owner, &repo.repo)
            .list_labels_for_issue(number)
            .per_page(DEFAULT_PAGE_SIZE)
            .send()
            .await?;
        let labels = self.instance.all_pages(page).await?;

        Ok(labels.into_iter().map(|l| l.name).collect())
    }
}
