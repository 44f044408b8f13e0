use crate::github::content::{decode_contents, ContentError};
use crate::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use octocrab::Octocrab;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

const COMMITS_PER_PAGE: u8 = 100;

/// Review state submitted together with the review body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    #[default]
    Comment,
    Approve,
    RequestChanges,
    /// Leave the review unsubmitted
    Pending,
}

impl ReviewEvent {
    fn as_api_value(&self) -> Option<&'static str> {
        match self {
            ReviewEvent::Comment => Some("COMMENT"),
            ReviewEvent::Approve => Some("APPROVE"),
            ReviewEvent::RequestChanges => Some("REQUEST_CHANGES"),
            ReviewEvent::Pending => None,
        }
    }
}

/// Repository operations the review tools depend on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GitHubApi: Send + Sync {
    /// PR metadata plus the SHAs of every commit on the PR
    async fn get_pull_request(&self, pr_number: u64) -> Result<PullRequestDetails>;

    /// Files touched by a single commit
    async fn get_commit_files(&self, sha: &str) -> Result<Vec<CommitFileChange>>;

    /// Text of a file at the given ref
    async fn get_file_content(&self, path: &str, git_ref: &str) -> std::result::Result<String, ContentError>;

    /// Submit a review on the PR
    async fn create_review(&self, pr_number: u64, body: &str) -> Result<()>;
}

/// GitHub API client bound to one repository
pub struct GitHubClient {
    client: Octocrab,
    owner: String,
    repo: String,
    review_event: ReviewEvent,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    user: Option<UserRef>,
    title: Option<String>,
    body: Option<String>,
    diff_url: Option<String>,
    state: String,
}

#[derive(Debug, Deserialize)]
struct UserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct CommitRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<FileResponse>,
}

#[derive(Debug, Deserialize)]
struct FileResponse {
    filename: String,
    status: String,
    additions: u64,
    deletions: u64,
    changes: u64,
    patch: Option<String>,
    previous_filename: Option<String>,
}

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

#[derive(Debug, Serialize)]
struct RefParams<'a> {
    #[serde(rename = "ref")]
    git_ref: &'a str,
}

#[derive(Debug, Serialize)]
struct ReviewRequest<'a> {
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'static str>,
}

impl GitHubClient {
    /// Create a new GitHub client with authentication token
    pub fn new(token: String, repository: &str, review_event: ReviewEvent) -> Result<Self> {
        let (owner, repo) = parse_repository(repository)?;
        let client = Octocrab::builder()
            .personal_token(token)
            .build()
            .context("Failed to create GitHub client")?;

        Ok(Self {
            client,
            owner,
            repo,
            review_event,
        })
    }

    pub fn repository(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    fn route(&self, suffix: &str) -> String {
        format!("/repos/{}/{}/{}", self.owner, self.repo, suffix)
    }

    async fn list_commit_shas(&self, pr_number: u64) -> Result<Vec<String>> {
        let route = self.route(&format!("pulls/{}/commits", pr_number));
        let mut shas = Vec::new();
        let mut page = 1;

        loop {
            let params = PageParams {
                per_page: COMMITS_PER_PAGE,
                page,
            };
            let commits: Vec<CommitRef> = self
                .client
                .get(&route, Some(&params))
                .await
                .with_context(|| format!("Failed to list commits for PR #{}", pr_number))?;

            let fetched = commits.len();
            shas.extend(commits.into_iter().map(|c| c.sha));

            if fetched < COMMITS_PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        Ok(shas)
    }

    /// Check if the client can authenticate
    pub async fn check_authentication(&self) -> Result<String> {
        let user = self
            .client
            .current()
            .user()
            .await
            .context("Failed to authenticate with GitHub")?;

        Ok(user.login)
    }
}

#[async_trait]
impl GitHubApi for GitHubClient {
    #[instrument(skip(self), fields(repo = %self.repository()))]
    async fn get_pull_request(&self, pr_number: u64) -> Result<PullRequestDetails> {
        info!("Fetching PR details for #{}", pr_number);

        let pr: PullResponse = self
            .client
            .get(self.route(&format!("pulls/{}", pr_number)), None::<&()>)
            .await
            .with_context(|| format!("Failed to fetch PR #{}", pr_number))?;

        let commit_shas = self.list_commit_shas(pr_number).await?;
        debug!("PR #{} has {} commits", pr_number, commit_shas.len());

        Ok(pull_request_details(pr, commit_shas))
    }

    #[instrument(skip(self), fields(repo = %self.repository()))]
    async fn get_commit_files(&self, sha: &str) -> Result<Vec<CommitFileChange>> {
        let commit: CommitResponse = self
            .client
            .get(self.route(&format!("commits/{}", sha)), None::<&()>)
            .await
            .with_context(|| format!("Failed to fetch commit {}", sha))?;

        debug!("Commit {} touches {} files", sha, commit.files.len());
        Ok(commit.files.into_iter().map(commit_file_change).collect())
    }

    async fn get_file_content(&self, path: &str, git_ref: &str) -> std::result::Result<String, ContentError> {
        let route = self.route(&format!("contents/{}", path.trim_start_matches('/')));
        let params = RefParams { git_ref };

        match self.client.get::<serde_json::Value, _, _>(route, Some(&params)).await {
            Ok(value) => decode_contents(value),
            Err(octocrab::Error::GitHub { source, .. }) if source.message == "Not Found" => {
                Err(ContentError::NotFound(path.to_string()))
            }
            Err(e) => Err(ContentError::Api(e.to_string())),
        }
    }

    #[instrument(skip(self, body), fields(repo = %self.repository()))]
    async fn create_review(&self, pr_number: u64, body: &str) -> Result<()> {
        let request = ReviewRequest {
            body,
            event: self.review_event.as_api_value(),
        };

        let response: serde_json::Value = self
            .client
            .post(self.route(&format!("pulls/{}/reviews", pr_number)), Some(&request))
            .await
            .with_context(|| format!("Failed to post review on PR #{}", pr_number))?;

        match response["id"].as_u64() {
            Some(id) => info!("Posted review {} on PR #{}", id, pr_number),
            None => warn!("Review posted on PR #{} but no id was returned", pr_number),
        }
        Ok(())
    }
}

fn pull_request_details(pr: PullResponse, commit_shas: Vec<String>) -> PullRequestDetails {
    PullRequestDetails {
        author: pr.user.map(|u| u.login).unwrap_or_default(),
        title: pr.title.unwrap_or_default(),
        body: pr.body,
        diff_url: pr.diff_url,
        state: pr.state,
        commit_shas,
    }
}

fn commit_file_change(file: FileResponse) -> CommitFileChange {
    CommitFileChange {
        status: ChangeStatus::from_github(&file.status),
        filename: file.filename,
        additions: file.additions,
        deletions: file.deletions,
        changes: file.changes,
        patch: file.patch,
        previous_filename: file.previous_filename,
    }
}

/// Parse `owner/repo` or a GitHub URL into owner and name
pub fn parse_repository(repo: &str) -> Result<(String, String)> {
    let pattern = Regex::new(r"^(?:https?://github\.com/|git@github\.com:)?([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .context("Invalid repository pattern")?;

    let captures = pattern.captures(repo.trim()).ok_or_else(|| {
        anyhow::anyhow!("Invalid repository format. Expected 'owner/repo', got '{}'", repo)
    })?;

    Ok((captures[1].to_string(), captures[2].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_repository() {
        let (owner, repo) = parse_repository("owner/repo").unwrap();
        assert_eq!(owner, "owner");
        assert_eq!(repo, "repo");

        assert!(parse_repository("invalid").is_err());
        assert!(parse_repository("too/many/parts").is_err());
    }

    #[test]
    fn test_parse_repository_url() {
        let (owner, repo) = parse_repository("https://github.com/MBorky/recipes-api.git").unwrap();
        assert_eq!(owner, "MBorky");
        assert_eq!(repo, "recipes-api");

        let (owner, repo) = parse_repository("git@github.com:rust-lang/rust.git").unwrap();
        assert_eq!(owner, "rust-lang");
        assert_eq!(repo, "rust");
    }

    #[test]
    fn test_pull_request_details_mapping() {
        let pr: PullResponse = serde_json::from_value(json!({
            "number": 12,
            "user": {"login": "octocat", "id": 1},
            "title": "Add recipe search",
            "body": null,
            "diff_url": "https://github.com/o/r/pull/12.diff",
            "state": "open",
        }))
        .unwrap();

        let details = pull_request_details(pr, vec!["abc".to_string(), "def".to_string()]);
        assert_eq!(details.author, "octocat");
        assert_eq!(details.title, "Add recipe search");
        assert_eq!(details.body, None);
        assert_eq!(details.state, "open");
        assert_eq!(details.commit_shas, vec!["abc", "def"]);
    }

    #[test]
    fn test_commit_response_mapping() {
        let commit: CommitResponse = serde_json::from_value(json!({
            "sha": "abc123",
            "files": [{
                "filename": "new.py",
                "previous_filename": "old.py",
                "status": "renamed",
                "additions": 1,
                "deletions": 2,
                "changes": 3,
                "patch": "@@ -1 +1 @@"
            }]
        }))
        .unwrap();

        let files: Vec<_> = commit.files.into_iter().map(commit_file_change).collect();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].filename, "new.py");
        assert_eq!(files[0].status, ChangeStatus::Renamed);
        assert_eq!(files[0].changes, 3);
        assert_eq!(files[0].previous_filename.as_deref(), Some("old.py"));
    }

    #[test]
    fn test_commit_without_files() {
        let commit: CommitResponse = serde_json::from_value(json!({"sha": "abc123"})).unwrap();
        assert!(commit.files.is_empty());
    }

    #[test]
    fn test_review_request_body() {
        let request = ReviewRequest {
            body: "Looks good",
            event: ReviewEvent::Comment.as_api_value(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({"body": "Looks good", "event": "COMMENT"})
        );

        let pending = ReviewRequest {
            body: "Draft",
            event: ReviewEvent::Pending.as_api_value(),
        };
        assert_eq!(serde_json::to_value(&pending).unwrap(), json!({"body": "Draft"}));
    }
}
