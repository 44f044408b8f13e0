use crate::github::{ContentError, GitHubApi};
use crate::llm::Tool;
use crate::types::*;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Operations the agents may invoke as functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GetPrDetails,
    GetPrCommitDetail,
    GetFileContent,
    AddGatheredContextToState,
    AddDraftComment,
    AddFinalReviewToState,
    PostFinalReviewToGithubPr,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::GetPrDetails,
        ToolKind::GetPrCommitDetail,
        ToolKind::GetFileContent,
        ToolKind::AddGatheredContextToState,
        ToolKind::AddDraftComment,
        ToolKind::AddFinalReviewToState,
        ToolKind::PostFinalReviewToGithubPr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolKind::GetPrDetails => "get_pr_details",
            ToolKind::GetPrCommitDetail => "get_pr_commit_detail",
            ToolKind::GetFileContent => "get_file_content",
            ToolKind::AddGatheredContextToState => "add_gathered_context_to_state",
            ToolKind::AddDraftComment => "add_draft_comment",
            ToolKind::AddFinalReviewToState => "add_final_review_to_state",
            ToolKind::PostFinalReviewToGithubPr => "post_final_review_to_github_pr",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn description(&self) -> &'static str {
        match self {
            ToolKind::GetPrDetails => {
                "Get PR information: author, title, body, diff_url, state and the commit SHAs. \
                 The body is the PR description and is unreliable for file names; to get the \
                 actual changed files call get_pr_commit_detail with each commit SHA."
            }
            ToolKind::GetPrCommitDetail => {
                "Given a commit SHA, return the files that changed in that commit with their \
                 status, addition/deletion counts and patch. Returns null if no files changed."
            }
            ToolKind::GetFileContent => {
                "Get the content of a repository file at a given ref. Returns null if the file \
                 cannot be read."
            }
            ToolKind::AddGatheredContextToState => {
                "Save gathered context to the state so other agents can use it."
            }
            ToolKind::AddDraftComment => "Save the draft review comment to the state so other agents can use it.",
            ToolKind::AddFinalReviewToState => "Save your final review to the state.",
            ToolKind::PostFinalReviewToGithubPr => "Post your final review to the PR on GitHub.",
        }
    }

    /// JSON schema of the tool arguments
    pub fn parameters(&self) -> Value {
        let (properties, required) = match self {
            ToolKind::GetPrDetails | ToolKind::PostFinalReviewToGithubPr => (
                json!({"pr_number": {"type": "integer", "description": "Pull request number"}}),
                vec!["pr_number"],
            ),
            ToolKind::GetPrCommitDetail => (
                json!({"head_sha": {"type": "string", "description": "Commit SHA"}}),
                vec!["head_sha"],
            ),
            ToolKind::GetFileContent => (
                json!({
                    "file_path": {"type": "string", "description": "Path of the file in the repository"},
                    "ref": {"type": "string", "description": "Branch, tag or commit SHA"}
                }),
                vec!["file_path", "ref"],
            ),
            ToolKind::AddGatheredContextToState => (
                json!({"gathered_context": {"type": "string"}}),
                vec!["gathered_context"],
            ),
            ToolKind::AddDraftComment => (
                json!({"draft_comment": {"type": "string"}}),
                vec!["draft_comment"],
            ),
            ToolKind::AddFinalReviewToState => (
                json!({"final_review_comment": {"type": "string"}}),
                vec!["final_review_comment"],
            ),
        };

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A callable wrapper around one `GithubTools` operation
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionTool {
    pub kind: ToolKind,
    pub definition: Tool,
}

impl FunctionTool {
    pub fn new(kind: ToolKind) -> Self {
        Self {
            kind,
            definition: Tool {
                name: kind.name().to_string(),
                description: kind.description().to_string(),
                parameters: kind.parameters(),
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PrNumber {
    Number(u64),
    Text(String),
}

impl PrNumber {
    fn value(&self) -> Result<u64> {
        match self {
            PrNumber::Number(n) => Ok(*n),
            PrNumber::Text(s) => s
                .trim()
                .trim_start_matches('#')
                .parse()
                .with_context(|| format!("Invalid PR number '{}'", s)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PrNumberArgs {
    pr_number: PrNumber,
}

#[derive(Debug, Deserialize)]
struct CommitArgs {
    head_sha: String,
}

#[derive(Debug, Deserialize)]
struct FileArgs {
    file_path: String,
    #[serde(rename = "ref")]
    git_ref: String,
}

#[derive(Debug, Deserialize)]
struct GatheredContextArgs {
    gathered_context: String,
}

#[derive(Debug, Deserialize)]
struct DraftCommentArgs {
    draft_comment: String,
}

#[derive(Debug, Deserialize)]
struct FinalReviewArgs {
    final_review_comment: String,
}

fn parse_args<T: DeserializeOwned>(kind: ToolKind, arguments: &Value) -> Result<T> {
    serde_json::from_value(arguments.clone())
        .with_context(|| format!("Invalid arguments for {}: {}", kind.name(), arguments))
}

/// GitHub operations and shared state helpers exposed to the agents
#[derive(Clone)]
pub struct GithubTools {
    api: Arc<dyn GitHubApi>,
}

impl GithubTools {
    pub fn new(api: Arc<dyn GitHubApi>) -> Self {
        Self { api }
    }

    /// Get PR information: author, title, body, diff_url, state, commit SHAs.
    pub async fn get_pr_details(&self, pr_number: u64) -> Result<PullRequestDetails> {
        self.api.get_pull_request(pr_number).await
    }

    /// Files changed by a commit, or `None` when it touched none.
    pub async fn get_pr_commit_detail(&self, head_sha: &str) -> Result<Option<Vec<CommitFileChange>>> {
        let files = self.api.get_commit_files(head_sha).await?;
        Ok((!files.is_empty()).then_some(files))
    }

    pub async fn fetch_file_content(&self, file_path: &str, git_ref: &str) -> Result<String, ContentError> {
        self.api.get_file_content(file_path, git_ref).await
    }

    /// File text at `git_ref`; any failure yields `None`.
    pub async fn get_file_content(&self, file_path: &str, git_ref: &str) -> Option<String> {
        match self.fetch_file_content(file_path, git_ref).await {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("Could not read {}@{}: {}", file_path, git_ref, e);
                None
            }
        }
    }

    pub fn add_gathered_context_to_state(&self, state: &mut SharedState, gathered_context: String) {
        state.gathered_context = gathered_context;
    }

    pub fn add_draft_comment(&self, state: &mut SharedState, draft_comment: String) {
        state.draft_comment = draft_comment;
    }

    pub fn add_final_review_to_state(&self, state: &mut SharedState, final_review_comment: String) {
        state.final_review_comment = final_review_comment;
    }

    /// Submit the final review held in state as a PR review.
    #[instrument(skip(self, state))]
    pub async fn post_final_review_to_github_pr(&self, state: &SharedState, pr_number: u64) -> Result<()> {
        if state.final_review_comment.is_empty() {
            warn!("Posting an empty final review to PR #{}", pr_number);
        }

        self.api
            .create_review(pr_number, &state.final_review_comment)
            .await?;

        info!("Final review posted to PR #{}", pr_number);
        Ok(())
    }

    /// One wrapper per known method name, in input order. Unknown names are skipped.
    pub fn to_function_tools(&self, method_names: &[&str]) -> Vec<FunctionTool> {
        method_names
            .iter()
            .filter_map(|name| {
                let kind = ToolKind::from_name(name);
                if kind.is_none() {
                    debug!("Skipping unknown tool '{}'", name);
                }
                kind
            })
            .map(FunctionTool::new)
            .collect()
    }

    /// Invoke a tool with the JSON arguments chosen by the model.
    pub async fn call(&self, kind: ToolKind, arguments: &Value, state: &mut SharedState) -> Result<Value> {
        match kind {
            ToolKind::GetPrDetails => {
                let args: PrNumberArgs = parse_args(kind, arguments)?;
                let details = self.get_pr_details(args.pr_number.value()?).await?;
                Ok(serde_json::to_value(details)?)
            }
            ToolKind::GetPrCommitDetail => {
                let args: CommitArgs = parse_args(kind, arguments)?;
                let files = self.get_pr_commit_detail(&args.head_sha).await?;
                Ok(serde_json::to_value(files)?)
            }
            ToolKind::GetFileContent => {
                let args: FileArgs = parse_args(kind, arguments)?;
                let content = self.get_file_content(&args.file_path, &args.git_ref).await;
                Ok(content.map(Value::String).unwrap_or(Value::Null))
            }
            ToolKind::AddGatheredContextToState => {
                let args: GatheredContextArgs = parse_args(kind, arguments)?;
                self.add_gathered_context_to_state(state, args.gathered_context);
                Ok(Value::Null)
            }
            ToolKind::AddDraftComment => {
                let args: DraftCommentArgs = parse_args(kind, arguments)?;
                self.add_draft_comment(state, args.draft_comment);
                Ok(Value::Null)
            }
            ToolKind::AddFinalReviewToState => {
                let args: FinalReviewArgs = parse_args(kind, arguments)?;
                self.add_final_review_to_state(state, args.final_review_comment);
                Ok(Value::Null)
            }
            ToolKind::PostFinalReviewToGithubPr => {
                let args: PrNumberArgs = parse_args(kind, arguments)?;
                self.post_final_review_to_github_pr(state, args.pr_number.value()?).await?;
                Ok(Value::Null)
            }
        }
    }
}
