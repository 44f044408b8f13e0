use crate::llm::AgentPrompts;
use crate::tools::{FunctionTool, GithubTools};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three cooperating review roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AgentRole {
    #[serde(rename = "ContextAgent")]
    Context,
    #[serde(rename = "CommentorAgent")]
    Commentor,
    #[serde(rename = "ReviewAndPostingAgent")]
    ReviewAndPosting,
}

impl AgentRole {
    pub const ALL: [AgentRole; 3] = [
        AgentRole::Context,
        AgentRole::Commentor,
        AgentRole::ReviewAndPosting,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AgentRole::Context => "ContextAgent",
            AgentRole::Commentor => "CommentorAgent",
            AgentRole::ReviewAndPosting => "ReviewAndPostingAgent",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.name() == name.trim())
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration of one agent: prompt, tools and hand-off permissions
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub role: AgentRole,
    pub description: String,
    pub system_prompt: String,
    pub tools: Vec<FunctionTool>,
    pub can_handoff_to: Vec<AgentRole>,
}

impl AgentSpec {
    pub fn tool(&self, name: &str) -> Option<&FunctionTool> {
        self.tools.iter().find(|tool| tool.name() == name)
    }
}

/// Build the context, commentor and review-and-posting agents.
pub fn create_agents(github_tools: &GithubTools) -> Vec<AgentSpec> {
    let context = AgentPrompts::context_agent();
    let commentor = AgentPrompts::commentor_agent();
    let review = AgentPrompts::review_and_posting_agent();

    vec![
        AgentSpec {
            role: AgentRole::Context,
            description: context.description,
            system_prompt: context.system_prompt,
            tools: github_tools.to_function_tools(&[
                "get_pr_details",
                "get_file_content",
                "get_pr_commit_detail",
                "add_gathered_context_to_state",
            ]),
            can_handoff_to: vec![AgentRole::Commentor, AgentRole::ReviewAndPosting],
        },
        AgentSpec {
            role: AgentRole::Commentor,
            description: commentor.description,
            system_prompt: commentor.system_prompt,
            tools: github_tools.to_function_tools(&["add_draft_comment"]),
            can_handoff_to: vec![AgentRole::Context, AgentRole::ReviewAndPosting],
        },
        AgentSpec {
            role: AgentRole::ReviewAndPosting,
            description: review.description,
            system_prompt: review.system_prompt,
            tools: github_tools.to_function_tools(&[
                "add_final_review_to_state",
                "post_final_review_to_github_pr",
            ]),
            can_handoff_to: vec![AgentRole::Commentor],
        },
    ]
}
