use crate::agents::AgentRole;
use crate::types::SharedState;
use anyhow::{Context, Result};

/// Prompt template for one agent role
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub description: String,
    pub system_prompt: String,
}

/// Wraps the latest user message so every agent sees the shared state
pub const STATE_PROMPT_TEMPLATE: &str = "Current state:\n{state}\nCurrent message:\n{msg}\n";

/// Collection of prompts for all agents
pub struct AgentPrompts;

impl AgentPrompts {
    /// Context gathering agent prompt
    pub fn context_agent() -> PromptTemplate {
        PromptTemplate {
            description: "Gathers all the needed context and save it to the state.".to_string(),
            system_prompt: r#"You are the context gathering agent. When gathering context, you MUST gather:
  - The details: author, title, body, diff_url, state, and head_sha;
  - Changed files;
  - Any requested for files;
Once you gather the requested info, you MUST hand control back to the Commentor Agent."#
                .to_string(),
        }
    }

    /// Review drafting agent prompt
    pub fn commentor_agent() -> PromptTemplate {
        PromptTemplate {
            description: "Uses the context gathered by the context agent to draft a pull review comment comment."
                .to_string(),
            system_prompt: r#"You are the commentor agent that writes review comments for pull requests as a human reviewer would.
Ensure to do the following for a thorough review:
 - Request for the PR details, changed files, and any other repo files you may need from the ContextAgent.
 - If you need any additional details, you must hand off to the ContextAgent, Do NOT ask user!
 - Once you have asked for all the needed information, write a good ~200-300 word review in markdown format detailing:
    - What is good about the PR?
    - Did the author follow ALL contribution rules? What is missing?
    - Are there tests for new functionality? If there are new models, are there migrations for them? - use the diff to determine this.
    - Are new endpoints documented? - use the diff to determine this.
    - Which lines could be improved upon? Quote these lines and offer suggestions the author could implement.
 - You should directly address the author. So your comments should sound like:
 "Thanks for fixing this. I think all places where we call quote should be fixed. Can you roll this fix out everywhere?".
 - You must hand off to the ReviewAndPostingAgent once you are done drafting a review."#
                .to_string(),
        }
    }

    /// Rubric check and posting agent prompt
    pub fn review_and_posting_agent() -> PromptTemplate {
        PromptTemplate {
            description: "Posts a review to GitHub once it is ready.".to_string(),
            system_prompt: r#"You are the Review and Posting agent. You must use the CommentorAgent to create a review comment.
Once a review is generated, you need to run a final check and post it to GitHub.
 - The review must:
   - Be a ~200-300 word review in markdown format.
   - Specify what is good about the PR.
   - Did the author follow ALL contribution rules? What is missing?
   - Are there notes on test availability for new functionality? If there are new models, are there migrations for them?
   - Are there notes on whether new endpoints were documented?
   - Are there suggestions on which lines could be improved upon? Are these lines quoted?
If the review does not meet this criteria, you must ask the CommentorAgent to rewrite and address these concerns.
When you are satisfied, post the review to GitHub."#
                .to_string(),
        }
    }

    /// Get the prompt template for an agent role
    pub fn get_template(role: AgentRole) -> PromptTemplate {
        match role {
            AgentRole::Context => Self::context_agent(),
            AgentRole::Commentor => Self::commentor_agent(),
            AgentRole::ReviewAndPosting => Self::review_and_posting_agent(),
        }
    }

    /// Render the query read from the console into the task prompt.
    pub fn task_prompt(query: &str) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(anyhow::anyhow!("Task prompt is empty"));
        }
        Ok(query.to_string())
    }

    /// Prefix a user message with the current shared state.
    pub fn with_state(message: &str, state: &SharedState) -> Result<String> {
        let state_json = serde_json::to_string_pretty(state).context("Failed to render shared state")?;
        fill_state_template(&state_json, message)
    }
}

/// Substitute both placeholders in one pass so neither value is rescanned.
fn fill_state_template(state_json: &str, message: &str) -> Result<String> {
    let (head, rest) = STATE_PROMPT_TEMPLATE
        .split_once("{state}")
        .context("State template is missing {state}")?;
    let (middle, tail) = rest
        .split_once("{msg}")
        .context("State template is missing {msg}")?;

    Ok(format!("{}{}{}{}{}", head, state_json, middle, message, tail))
}
