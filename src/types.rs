use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::agents::AgentRole;

/// Core types for the PR Review Agent system

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestDetails {
    pub author: String,
    pub title: String,
    pub body: Option<String>,
    pub diff_url: Option<String>,
    pub state: String,
    pub commit_shas: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitFileChange {
    pub filename: String,
    pub status: ChangeStatus,
    pub additions: u64,
    pub deletions: u64,
    pub changes: u64,
    pub patch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeStatus {
    Added,
    Removed,
    Modified,
    Renamed,
    Copied,
    Changed,
    Unchanged,

    // Status values GitHub adds later, kept verbatim
    Other(String),
}

impl ChangeStatus {
    /// Map the status string reported by the GitHub API.
    pub fn from_github(status: &str) -> Self {
        match status {
            "added" => ChangeStatus::Added,
            "removed" => ChangeStatus::Removed,
            "modified" => ChangeStatus::Modified,
            "renamed" => ChangeStatus::Renamed,
            "copied" => ChangeStatus::Copied,
            "changed" => ChangeStatus::Changed,
            "unchanged" => ChangeStatus::Unchanged,
            other => {
                warn!("Unknown file status '{}' from GitHub", other);
                ChangeStatus::Other(other.to_string())
            }
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ChangeStatus::Added => "added",
            ChangeStatus::Removed => "removed",
            ChangeStatus::Modified => "modified",
            ChangeStatus::Renamed => "renamed",
            ChangeStatus::Copied => "copied",
            ChangeStatus::Changed => "changed",
            ChangeStatus::Unchanged => "unchanged",
            ChangeStatus::Other(status) => status,
        }
    }
}

impl From<String> for ChangeStatus {
    fn from(status: String) -> Self {
        ChangeStatus::from_github(&status)
    }
}

impl From<ChangeStatus> for String {
    fn from(status: ChangeStatus) -> Self {
        status.as_str().to_string()
    }
}

/// State threaded through every agent of a single workflow run.
///
/// All fields start empty. Any agent may read or overwrite any field; the
/// runner lends the state to one tool call at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedState {
    pub gathered_context: String,
    pub pr_number: String,
    pub draft_comment: String,
    pub final_review_comment: String,
}

impl SharedState {
    pub fn with_pr_number(pr_number: u64) -> Self {
        Self {
            pr_number: pr_number.to_string(),
            ..Self::default()
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSelection {
    pub tool_id: String,
    pub tool_name: String,
    pub tool_kwargs: serde_json::Value,
}

/// Payload of an event emitted while a workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    AgentInput {
        input: String,
    },
    AgentOutput {
        content: Option<String>,
        tool_calls: Vec<ToolSelection>,
    },
    ToolCall {
        tool_name: String,
        tool_kwargs: serde_json::Value,
        tool_id: String,
    },
    ToolCallResult {
        tool_name: String,
        tool_kwargs: serde_json::Value,
        tool_id: String,
        output: String,
        is_error: bool,
    },
}

impl WorkflowEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkflowEvent::AgentInput { .. } => "agent_input",
            WorkflowEvent::AgentOutput { .. } => "agent_output",
            WorkflowEvent::ToolCall { .. } => "tool_call",
            WorkflowEvent::ToolCallResult { .. } => "tool_call_result",
        }
    }

    /// Only agent input and output events name the active agent.
    pub fn announces_agent(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::AgentInput { .. } | WorkflowEvent::AgentOutput { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent: AgentRole,
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

impl AgentEvent {
    pub fn new(agent: AgentRole, event: WorkflowEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent,
            event,
        }
    }

    /// The agent name for events that carry one, mirroring how the
    /// console loop detects agent switches.
    pub fn current_agent_name(&self) -> Option<&'static str> {
        self.event.announces_agent().then(|| self.agent.name())
    }
}
