use crate::agents::communication::AgentCommunicationBus;
use crate::agents::handoff::{HandoffError, HandoffGraph};
use crate::agents::roles::{AgentRole, AgentSpec};
use crate::llm::{AgentPrompts, LLMInterface, LLMRequest, Message, MessageRole, Model, Tool, ToolCall};
use crate::tools::{GithubTools, ToolKind};
use crate::types::*;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

pub const HANDOFF_TOOL: &str = "handoff";

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("workflow stopped after {0} steps without finishing")]
    StepLimitExceeded(usize),

    #[error("LLM request failed: {0:#}")]
    Llm(anyhow::Error),

    #[error("failed to render prompt: {0:#}")]
    Prompt(anyhow::Error),

    #[error("workflow task failed: {0}")]
    Join(String),
}

#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub model: Model,
    pub temperature: Option<f32>,
    /// Upper bound on LLM calls per run; hand-offs may cycle
    pub max_steps: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            model: Model::default(),
            temperature: None,
            max_steps: 40,
        }
    }
}

/// Result of a finished run
#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub final_response: String,
    pub final_agent: AgentRole,
    pub state: SharedState,
    pub steps: usize,
    pub review_posted: bool,
}

#[derive(Debug, Deserialize)]
struct HandoffArgs {
    to_agent: String,
    #[serde(default)]
    reason: String,
}

struct ToolExecution {
    output: String,
    is_error: bool,
    next_agent: Option<AgentRole>,
    posted_review: bool,
}

impl ToolExecution {
    fn ok(output: String) -> Self {
        Self {
            output,
            is_error: false,
            next_agent: None,
            posted_review: false,
        }
    }

    fn error(output: String) -> Self {
        Self {
            output,
            is_error: true,
            next_agent: None,
            posted_review: false,
        }
    }
}

/// Runs the agents over a shared chat history, following hand-offs between them
pub struct AgentWorkflow {
    agents: HashMap<AgentRole, AgentSpec>,
    graph: HandoffGraph,
    llm: Arc<dyn LLMInterface>,
    tools: GithubTools,
    config: WorkflowConfig,
}

impl AgentWorkflow {
    pub fn new(
        agents: Vec<AgentSpec>,
        root: AgentRole,
        llm: Arc<dyn LLMInterface>,
        tools: GithubTools,
        config: WorkflowConfig,
    ) -> Result<Self, HandoffError> {
        let graph = HandoffGraph::from_specs(root, &agents)?;
        let agents = agents.into_iter().map(|a| (a.role, a)).collect();

        Ok(Self {
            agents,
            graph,
            llm,
            tools,
            config,
        })
    }

    pub fn root(&self) -> AgentRole {
        self.graph.root()
    }

    /// Start a run in the background and return a handle to its events.
    pub fn run(self: Arc<Self>, query: String, initial_state: SharedState) -> WorkflowHandler {
        let bus = AgentCommunicationBus::new();
        let events = bus.subscribe();

        let task = tokio::spawn(async move { self.execute(query, initial_state, &bus).await });

        WorkflowHandler { events, task }
    }

    /// Drive the run to completion, publishing every step on `bus`.
    #[instrument(skip_all, fields(root = %self.graph.root()))]
    pub async fn execute(
        &self,
        query: String,
        initial_state: SharedState,
        bus: &AgentCommunicationBus,
    ) -> Result<WorkflowOutcome, WorkflowError> {
        let mut state = initial_state;
        let mut history = vec![Message::user(query.clone())];
        let mut current = self.graph.root();
        let mut review_posted = false;
        let mut steps = 0;

        info!("Starting workflow with {}", current);

        loop {
            if steps >= self.config.max_steps {
                warn!("Workflow hit the step limit of {}", self.config.max_steps);
                return Err(WorkflowError::StepLimitExceeded(self.config.max_steps));
            }
            steps += 1;

            let agent = &self.agents[&current];
            bus.publish(AgentEvent::new(current, WorkflowEvent::AgentInput { input: query.clone() }))
                .await;

            let request = LLMRequest {
                messages: render_history(&history, &state).map_err(WorkflowError::Prompt)?,
                model: self.config.model.clone(),
                temperature: self.config.temperature,
                max_tokens: None,
                system_prompt: Some(agent.system_prompt.clone()),
                tools: Some(self.tool_definitions(agent)),
            };

            let response = self.llm.complete(request).await.map_err(WorkflowError::Llm)?;
            let calls = response.tool_calls.unwrap_or_default();
            let selections: Vec<ToolSelection> = calls.iter().map(tool_selection).collect();

            bus.publish(AgentEvent::new(
                current,
                WorkflowEvent::AgentOutput {
                    content: (!response.content.is_empty()).then(|| response.content.clone()),
                    tool_calls: selections.clone(),
                },
            ))
            .await;

            history.push(Message::assistant(response.content.clone(), calls.clone()));

            if calls.is_empty() {
                let stats = bus.get_statistics().await;
                info!(
                    "Workflow finished with {} after {} steps ({} events)",
                    current, steps, stats.total_events
                );
                return Ok(WorkflowOutcome {
                    final_response: response.content,
                    final_agent: current,
                    state,
                    steps,
                    review_posted,
                });
            }

            let mut next_agent = None;
            for selection in selections {
                bus.publish(AgentEvent::new(
                    current,
                    WorkflowEvent::ToolCall {
                        tool_name: selection.tool_name.clone(),
                        tool_kwargs: selection.tool_kwargs.clone(),
                        tool_id: selection.tool_id.clone(),
                    },
                ))
                .await;

                let execution = self.execute_tool(agent, &selection, &mut state).await;
                review_posted |= execution.posted_review;
                if execution.next_agent.is_some() {
                    next_agent = execution.next_agent;
                }

                history.push(Message::tool(selection.tool_id.clone(), execution.output.clone()));
                bus.publish(AgentEvent::new(
                    current,
                    WorkflowEvent::ToolCallResult {
                        tool_name: selection.tool_name,
                        tool_kwargs: selection.tool_kwargs,
                        tool_id: selection.tool_id,
                        output: execution.output,
                        is_error: execution.is_error,
                    },
                ))
                .await;
            }

            if let Some(next) = next_agent {
                info!("Hand-off from {} to {}", current, next);
                current = next;
            }
        }
    }

    fn tool_definitions(&self, agent: &AgentSpec) -> Vec<Tool> {
        let mut definitions: Vec<Tool> = agent.tools.iter().map(|t| t.definition.clone()).collect();

        let targets = self.graph.targets(agent.role);
        if !targets.is_empty() {
            let names: Vec<&str> = targets.iter().map(|t| t.name()).collect();
            definitions.push(Tool {
                name: HANDOFF_TOOL.to_string(),
                description: format!(
                    "Handoff control of the conversation to another agent. Agents you can hand off to: {}",
                    names.join(", ")
                ),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "to_agent": {"type": "string", "enum": names},
                        "reason": {"type": "string", "description": "Why control is handed over"}
                    },
                    "required": ["to_agent", "reason"]
                }),
            });
        }

        definitions
    }

    async fn execute_tool(
        &self,
        agent: &AgentSpec,
        selection: &ToolSelection,
        state: &mut SharedState,
    ) -> ToolExecution {
        if selection.tool_name == HANDOFF_TOOL {
            return self.handoff(agent.role, &selection.tool_kwargs);
        }

        let Some(tool) = agent.tool(&selection.tool_name) else {
            warn!("{} requested unavailable tool {}", agent.role, selection.tool_name);
            return ToolExecution::error(format!(
                "Tool {} is not available to {}",
                selection.tool_name, agent.role
            ));
        };

        debug!("{} calling {}", agent.role, tool.name());
        match self.tools.call(tool.kind, &selection.tool_kwargs, state).await {
            Ok(value) => {
                let mut execution = ToolExecution::ok(render_output(&value));
                execution.posted_review = tool.kind == ToolKind::PostFinalReviewToGithubPr;
                execution
            }
            Err(e) => {
                warn!("Tool {} failed: {:#}", tool.name(), e);
                ToolExecution::error(format!("Error: {:#}", e))
            }
        }
    }

    fn handoff(&self, from: AgentRole, kwargs: &Value) -> ToolExecution {
        let args: HandoffArgs = match serde_json::from_value(kwargs.clone()) {
            Ok(args) => args,
            Err(e) => return ToolExecution::error(format!("Invalid handoff arguments: {}", e)),
        };

        let valid: Vec<&str> = self.graph.targets(from).iter().map(|t| t.name()).collect();
        match AgentRole::from_name(&args.to_agent).filter(|to| self.graph.can_handoff(from, *to)) {
            Some(to) => ToolExecution {
                output: format!(
                    "Agent {} is now handling the request due to the following reason: {}.\nPlease continue with the current request.",
                    to, args.reason
                ),
                is_error: false,
                next_agent: Some(to),
                posted_review: false,
            },
            None => {
                warn!("{} requested hand-off to {}, refused", from, args.to_agent);
                ToolExecution::error(format!(
                    "Agent {} not found. Please select a valid agent to hand off to. Valid agents: {}",
                    args.to_agent,
                    valid.join(", ")
                ))
            }
        }
    }
}

fn tool_selection(call: &ToolCall) -> ToolSelection {
    let tool_kwargs = serde_json::from_str(&call.arguments)
        .unwrap_or_else(|_| Value::String(call.arguments.clone()));

    ToolSelection {
        tool_id: call.id.clone(),
        tool_name: call.name.clone(),
        tool_kwargs,
    }
}

fn render_output(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Copy of the history with the latest user message prefixed by the state.
fn render_history(history: &[Message], state: &SharedState) -> anyhow::Result<Vec<Message>> {
    let mut messages = history.to_vec();
    if let Some(last_user) = messages.iter_mut().rev().find(|m| m.role == MessageRole::User) {
        last_user.content = AgentPrompts::with_state(&last_user.content, state)?;
    }
    Ok(messages)
}

/// Handle to a running workflow
pub struct WorkflowHandler {
    events: broadcast::Receiver<AgentEvent>,
    task: JoinHandle<Result<WorkflowOutcome, WorkflowError>>,
}

impl WorkflowHandler {
    /// Events in emission order; ends when the run finishes.
    pub fn stream_events(&mut self) -> impl Stream<Item = AgentEvent> + '_ {
        futures::stream::unfold(&mut self.events, |events| async move {
            loop {
                match events.recv().await {
                    Ok(event) => return Some((event, events)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event stream lagged, {} events skipped", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }

    /// Wait for the run to end.
    pub async fn finish(self) -> Result<WorkflowOutcome, WorkflowError> {
        self.task
            .await
            .map_err(|e| WorkflowError::Join(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::create_agents;
    use crate::github::MockGitHubApi;
    use crate::llm::{LLMResponse, MockLLMInterface};
    use futures::StreamExt;
    use std::sync::Mutex;

    fn call(id: &str, name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }
    }

    /// LLM mock answering with `responses` in order and recording each request.
    fn scripted_llm(responses: Vec<LLMResponse>, requests: Arc<Mutex<Vec<LLMRequest>>>) -> MockLLMInterface {
        let queue = Mutex::new(responses.into_iter());
        let mut llm = MockLLMInterface::new();
        llm.expect_complete().returning(move |request| {
            requests.lock().unwrap().push(request);
            queue
                .lock()
                .unwrap()
                .next()
                .ok_or_else(|| anyhow::anyhow!("no scripted response left"))
        });
        llm
    }

    fn workflow(llm: MockLLMInterface, api: MockGitHubApi, max_steps: usize) -> Arc<AgentWorkflow> {
        let tools = GithubTools::new(Arc::new(api));
        let agents = create_agents(&tools);
        let config = WorkflowConfig {
            max_steps,
            ..WorkflowConfig::default()
        };
        Arc::new(AgentWorkflow::new(agents, AgentRole::ReviewAndPosting, Arc::new(llm), tools, config).unwrap())
    }

    fn full_review_script() -> Vec<LLMResponse> {
        vec![
            LLMResponse::with_tool_calls(
                "",
                vec![call("c1", HANDOFF_TOOL, json!({"to_agent": "CommentorAgent", "reason": "need a draft"}))],
            ),
            LLMResponse::with_tool_calls(
                "",
                vec![call("c2", HANDOFF_TOOL, json!({"to_agent": "ContextAgent", "reason": "need the diff"}))],
            ),
            LLMResponse::with_tool_calls(
                "",
                vec![
                    call("c3", "get_pr_details", json!({"pr_number": 7})),
                    call("c4", "add_gathered_context_to_state", json!({"gathered_context": "PR 7 adds search"})),
                    call("c5", HANDOFF_TOOL, json!({"to_agent": "CommentorAgent", "reason": "context ready"})),
                ],
            ),
            LLMResponse::with_tool_calls(
                "",
                vec![
                    call("c6", "add_draft_comment", json!({"draft_comment": "Thanks for the search endpoint."})),
                    call("c7", HANDOFF_TOOL, json!({"to_agent": "ReviewAndPostingAgent", "reason": "draft done"})),
                ],
            ),
            LLMResponse::with_tool_calls(
                "",
                vec![
                    call("c8", "add_final_review_to_state", json!({"final_review_comment": "Final: thanks!"})),
                    call("c9", "post_final_review_to_github_pr", json!({"pr_number": 7})),
                ],
            ),
            LLMResponse::text("The review has been posted."),
        ]
    }

    fn review_api() -> MockGitHubApi {
        let mut api = MockGitHubApi::new();
        api.expect_get_pull_request().returning(|_| {
            Ok(PullRequestDetails {
                author: "octocat".to_string(),
                title: "Add search".to_string(),
                body: None,
                diff_url: None,
                state: "open".to_string(),
                commit_shas: vec!["abc".to_string()],
            })
        });
        api.expect_create_review()
            .withf(|pr_number, body| *pr_number == 7 && body == "Final: thanks!")
            .times(1)
            .returning(|_, _| Ok(()));
        api
    }

    #[tokio::test]
    async fn test_full_review_follows_handoffs() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(full_review_script(), requests.clone()), review_api(), 40);

        let bus = AgentCommunicationBus::new();
        let outcome = wf
            .execute("Review PR 7".to_string(), SharedState::default(), &bus)
            .await
            .unwrap();

        assert!(outcome.review_posted);
        assert_eq!(outcome.steps, 6);
        assert_eq!(outcome.final_agent, AgentRole::ReviewAndPosting);
        assert_eq!(outcome.final_response, "The review has been posted.");
        assert_eq!(outcome.state.gathered_context, "PR 7 adds search");
        assert_eq!(outcome.state.draft_comment, "Thanks for the search endpoint.");
        assert_eq!(outcome.state.final_review_comment, "Final: thanks!");

        let requests = requests.lock().unwrap();
        let prompts: Vec<_> = requests.iter().map(|r| r.system_prompt.clone().unwrap()).collect();
        assert!(prompts[0].starts_with("You are the Review and Posting agent"));
        assert!(prompts[1].starts_with("You are the commentor agent"));
        assert!(prompts[2].starts_with("You are the context gathering agent"));

        // The state seen by the commentor includes what the context agent saved
        let user = &requests[3].messages[0];
        assert!(user.content.contains("PR 7 adds search"));
        assert!(user.content.ends_with("Current message:\nReview PR 7\n"));
    }

    #[tokio::test]
    async fn test_disallowed_handoff_is_refused() {
        let script = vec![
            LLMResponse::with_tool_calls(
                "",
                vec![call("c1", HANDOFF_TOOL, json!({"to_agent": "ContextAgent", "reason": "skip drafting"}))],
            ),
            LLMResponse::text("I will ask the commentor instead."),
        ];
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(script, requests.clone()), MockGitHubApi::new(), 40);

        let bus = AgentCommunicationBus::new();
        let outcome = wf
            .execute("Review PR 1".to_string(), SharedState::default(), &bus)
            .await
            .unwrap();

        assert_eq!(outcome.final_agent, AgentRole::ReviewAndPosting);
        let results = bus.get_event_history(None, Some("tool_call_result"), None).await;
        match &results[0].event {
            WorkflowEvent::ToolCallResult { output, is_error, .. } => {
                assert!(*is_error);
                assert!(output.contains("Valid agents: CommentorAgent"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_tool_outside_agent_subset_is_rejected() {
        let script = vec![
            LLMResponse::with_tool_calls("", vec![call("c1", "get_pr_details", json!({"pr_number": 1}))]),
            LLMResponse::text("done"),
        ];
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(script, requests.clone()), MockGitHubApi::new(), 40);

        let bus = AgentCommunicationBus::new();
        wf.execute("Review PR 1".to_string(), SharedState::default(), &bus)
            .await
            .unwrap();

        let results = bus.get_event_history(None, Some("tool_call_result"), None).await;
        match &results[0].event {
            WorkflowEvent::ToolCallResult { output, is_error, .. } => {
                assert!(*is_error);
                assert!(output.contains("not available to ReviewAndPostingAgent"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        // The root offers its own tools plus the hand-off
        let tool_names: Vec<_> = requests.lock().unwrap()[0]
            .tools
            .as_ref()
            .unwrap()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(
            tool_names,
            vec!["add_final_review_to_state", "post_final_review_to_github_pr", HANDOFF_TOOL]
        );
    }

    #[tokio::test]
    async fn test_step_limit_bounds_redraft_cycles() {
        let script: Vec<_> = (0..10)
            .map(|i| {
                let to = if i % 2 == 0 { "CommentorAgent" } else { "ReviewAndPostingAgent" };
                LLMResponse::with_tool_calls(
                    "",
                    vec![call(&format!("c{}", i), HANDOFF_TOOL, json!({"to_agent": to, "reason": "redraft"}))],
                )
            })
            .collect();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(script, requests.clone()), MockGitHubApi::new(), 4);

        let bus = AgentCommunicationBus::new();
        let err = wf
            .execute("Review PR 1".to_string(), SharedState::default(), &bus)
            .await
            .unwrap_err();

        assert!(matches!(err, WorkflowError::StepLimitExceeded(4)));
        assert_eq!(requests.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_github_failure_is_reported_to_the_model() {
        let script = vec![
            LLMResponse::with_tool_calls(
                "",
                vec![call("c1", "post_final_review_to_github_pr", json!({"pr_number": 99}))],
            ),
            LLMResponse::text("Posting failed."),
        ];
        let mut api = MockGitHubApi::new();
        api.expect_create_review()
            .returning(|_, _| Err(anyhow::anyhow!("Not Found")));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(script, requests.clone()), api, 40);

        let bus = AgentCommunicationBus::new();
        let outcome = wf
            .execute("Review PR 99".to_string(), SharedState::default(), &bus)
            .await
            .unwrap();

        assert!(!outcome.review_posted);
        let requests = requests.lock().unwrap();
        let second = &requests[1];
        let tool_message = second.messages.last().unwrap();
        assert_eq!(tool_message.role, MessageRole::Tool);
        assert!(tool_message.content.contains("Not Found"));
    }

    #[tokio::test]
    async fn test_llm_failure_ends_the_run() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(vec![], requests), MockGitHubApi::new(), 40);

        let bus = AgentCommunicationBus::new();
        let err = wf
            .execute("Review PR 1".to_string(), SharedState::default(), &bus)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Llm(_)));
    }

    #[tokio::test]
    async fn test_run_streams_events_in_order() {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let wf = workflow(scripted_llm(full_review_script(), requests), review_api(), 40);

        let mut handler = wf.run("Review PR 7".to_string(), SharedState::with_pr_number(7));
        let events: Vec<AgentEvent> = handler.stream_events().collect().await;
        let outcome = handler.finish().await.unwrap();

        assert!(outcome.review_posted);
        assert_eq!(outcome.state.pr_number, "7");
        assert_eq!(events.first().unwrap().event.kind(), "agent_input");
        assert_eq!(events.last().unwrap().event.kind(), "agent_output");

        let switches: Vec<AgentRole> = events
            .iter()
            .filter(|e| e.event.kind() == "agent_input")
            .map(|e| e.agent)
            .collect();
        assert_eq!(
            switches,
            vec![
                AgentRole::ReviewAndPosting,
                AgentRole::Commentor,
                AgentRole::Context,
                AgentRole::Commentor,
                AgentRole::ReviewAndPosting,
                AgentRole::ReviewAndPosting,
            ]
        );
    }
}
