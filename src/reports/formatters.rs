use crate::types::{AgentEvent, WorkflowEvent};
use anyhow::Result;

/// Trait for rendering workflow events on the console
pub trait EventFormatter {
    fn format(&mut self, event: &AgentEvent) -> Result<Vec<String>>;
}

/// Human readable lines, announcing each agent switch once
#[derive(Debug, Default)]
pub struct TextFormatter {
    current_agent: Option<&'static str>,
}

impl EventFormatter for TextFormatter {
    fn format(&mut self, event: &AgentEvent) -> Result<Vec<String>> {
        let mut lines = Vec::new();

        if let Some(agent) = event.current_agent_name() {
            if self.current_agent != Some(agent) {
                self.current_agent = Some(agent);
                lines.push(format!("Current agent: {}", agent));
            }
        }

        match &event.event {
            WorkflowEvent::AgentInput { .. } => {}
            WorkflowEvent::AgentOutput { content, tool_calls } => {
                if let Some(content) = content.as_deref().filter(|c| !c.is_empty()) {
                    lines.push(format!("\n\nFinal response: {}", content));
                }
                if !tool_calls.is_empty() {
                    let names: Vec<&str> = tool_calls.iter().map(|c| c.tool_name.as_str()).collect();
                    lines.push(format!("Selected tools: {:?}", names));
                }
            }
            WorkflowEvent::ToolCall {
                tool_name,
                tool_kwargs,
                ..
            } => {
                lines.push(format!(
                    "Calling selected tool: {}, with arguments: {}",
                    tool_name, tool_kwargs
                ));
            }
            WorkflowEvent::ToolCallResult { output, .. } => {
                lines.push(format!("Output from tool: {}", output));
            }
        }

        Ok(lines)
    }
}

/// One JSON object per event
#[derive(Debug, Default)]
pub struct JsonFormatter;

impl EventFormatter for JsonFormatter {
    fn format(&mut self, event: &AgentEvent) -> Result<Vec<String>> {
        Ok(vec![serde_json::to_string(event)?])
    }
}

/// Pick a formatter by name, falling back to text.
pub fn formatter_for(format: &str) -> Box<dyn EventFormatter + Send> {
    match format.to_lowercase().as_str() {
        "json" => Box::new(JsonFormatter),
        "text" => Box::new(TextFormatter::default()),
        other => {
            tracing::warn!("Unknown output format '{}', using text", other);
            Box::new(TextFormatter::default())
        }
    }
}
