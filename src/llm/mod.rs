pub mod providers;
pub mod prompts;
pub mod interfaces;

pub use providers::{LLMProvider, LLMProviderFactory, OpenAIProvider};
pub use prompts::{PromptTemplate, AgentPrompts};
pub use interfaces::{LLMConfig, LLMInterface, LLMRequest, LLMResponse, Message, MessageRole, Model, Tool, ToolCall};

#[cfg(test)]
pub use interfaces::MockLLMInterface;
