pub mod roles;
pub mod handoff;
pub mod communication;
pub mod workflow;

pub use roles::{create_agents, AgentRole, AgentSpec};
pub use handoff::{HandoffError, HandoffGraph};
pub use communication::AgentCommunicationBus;
pub use workflow::{AgentWorkflow, WorkflowConfig, WorkflowError, WorkflowHandler, WorkflowOutcome};
