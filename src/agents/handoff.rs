use crate::agents::roles::{AgentRole, AgentSpec};
use petgraph::graphmap::DiGraphMap;
use petgraph::visit::Dfs;
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandoffError {
    #[error("root agent {0} is not registered")]
    RootNotRegistered(AgentRole),

    #[error("agent {0} is registered more than once")]
    DuplicateAgent(AgentRole),

    #[error("agent {from} may hand off to unregistered agent {to}")]
    UnknownTarget { from: AgentRole, to: AgentRole },

    #[error("agent {0} may not hand off to itself")]
    SelfHandoff(AgentRole),

    #[error("agent {0} cannot be reached from the root agent")]
    Unreachable(AgentRole),
}

/// Transition table between agents, validated when the workflow is built
#[derive(Debug, Clone)]
pub struct HandoffGraph {
    root: AgentRole,
    graph: DiGraphMap<AgentRole, ()>,
}

impl HandoffGraph {
    pub fn from_specs(root: AgentRole, agents: &[AgentSpec]) -> Result<Self, HandoffError> {
        let mut graph = DiGraphMap::new();
        let mut registered = HashSet::new();

        for agent in agents {
            if !registered.insert(agent.role) {
                return Err(HandoffError::DuplicateAgent(agent.role));
            }
            graph.add_node(agent.role);
        }

        if !registered.contains(&root) {
            return Err(HandoffError::RootNotRegistered(root));
        }

        for agent in agents {
            for &target in &agent.can_handoff_to {
                if target == agent.role {
                    return Err(HandoffError::SelfHandoff(agent.role));
                }
                if !registered.contains(&target) {
                    return Err(HandoffError::UnknownTarget {
                        from: agent.role,
                        to: target,
                    });
                }
                graph.add_edge(agent.role, target, ());
            }
        }

        let mut reached = HashSet::new();
        let mut dfs = Dfs::new(&graph, root);
        while let Some(role) = dfs.next(&graph) {
            reached.insert(role);
        }

        // Report in registration order so the error is deterministic
        if let Some(agent) = agents.iter().find(|a| !reached.contains(&a.role)) {
            return Err(HandoffError::Unreachable(agent.role));
        }

        Ok(Self { root, graph })
    }

    pub fn root(&self) -> AgentRole {
        self.root
    }

    pub fn can_handoff(&self, from: AgentRole, to: AgentRole) -> bool {
        self.graph.contains_edge(from, to)
    }

    pub fn targets(&self, from: AgentRole) -> Vec<AgentRole> {
        let mut targets: Vec<_> = self.graph.neighbors(from).collect();
        targets.sort();
        targets
    }

    pub fn agent_count(&self) -> usize {
        self.graph.node_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::create_agents;
    use crate::github::MockGitHubApi;
    use crate::tools::GithubTools;
    use std::sync::Arc;

    fn spec(role: AgentRole, can_handoff_to: Vec<AgentRole>) -> AgentSpec {
        AgentSpec {
            role,
            description: String::new(),
            system_prompt: String::new(),
            tools: vec![],
            can_handoff_to,
        }
    }

    #[test]
    fn test_default_agents_validate() {
        let tools = GithubTools::new(Arc::new(MockGitHubApi::new()));
        let graph = HandoffGraph::from_specs(AgentRole::ReviewAndPosting, &create_agents(&tools)).unwrap();

        assert_eq!(graph.root(), AgentRole::ReviewAndPosting);
        assert_eq!(graph.agent_count(), 3);
        assert!(graph.can_handoff(AgentRole::Context, AgentRole::ReviewAndPosting));
        assert!(graph.can_handoff(AgentRole::Commentor, AgentRole::Context));
        assert!(!graph.can_handoff(AgentRole::ReviewAndPosting, AgentRole::Context));
        assert_eq!(
            graph.targets(AgentRole::Context),
            vec![AgentRole::Commentor, AgentRole::ReviewAndPosting]
        );
    }

    #[test]
    fn test_missing_root() {
        let agents = vec![spec(AgentRole::Context, vec![])];
        assert_eq!(
            HandoffGraph::from_specs(AgentRole::ReviewAndPosting, &agents).unwrap_err(),
            HandoffError::RootNotRegistered(AgentRole::ReviewAndPosting)
        );
    }

    #[test]
    fn test_duplicate_agent() {
        let agents = vec![spec(AgentRole::Context, vec![]), spec(AgentRole::Context, vec![])];
        assert_eq!(
            HandoffGraph::from_specs(AgentRole::Context, &agents).unwrap_err(),
            HandoffError::DuplicateAgent(AgentRole::Context)
        );
    }

    #[test]
    fn test_unknown_target() {
        let agents = vec![spec(AgentRole::ReviewAndPosting, vec![AgentRole::Commentor])];
        assert_eq!(
            HandoffGraph::from_specs(AgentRole::ReviewAndPosting, &agents).unwrap_err(),
            HandoffError::UnknownTarget {
                from: AgentRole::ReviewAndPosting,
                to: AgentRole::Commentor
            }
        );
    }

    #[test]
    fn test_self_handoff() {
        let agents = vec![spec(AgentRole::Commentor, vec![AgentRole::Commentor])];
        assert_eq!(
            HandoffGraph::from_specs(AgentRole::Commentor, &agents).unwrap_err(),
            HandoffError::SelfHandoff(AgentRole::Commentor)
        );
    }

    #[test]
    fn test_unreachable_agent() {
        let agents = vec![
            spec(AgentRole::ReviewAndPosting, vec![AgentRole::Commentor]),
            spec(AgentRole::Commentor, vec![AgentRole::ReviewAndPosting]),
            spec(AgentRole::Context, vec![AgentRole::Commentor]),
        ];
        assert_eq!(
            HandoffGraph::from_specs(AgentRole::ReviewAndPosting, &agents).unwrap_err(),
            HandoffError::Unreachable(AgentRole::Context)
        );
    }
}
