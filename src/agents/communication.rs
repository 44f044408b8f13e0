use crate::agents::AgentRole;
use crate::types::AgentEvent;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

const CHANNEL_CAPACITY: usize = 1000;
const MAX_HISTORY: usize = 10000;

/// Event bus for one workflow run: broadcast to listeners plus a bounded history
pub struct AgentCommunicationBus {
    /// Broadcast channel for real-time events
    event_sender: broadcast::Sender<AgentEvent>,

    /// Event history storage
    event_history: Arc<RwLock<Vec<AgentEvent>>>,
}

impl Default for AgentCommunicationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentCommunicationBus {
    pub fn new() -> Self {
        let (event_sender, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            event_sender,
            event_history: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: AgentEvent) {
        debug!("Publishing {} event from {}", event.event.kind(), event.agent);

        {
            let mut history = self.event_history.write().await;
            history.push(event.clone());

            if history.len() > MAX_HISTORY {
                history.drain(0..1000);
            }
        }

        // A run without listeners is fine
        if self.event_sender.send(event).is_err() {
            debug!("No active subscribers for event");
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_sender.subscribe()
    }

    /// Get event history filtered by agent and event kind, newest first when limited
    pub async fn get_event_history(
        &self,
        agent: Option<AgentRole>,
        kind: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<AgentEvent> {
        let history = self.event_history.read().await;

        let filtered: Vec<AgentEvent> = history
            .iter()
            .filter(|event| agent.map_or(true, |a| event.agent == a))
            .filter(|event| kind.map_or(true, |k| event.event.kind() == k))
            .cloned()
            .collect();

        if let Some(limit) = limit {
            filtered.into_iter().rev().take(limit).collect()
        } else {
            filtered
        }
    }

    /// Get communication statistics
    pub async fn get_statistics(&self) -> CommunicationStatistics {
        let history = self.event_history.read().await;

        let mut events_by_agent: HashMap<AgentRole, usize> = HashMap::new();
        let mut events_by_type: HashMap<String, usize> = HashMap::new();
        for event in history.iter() {
            *events_by_agent.entry(event.agent).or_insert(0) += 1;
            *events_by_type.entry(event.event.kind().to_string()).or_insert(0) += 1;
        }

        CommunicationStatistics {
            total_events: history.len(),
            events_by_agent,
            events_by_type,
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.event_sender.receiver_count()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommunicationStatistics {
    pub total_events: usize,
    pub events_by_agent: HashMap<AgentRole, usize>,
    pub events_by_type: HashMap<String, usize>,
}
