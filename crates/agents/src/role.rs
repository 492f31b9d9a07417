use std::sync::Arc;

use {
    async_trait::async_trait,
    courier_channel::{ChannelHandle, MessageHandler},
    courier_protocol::Message,
};

use crate::{research::ResearchAgent, summarization::SummarizationAgent};

/// The agents that can sit on the channel. Registering a role, rather than
/// an arbitrary closure, keeps the set of handlers closed.
#[derive(Clone)]
pub enum AgentRole {
    Research(Arc<ResearchAgent>),
    Summarization(Arc<SummarizationAgent>),
}

impl AgentRole {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Research(_) => "research",
            Self::Summarization(_) => "summarization",
        }
    }
}

#[async_trait]
impl MessageHandler for AgentRole {
    async fn handle(&self, message: Message, channel: &ChannelHandle) -> anyhow::Result<()> {
        match self {
            Self::Research(agent) => agent.on_message(message).await,
            Self::Summarization(agent) => agent.on_message(message, channel).await,
        }
    }
}
