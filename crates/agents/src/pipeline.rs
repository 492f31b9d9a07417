use std::sync::Arc;

use {
    courier_channel::{A2aChannel, ChannelHandle, ShutdownMode, ShutdownReport},
    courier_config::CourierConfig,
    courier_protocol::AgentName,
    tracing::info,
};

use crate::{
    arxiv::ArxivSearch,
    document::{DocumentSearch, TextGenerator},
    generator::OpenAiCompatGenerator,
    research::{ResearchAgent, ResearchReport},
    role::AgentRole,
    summarization::SummarizationAgent,
};

/// A channel with the research and summarization agents registered on it.
pub struct Pipeline {
    channel: A2aChannel,
    research: Arc<ResearchAgent>,
}

impl Pipeline {
    /// Start a pipeline backed by the arXiv catalog and the configured
    /// completion endpoint.
    pub fn from_config(config: &CourierConfig) -> anyhow::Result<Self> {
        Self::start(
            config,
            Arc::new(ArxivSearch::new(&config.catalog)),
            Arc::new(OpenAiCompatGenerator::new(&config.generator)),
        )
    }

    pub fn start(
        config: &CourierConfig,
        search: Arc<dyn DocumentSearch>,
        generator: Arc<dyn TextGenerator>,
    ) -> anyhow::Result<Self> {
        let producer = AgentName::new(config.pipeline.producer_name.as_str())?;
        let consumer = AgentName::new(config.pipeline.consumer_name.as_str())?;
        if producer == consumer {
            anyhow::bail!("producer and consumer cannot share the name '{producer}'");
        }

        let research = Arc::new(ResearchAgent::new(
            producer.clone(),
            consumer.clone(),
            search,
            config.pipeline.max_results,
        ));
        let summarizer = Arc::new(SummarizationAgent::new(generator));

        let channel = A2aChannel::start(config.channel.clone());
        for (name, role) in [
            (producer, AgentRole::Research(Arc::clone(&research))),
            (consumer, AgentRole::Summarization(summarizer)),
        ] {
            info!(agent = %name, role = role.label(), "registering agent");
            channel.register_handler(name, Arc::new(role))?;
        }

        Ok(Self { channel, research })
    }

    pub async fn run_query(&self, query: &str) -> ResearchReport {
        self.research
            .process_query(&self.channel.handle(), query)
            .await
    }

    pub fn research(&self) -> &ResearchAgent {
        &self.research
    }

    pub fn channel(&self) -> ChannelHandle {
        self.channel.handle()
    }

    pub async fn shutdown(self, mode: ShutdownMode) -> ShutdownReport {
        self.channel.shutdown(mode).await
    }
}
