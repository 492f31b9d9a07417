//! The producer side of the pipeline: searches for papers and asks the
//! summarizer to condense them.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use {
    anyhow::Context,
    courier_channel::ChannelHandle,
    courier_protocol::{AgentName, CorrelationId, Message, Payload, kinds},
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::document::{Document, DocumentSearch, PaperRef, PaperSummary};

/// Where a producer-side conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Requested,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportStatus {
    /// The search returned nothing; no request was sent.
    NoPapers,
    Completed,
    /// Papers were found but no summaries came back.
    Degraded { reason: String },
}

/// Outcome of running one query through the pipeline.
#[derive(Debug, Clone)]
pub struct ResearchReport {
    pub query: String,
    pub correlation_id: Option<CorrelationId>,
    pub papers: Vec<Document>,
    pub summaries: Vec<PaperSummary>,
    pub status: ReportStatus,
}

impl ResearchReport {
    fn no_papers(query: &str) -> Self {
        Self {
            query: query.to_string(),
            correlation_id: None,
            papers: Vec::new(),
            summaries: Vec::new(),
            status: ReportStatus::NoPapers,
        }
    }
}

/// Conversations remembered per agent before the oldest are forgotten.
pub const DEFAULT_HISTORY_LIMIT: usize = 128;

struct Conversation {
    state: ConversationState,
    summaries: Vec<PaperSummary>,
}

/// Conversation table that forgets its oldest entries past `limit`.
struct Conversations {
    by_id: HashMap<CorrelationId, Conversation>,
    order: VecDeque<CorrelationId>,
    limit: usize,
}

impl Conversations {
    fn new(limit: usize) -> Self {
        Self {
            by_id: HashMap::new(),
            order: VecDeque::new(),
            limit: limit.max(1),
        }
    }

    fn insert(&mut self, id: CorrelationId, conversation: Conversation) {
        if self.by_id.insert(id.clone(), conversation).is_none() {
            self.order.push_back(id);
        }
        while self.order.len() > self.limit {
            if let Some(oldest) = self.order.pop_front() {
                self.by_id.remove(&oldest);
            }
        }
    }

    fn get(&self, id: &CorrelationId) -> Option<&Conversation> {
        self.by_id.get(id)
    }
}

pub struct ResearchAgent {
    name: AgentName,
    consumer: AgentName,
    search: Arc<dyn DocumentSearch>,
    max_results: usize,
    conversations: Mutex<Conversations>,
}

impl ResearchAgent {
    pub fn new(
        name: AgentName,
        consumer: AgentName,
        search: Arc<dyn DocumentSearch>,
        max_results: usize,
    ) -> Self {
        Self {
            name,
            consumer,
            search,
            max_results,
            conversations: Mutex::new(Conversations::new(DEFAULT_HISTORY_LIMIT)),
        }
    }

    /// Keep at most `limit` conversations; older ones are forgotten.
    #[must_use]
    pub fn with_history_limit(self, limit: usize) -> Self {
        Self {
            conversations: Mutex::new(Conversations::new(limit)),
            ..self
        }
    }

    pub fn name(&self) -> &AgentName {
        &self.name
    }

    /// Search for `query`, send the hits to the summarizer, and wait for its
    /// reply. Collaborator and channel failures degrade the report instead of
    /// failing the call.
    pub async fn process_query(&self, channel: &ChannelHandle, query: &str) -> ResearchReport {
        let papers = match self.search.search(query, self.max_results).await {
            Ok(papers) => papers,
            Err(e) => {
                warn!(agent = %self.name, query, error = %e, "document search failed");
                Vec::new()
            },
        };
        if papers.is_empty() {
            info!(agent = %self.name, query, "no papers found");
            return ResearchReport::no_papers(query);
        }

        let correlation_id = CorrelationId::generate();
        let mut report = ResearchReport {
            query: query.to_string(),
            correlation_id: Some(correlation_id.clone()),
            papers,
            summaries: Vec::new(),
            status: ReportStatus::Completed,
        };

        let request = match self.summary_request(query, &report.papers, &correlation_id) {
            Ok(request) => request,
            Err(e) => {
                report.status = ReportStatus::Degraded {
                    reason: format!("{e:#}"),
                };
                return report;
            },
        };

        self.set_state(&correlation_id, ConversationState::Requested);
        info!(
            agent = %self.name,
            consumer = %self.consumer,
            %correlation_id,
            papers = report.papers.len(),
            "requesting summaries"
        );

        let outcome = match channel.request(request, kinds::SUMMARY_RESPONSE).await {
            Ok(reply) => self.accept_reply(&reply),
            Err(e) => Err(anyhow::Error::new(e)),
        };
        match outcome {
            Ok(summaries) => report.summaries = summaries,
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(
                    agent = %self.name,
                    %correlation_id,
                    error = %reason,
                    "summary request failed"
                );
                report.status = ReportStatus::Degraded { reason };
            },
        }
        report
    }

    /// Handles replies that arrive outside a waiting request, e.g. after it
    /// timed out.
    pub(crate) async fn on_message(&self, message: Message) -> anyhow::Result<()> {
        if !message.is_kind(kinds::SUMMARY_RESPONSE) {
            debug!(agent = %self.name, kind = message.kind(), "ignoring message kind");
            return Ok(());
        }
        let summaries = self.accept_reply(&message)?;
        info!(
            agent = %self.name,
            correlation_id = %message.correlation_id(),
            summaries = summaries.len(),
            "late summary response recorded"
        );
        Ok(())
    }

    pub fn conversation_state(&self, id: &CorrelationId) -> Option<ConversationState> {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .map(|c| c.state)
    }

    /// Summaries received for a completed conversation.
    pub fn summaries(&self, id: &CorrelationId) -> Option<Vec<PaperSummary>> {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .filter(|c| c.state == ConversationState::Completed)
            .map(|c| c.summaries.clone())
    }

    fn summary_request(
        &self,
        query: &str,
        papers: &[Document],
        correlation_id: &CorrelationId,
    ) -> anyhow::Result<Message> {
        let papers: Vec<PaperRef> = papers.iter().map(PaperRef::from).collect();
        let payload = Payload::new()
            .with("query", query)?
            .with("papers", &papers)?;
        Ok(Message::new(
            self.name.clone(),
            self.consumer.clone(),
            kinds::PAPERS_FOR_SUMMARY,
            payload,
            correlation_id.clone(),
        )?)
    }

    fn accept_reply(&self, reply: &Message) -> anyhow::Result<Vec<PaperSummary>> {
        if !reply.is_kind(kinds::SUMMARY_RESPONSE) {
            anyhow::bail!("unexpected reply kind '{}'", reply.kind());
        }
        let summaries = summaries_from_payload(reply.payload())?;
        let mut conversations = self.conversations.lock().unwrap_or_else(|e| e.into_inner());
        conversations.insert(reply.correlation_id().clone(), Conversation {
            state: ConversationState::Completed,
            summaries: summaries.clone(),
        });
        Ok(summaries)
    }

    fn set_state(&self, id: &CorrelationId, state: ConversationState) {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), Conversation {
                state,
                summaries: Vec::new(),
            });
    }
}

fn summaries_from_payload(payload: &Payload) -> anyhow::Result<Vec<PaperSummary>> {
    let value = payload
        .get("summaries")
        .cloned()
        .unwrap_or(Value::Array(Vec::new()));
    serde_json::from_value(value).context("malformed summary_response payload")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{role::AgentRole, summarization::SummarizationAgent, testing::*},
        courier_channel::{A2aChannel, ShutdownMode},
        courier_config::ChannelConfig,
        serde_json::json,
        std::time::Duration,
    };

    fn agent(search: Arc<dyn DocumentSearch>) -> Arc<ResearchAgent> {
        Arc::new(ResearchAgent::new(
            AgentName::new("research_agent").unwrap(),
            AgentName::new("summarization_agent").unwrap(),
            search,
            3,
        ))
    }

    fn wire(channel: &A2aChannel, research: &Arc<ResearchAgent>) {
        channel
            .register_handler(
                "research_agent",
                Arc::new(AgentRole::Research(Arc::clone(research))),
            )
            .unwrap();
        let summarizer = Arc::new(SummarizationAgent::new(Arc::new(FixedGenerator("short"))));
        channel
            .register_handler(
                "summarization_agent",
                Arc::new(AgentRole::Summarization(summarizer)),
            )
            .unwrap();
    }

    #[tokio::test]
    async fn completed_query_returns_summaries() {
        let channel = A2aChannel::start(ChannelConfig::default());
        let research = agent(Arc::new(StaticSearch((1..=5).map(paper).collect())));
        wire(&channel, &research);

        let report = research
            .process_query(&channel.handle(), "transformer neural networks")
            .await;

        assert_eq!(report.status, ReportStatus::Completed);
        assert_eq!(report.papers.len(), 3);
        assert_eq!(report.summaries.len(), 3);
        assert_eq!(report.summaries[0].id, "p1");
        assert_eq!(report.summaries[0].summary, "short");

        let id = report.correlation_id.unwrap();
        assert_eq!(
            research.conversation_state(&id),
            Some(ConversationState::Completed)
        );
        assert_eq!(research.summaries(&id).unwrap().len(), 3);
        channel.shutdown(ShutdownMode::Drain).await;
    }

    #[tokio::test]
    async fn no_papers_sends_nothing() {
        let channel = A2aChannel::start(ChannelConfig::default());
        let research = agent(Arc::new(StaticSearch(Vec::new())));
        wire(&channel, &research);

        let report = research.process_query(&channel.handle(), "nothing").await;

        assert_eq!(report.status, ReportStatus::NoPapers);
        assert!(report.correlation_id.is_none());
        let stats = channel.shutdown(ShutdownMode::Drain).await.stats;
        assert_eq!(stats.enqueued, 0);
    }

    #[tokio::test]
    async fn search_failure_counts_as_no_papers() {
        let channel = A2aChannel::start(ChannelConfig::default());
        let research = agent(Arc::new(FailingSearch));
        wire(&channel, &research);

        let report = research.process_query(&channel.handle(), "q").await;
        assert_eq!(report.status, ReportStatus::NoPapers);
    }

    #[tokio::test]
    async fn missing_consumer_degrades_report() {
        let channel = A2aChannel::start(ChannelConfig::default());
        let research = agent(Arc::new(StaticSearch(vec![paper(1)])));

        let report = research.process_query(&channel.handle(), "q").await;

        assert!(matches!(report.status, ReportStatus::Degraded { .. }));
        assert_eq!(report.papers.len(), 1);
        assert!(report.summaries.is_empty());
        let id = report.correlation_id.unwrap();
        assert_eq!(
            research.conversation_state(&id),
            Some(ConversationState::Requested)
        );
    }

    #[tokio::test]
    async fn silent_consumer_times_out_then_late_reply_completes() {
        let channel = A2aChannel::start(ChannelConfig {
            request_timeout_secs: 1,
            ..ChannelConfig::default()
        });
        let research = agent(Arc::new(StaticSearch(vec![paper(1)])));
        channel
            .register_handler(
                "research_agent",
                Arc::new(AgentRole::Research(Arc::clone(&research))),
            )
            .unwrap();
        let (recorder, mut requests) = Recorder::pair();
        channel
            .register_handler("summarization_agent", recorder)
            .unwrap();

        let report = research.process_query(&channel.handle(), "q").await;
        assert!(matches!(report.status, ReportStatus::Degraded { .. }));

        // The reply turns up after the request gave up.
        let request = tokio::time::timeout(Duration::from_secs(5), requests.recv())
            .await
            .unwrap()
            .unwrap();
        let late = request
            .reply(
                kinds::SUMMARY_RESPONSE,
                Payload::try_from(json!({
                    "summaries": [{ "id": "p1", "title": "Title 1", "summary": "late", "url": "u1" }]
                }))
                .unwrap(),
            )
            .unwrap();
        channel.send(late).await.unwrap();
        channel.shutdown(ShutdownMode::Drain).await;

        let id = report.correlation_id.unwrap();
        assert_eq!(
            research.conversation_state(&id),
            Some(ConversationState::Completed)
        );
        assert_eq!(research.summaries(&id).unwrap()[0].summary, "late");
    }

    #[tokio::test]
    async fn request_payload_lists_papers() {
        let channel = A2aChannel::start(ChannelConfig {
            request_timeout_secs: 1,
            ..ChannelConfig::default()
        });
        let research = agent(Arc::new(StaticSearch(vec![paper(1)])));
        let (recorder, mut requests) = Recorder::pair();
        channel
            .register_handler("summarization_agent", recorder)
            .unwrap();

        let handle = channel.handle();
        let running = {
            let research = Arc::clone(&research);
            tokio::spawn(async move { research.process_query(&handle, "quantum").await })
        };

        let request = tokio::time::timeout(Duration::from_secs(5), requests.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.kind(), kinds::PAPERS_FOR_SUMMARY);
        assert_eq!(request.sender().as_str(), "research_agent");
        assert_eq!(
            request.payload().clone().into_value(),
            json!({
                "query": "quantum",
                "papers": [{ "id": "p1", "title": "Title 1", "summary": "Abstract 1", "url": "u1" }]
            })
        );
        running.await.unwrap();
    }

    #[tokio::test]
    async fn other_kinds_are_ignored() {
        let research = agent(Arc::new(StaticSearch(Vec::new())));
        let ping =
            Message::new("summarization_agent", "research_agent", "ping", Payload::new(), "x")
                .unwrap();
        research.on_message(ping).await.unwrap();
        assert!(
            research
                .conversation_state(&CorrelationId::new("x"))
                .is_none()
        );
    }

    #[tokio::test]
    async fn malformed_summary_response_is_an_error() {
        let research = agent(Arc::new(StaticSearch(Vec::new())));
        let bad = Message::new(
            "summarization_agent",
            "research_agent",
            kinds::SUMMARY_RESPONSE,
            Payload::new().with("summaries", "nope").unwrap(),
            "x",
        )
        .unwrap();
        assert!(research.on_message(bad).await.is_err());
    }

    #[tokio::test]
    async fn oldest_conversations_are_forgotten() {
        let research = Arc::new(
            ResearchAgent::new(
                AgentName::new("research_agent").unwrap(),
                AgentName::new("summarization_agent").unwrap(),
                Arc::new(StaticSearch(Vec::new())),
                3,
            )
            .with_history_limit(2),
        );
        for id in ["c1", "c2", "c3"] {
            let reply = Message::new(
                "summarization_agent",
                "research_agent",
                kinds::SUMMARY_RESPONSE,
                Payload::new().with("summaries", &json!([])).unwrap(),
                id,
            )
            .unwrap();
            research.on_message(reply).await.unwrap();
        }

        assert!(research.conversation_state(&CorrelationId::new("c1")).is_none());
        for id in ["c2", "c3"] {
            assert_eq!(
                research.conversation_state(&CorrelationId::new(id)),
                Some(ConversationState::Completed)
            );
        }
    }
}
