//! The consumer side of the pipeline: turns `papers_for_summary` requests
//! into `summary_response` replies.

use std::sync::Arc;

use {
    courier_channel::ChannelHandle,
    courier_protocol::{Message, Payload, kinds},
    futures::future::join_all,
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::document::{PaperRef, PaperSummary, TextGenerator};

pub struct SummarizationAgent {
    generator: Arc<dyn TextGenerator>,
}

impl SummarizationAgent {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    pub(crate) async fn on_message(
        &self,
        message: Message,
        channel: &ChannelHandle,
    ) -> anyhow::Result<()> {
        if !message.is_kind(kinds::PAPERS_FOR_SUMMARY) {
            debug!(
                agent = %message.recipient(),
                kind = message.kind(),
                "ignoring message kind"
            );
            return Ok(());
        }

        let papers = papers_from_payload(message.payload());
        let summaries = self.summarize(&papers).await;
        info!(
            agent = %message.recipient(),
            correlation_id = %message.correlation_id(),
            papers = papers.len(),
            "summaries generated"
        );

        let payload = Payload::new().with("summaries", &summaries)?;
        let reply = message.reply(kinds::SUMMARY_RESPONSE, payload)?;
        channel.send(reply).await?;
        Ok(())
    }

    /// Summarize each paper, keeping input order. A paper whose generation
    /// fails gets an empty summary.
    pub async fn summarize(&self, papers: &[PaperRef]) -> Vec<PaperSummary> {
        join_all(papers.iter().map(|paper| self.summarize_one(paper))).await
    }

    async fn summarize_one(&self, paper: &PaperRef) -> PaperSummary {
        let summary = match self.generator.generate(&summary_prompt(paper)).await {
            Ok(text) => text,
            Err(e) => {
                warn!(paper_id = %paper.id, error = %e, "summary generation failed");
                String::new()
            },
        };
        PaperSummary {
            id: paper.id.clone(),
            title: paper.title.clone(),
            summary,
            url: paper.url.clone(),
        }
    }
}

pub fn summary_prompt(paper: &PaperRef) -> String {
    format!(
        "Paper Title: {}\nOriginal Abstract: {}\n\n\
         Generate a concise summary (2-3 sentences) highlighting the main contribution and findings.\n\
         Focus on key innovations and practical implications.",
        paper.title, paper.summary
    )
}

/// Papers listed under `papers`. Items missing a required field are skipped.
fn papers_from_payload(payload: &Payload) -> Vec<PaperRef> {
    let Some(items) = payload.get("papers").and_then(Value::as_array) else {
        debug!("request carries no paper list");
        return Vec::new();
    };
    items
        .iter()
        .enumerate()
        .filter_map(
            |(index, item)| match serde_json::from_value::<PaperRef>(item.clone()) {
                Ok(paper) => Some(paper),
                Err(e) => {
                    warn!(index, error = %e, "skipping malformed paper");
                    None
                },
            },
        )
        .collect()
}
