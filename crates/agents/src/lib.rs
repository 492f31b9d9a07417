//! Research and summarization agents wired over an A2A channel.
//!
//! The research agent searches a document catalog and sends the hits to the
//! summarization agent as a `papers_for_summary` request; the summarizer
//! answers with a `summary_response` under the same correlation id.

pub mod arxiv;
pub mod document;
pub mod generator;
pub mod pipeline;
pub mod research;
pub mod role;
pub mod summarization;

#[cfg(test)]
mod testing;

pub use {
    arxiv::ArxivSearch,
    document::{Document, DocumentSearch, PaperRef, PaperSummary, TextGenerator},
    generator::OpenAiCompatGenerator,
    pipeline::Pipeline,
    research::{ConversationState, ReportStatus, ResearchAgent, ResearchReport},
    role::AgentRole,
    summarization::{SummarizationAgent, summary_prompt},
};
