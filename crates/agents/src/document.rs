//! Collaborator contracts the agents depend on.

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

/// A paper returned by a [`DocumentSearch`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub published: String,
}

/// Fields of a paper carried in a `papers_for_summary` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRef {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    pub url: String,
}

impl From<&Document> for PaperRef {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            summary: doc.summary.clone(),
            url: doc.url.clone(),
        }
    }
}

/// One entry of a `summary_response` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperSummary {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub url: String,
}

/// Retrieves documents matching a free-text query.
#[async_trait]
pub trait DocumentSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> anyhow::Result<Vec<Document>>;
}

/// Produces text for a prompt.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}
