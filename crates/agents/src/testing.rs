//! Collaborator doubles shared by the crate's tests.

use std::sync::{Arc, Mutex};

use {
    async_trait::async_trait,
    courier_channel::{ChannelHandle, MessageHandler},
    courier_protocol::Message,
    tokio::sync::mpsc,
};

use crate::document::{Document, DocumentSearch, TextGenerator};

pub struct FixedGenerator(pub &'static str);

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        Ok(self.0.to_string())
    }
}

pub struct FailingGenerator;

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("model unavailable")
    }
}

/// Returns the prompt's first line, which carries the title.
pub struct EchoTitleGenerator;

#[async_trait]
impl TextGenerator for EchoTitleGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        Ok(prompt.lines().next().unwrap_or_default().to_string())
    }
}

#[derive(Default)]
pub struct CapturingGenerator {
    prompts: Mutex<Vec<String>>,
}

impl CapturingGenerator {
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TextGenerator for CapturingGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        Ok("captured".into())
    }
}

pub struct StaticSearch(pub Vec<Document>);

#[async_trait]
impl DocumentSearch for StaticSearch {
    async fn search(&self, _query: &str, max_results: usize) -> anyhow::Result<Vec<Document>> {
        Ok(self.0.iter().take(max_results).cloned().collect())
    }
}

pub struct FailingSearch;

#[async_trait]
impl DocumentSearch for FailingSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> anyhow::Result<Vec<Document>> {
        anyhow::bail!("catalog unreachable")
    }
}

pub fn paper(n: usize) -> Document {
    Document {
        id: format!("p{n}"),
        title: format!("Title {n}"),
        summary: format!("Abstract {n}"),
        url: format!("u{n}"),
        authors: vec![format!("Author {n}")],
        published: "2024-01-01T00:00:00Z".into(),
    }
}

/// Forwards every message it handles to the test.
pub struct Recorder {
    tx: mpsc::UnboundedSender<Message>,
}

impl Recorder {
    pub fn pair() -> (Arc<Self>, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl MessageHandler for Recorder {
    async fn handle(&self, message: Message, _channel: &ChannelHandle) -> anyhow::Result<()> {
        let _ = self.tx.send(message);
        Ok(())
    }
}
