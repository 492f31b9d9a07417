//! Text generation against an OpenAI-compatible `chat/completions` endpoint.

use std::time::Duration;

use {
    anyhow::{Context, bail},
    async_trait::async_trait,
    courier_config::GeneratorConfig,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, warn},
};

use crate::document::TextGenerator;

pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<Secret<String>>,
    timeout: Duration,
}

impl OpenAiCompatGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.resolved_api_key(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatGenerator {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        debug!(model = %self.model, prompt_len = prompt.len(), "chat completion request");

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(self.timeout)
            .header("content-type", "application/json");
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key.expose_secret()));
        }

        let http_resp = req.json(&body).send().await?;
        let status = http_resp.status();
        if !status.is_success() {
            let body_text = http_resp.text().await.unwrap_or_default();
            warn!(status = %status, model = %self.model, body = %body_text, "completion API error");
            bail!("completion API returned HTTP {status}");
        }

        let resp: serde_json::Value = http_resp.json().await?;
        let text = resp["choices"][0]["message"]["content"]
            .as_str()
            .context("completion response has no message content")?;
        Ok(text.trim().to_string())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, mockito::Matcher};

    fn config(base_url: String, key: Option<&str>) -> GeneratorConfig {
        GeneratorConfig {
            base_url,
            model: "test-model".into(),
            api_key: key.map(|k| Secret::new(k.to_string())),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn returns_first_choice_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "test-model",
                "messages": [{ "role": "user", "content": "Summarize this" }],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"choices":[{"message":{"role":"assistant","content":"  A short summary. "}}]}"#,
            )
            .create_async()
            .await;

        let generator =
            OpenAiCompatGenerator::new(&config(format!("{}/v1/", server.url()), Some("sk-test")));
        let text = generator.generate("Summarize this").await.unwrap();

        mock.assert_async().await;
        assert_eq!(text, "A short summary.");
    }

    #[tokio::test]
    async fn error_status_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(401)
            .with_body(r#"{"error":{"message":"bad key"}}"#)
            .create_async()
            .await;

        let generator =
            OpenAiCompatGenerator::new(&config(format!("{}/v1", server.url()), Some("sk-bad")));
        let err = generator.generate("x").await.unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn missing_content_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let generator =
            OpenAiCompatGenerator::new(&config(format!("{}/v1", server.url()), Some("sk-test")));
        assert!(generator.generate("x").await.is_err());
    }
}
