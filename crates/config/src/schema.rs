/// Config schema types (channel, pipeline, catalog, generator).
use std::time::Duration;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub channel: ChannelConfig,
    pub pipeline: PipelineConfig,
    pub catalog: CatalogConfig,
    pub generator: GeneratorConfig,
}

/// What `send` does with a message whose recipient has no handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnregisteredPolicy {
    /// Return an `UnregisteredRecipient` error to the caller.
    #[default]
    Reject,
    /// Report the message as dropped and carry on.
    Drop,
}

impl UnregisteredPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "reject" | "error" => Some(Self::Reject),
            "drop" | "ignore" => Some(Self::Drop),
            _ => None,
        }
    }
}

/// Dispatch channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Capacity of the bounded ingress queue.
    pub queue_capacity: usize,
    /// Default time `request` waits for a correlated reply.
    pub request_timeout_secs: u64,
    /// Upper bound on a single handler invocation.
    pub handler_timeout_secs: u64,
    pub unregistered: UnregisteredPolicy,
    /// Consecutive handler failures before the handler is skipped; 0 turns
    /// the breaker off.
    pub circuit_breaker_threshold: u64,
    pub circuit_breaker_cooldown_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            request_timeout_secs: 60,
            handler_timeout_secs: 120,
            unregistered: UnregisteredPolicy::Reject,
            circuit_breaker_threshold: 3,
            circuit_breaker_cooldown_secs: 60,
        }
    }
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }

    pub fn circuit_breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_cooldown_secs)
    }
}

/// Research pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Name the research (producer) agent registers under.
    pub producer_name: String,
    /// Name the summarization (consumer) agent registers under.
    pub consumer_name: String,
    /// Papers fetched per query.
    pub max_results: usize,
    /// Queries run by `courier run` when none are given on the command line.
    pub queries: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            producer_name: "research_agent".into(),
            consumer_name: "summarization_agent".into(),
            max_results: 3,
            queries: vec![
                "transformer neural networks".into(),
                "quantum computing recent advances".into(),
            ],
        }
    }
}

/// Document catalog (arXiv Atom API) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            base_url: "http://export.arxiv.org/api/query".into(),
            user_agent: format!("courier/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
        }
    }
}

/// OpenAI-compatible text generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub base_url: String,
    pub model: String,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<Secret<String>>,
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

impl GeneratorConfig {
    /// Configured key, falling back to `OPENAI_API_KEY`.
    pub fn resolved_api_key(&self) -> Option<Secret<String>> {
        self.api_key
            .as_ref()
            .map(|k| k.expose_secret().clone())
            .filter(|k| !k.trim().is_empty() && !k.starts_with("${"))
            .or_else(|| {
                std::env::var("OPENAI_API_KEY")
                    .ok()
                    .filter(|k| !k.trim().is_empty())
            })
            .map(Secret::new)
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(_) => serializer.serialize_some("<redacted>"),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_demo_setup() {
        let cfg = CourierConfig::default();
        assert_eq!(cfg.pipeline.producer_name, "research_agent");
        assert_eq!(cfg.pipeline.consumer_name, "summarization_agent");
        assert_eq!(cfg.pipeline.max_results, 3);
        assert_eq!(cfg.pipeline.queries.len(), 2);
        assert_eq!(cfg.channel.unregistered, UnregisteredPolicy::Reject);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: CourierConfig = toml::from_str(
            r#"
            [channel]
            queue_capacity = 8
            unregistered = "drop"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.channel.queue_capacity, 8);
        assert_eq!(cfg.channel.unregistered, UnregisteredPolicy::Drop);
        assert_eq!(cfg.channel.request_timeout_secs, 60);
        assert_eq!(cfg.catalog.base_url, "http://export.arxiv.org/api/query");
    }

    #[test]
    fn api_key_is_redacted_when_serialized() {
        let mut cfg = CourierConfig::default();
        cfg.generator.api_key = Some(Secret::new("sk-live".into()));
        let out = toml::to_string(&cfg).unwrap();
        assert!(!out.contains("sk-live"));
        assert!(out.contains("<redacted>"));
    }

    #[test]
    fn unresolved_placeholder_key_is_ignored() {
        let cfg = GeneratorConfig {
            api_key: Some(Secret::new("${SOME_UNSET_KEY}".into())),
            ..Default::default()
        };
        if std::env::var("OPENAI_API_KEY").is_err() {
            assert!(cfg.resolved_api_key().is_none());
        }
    }

    #[test]
    fn parse_unregistered_policy_aliases() {
        assert_eq!(UnregisteredPolicy::parse("reject"), Some(UnregisteredPolicy::Reject));
        assert_eq!(UnregisteredPolicy::parse("IGNORE"), Some(UnregisteredPolicy::Drop));
        assert_eq!(UnregisteredPolicy::parse("bogus"), None);
    }
}
