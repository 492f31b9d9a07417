//! Semantic checks on a loaded configuration.

use crate::schema::CourierConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "channel.queue_capacity"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn error(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            path: path.into(),
            message: message.into(),
        }
    }

    fn warning(path: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

pub fn validate(config: &CourierConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let channel = &config.channel;
    let pipeline = &config.pipeline;

    if channel.queue_capacity == 0 {
        diagnostics.push(Diagnostic::error(
            "channel.queue_capacity",
            "must be at least 1",
        ));
    }
    if channel.request_timeout_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "channel.request_timeout_secs",
            "must be at least 1",
        ));
    }
    if channel.handler_timeout_secs == 0 {
        diagnostics.push(Diagnostic::error(
            "channel.handler_timeout_secs",
            "must be at least 1",
        ));
    }
    if channel.circuit_breaker_threshold == 0 {
        diagnostics.push(Diagnostic::warning(
            "channel.circuit_breaker_threshold",
            "0 turns the circuit breaker off; failing handlers keep receiving messages",
        ));
    }
    if channel.request_timeout_secs > channel.handler_timeout_secs {
        diagnostics.push(Diagnostic::warning(
            "channel.request_timeout_secs",
            "exceeds handler_timeout_secs; requests outlive the handlers serving them",
        ));
    }

    for (path, name) in [
        ("pipeline.producer_name", &pipeline.producer_name),
        ("pipeline.consumer_name", &pipeline.consumer_name),
    ] {
        if name.trim().is_empty() {
            diagnostics.push(Diagnostic::error(path, "agent name must not be empty"));
        }
    }
    if pipeline.producer_name == pipeline.consumer_name {
        diagnostics.push(Diagnostic::error(
            "pipeline.consumer_name",
            "producer and consumer must register under different names",
        ));
    }
    if pipeline.max_results == 0 {
        diagnostics.push(Diagnostic::warning(
            "pipeline.max_results",
            "0 means every query finds no papers",
        ));
    }
    if pipeline.queries.is_empty() {
        diagnostics.push(Diagnostic::warning(
            "pipeline.queries",
            "no default queries; `courier run` needs --query",
        ));
    }

    if config.generator.resolved_api_key().is_none() {
        diagnostics.push(Diagnostic::warning(
            "generator.api_key",
            "no API key configured and OPENAI_API_KEY is unset",
        ));
    }

    ValidationResult { diagnostics }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_no_errors() {
        assert!(!validate(&CourierConfig::default()).has_errors());
    }

    #[test]
    fn zero_capacity_is_an_error() {
        let mut cfg = CourierConfig::default();
        cfg.channel.queue_capacity = 0;
        let result = validate(&cfg);
        assert!(result.has_errors());
        assert!(
            result
                .diagnostics
                .iter()
                .any(|d| d.path == "channel.queue_capacity")
        );
    }

    #[test]
    fn same_producer_and_consumer_is_an_error() {
        let mut cfg = CourierConfig::default();
        cfg.pipeline.consumer_name = cfg.pipeline.producer_name.clone();
        assert!(validate(&cfg).has_errors());
    }

    #[test]
    fn empty_queries_is_only_a_warning() {
        let mut cfg = CourierConfig::default();
        cfg.pipeline.queries.clear();
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert!(result.count(Severity::Warning) >= 1);
    }
}
