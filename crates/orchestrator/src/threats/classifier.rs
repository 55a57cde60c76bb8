#![forbid(unsafe_code)]

//! Severity classification of raw event descriptions.
//!
//! [`ConfiguredClassifier`] picks a variant on every call from the live
//! settings: [`RemoteClassifier`] when an API key is configured, otherwise
//! [`OfflineClassifier`]. Reloading the settings flips the choice without a
//! restart.

use crate::error::Error;
use crate::threats::Severity;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use tracing::trace;

/// Longest explanation kept from a classifier reply, in characters.
pub const MAX_EXPLANATION_CHARS: usize = 1500;

const SYSTEM_PROMPT: &str = "You are a concise security analyst.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    Local,
    Remote,
}

impl Analyzer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub severity: Severity,
    pub explanation: Option<String>,
    /// Address named by the classifier, if it supplied a well-formed one.
    pub ip: Option<Ipv4Addr>,
    pub analyzer: Analyzer,
}

impl Verdict {
    /// The default classification: `info`, no explanation.
    pub fn local() -> Self {
        Self {
            severity: Severity::Info,
            explanation: None,
            ip: None,
            analyzer: Analyzer::Local,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, message: &str) -> Result<Verdict, Error>;

    /// Apply reloaded settings. Classifiers without settings ignore this.
    fn reconfigure(&self, _settings: &config::Classifier) {}
}

#[derive(Debug, Default)]
pub struct OfflineClassifier;

#[async_trait]
impl Classifier for OfflineClassifier {
    async fn classify(&self, _message: &str) -> Result<Verdict, Error> {
        Ok(Verdict::local())
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Chat-completions endpoint classifier.
pub struct RemoteClassifier {
    client: reqwest::Client,
    settings: config::Classifier,
    api_key: String,
}

impl RemoteClassifier {
    pub fn new(client: reqwest::Client, settings: config::Classifier, api_key: String) -> Self {
        Self {
            client,
            settings,
            api_key,
        }
    }

    fn prompt(message: &str) -> String {
        format!(
            "You are a network security assistant on a router. Classify the following event by \
             severity (low, medium, high, critical), explain briefly why it's suspicious, and \
             extract any suspicious IP if present as JSON fields: {{severity, explanation, ip}}.\n\n\
             Event: {message}\n"
        )
    }
}

#[async_trait]
impl Classifier for RemoteClassifier {
    async fn classify(&self, message: &str) -> Result<Verdict, Error> {
        let url = format!(
            "{}/chat/completions",
            self.settings.api_base.trim_end_matches('/')
        );
        let prompt = Self::prompt(message);
        let request = ChatRequest {
            model: &self.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
            temperature: 0.0,
        };

        let response: ChatResponse = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .timeout(self.settings.timeout)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| Error::Classifier("reply carried no content".into()))?;
        trace!(len = text.len(), "classifier replied");
        Ok(parse_verdict(&text))
    }
}

#[derive(Debug, Deserialize)]
struct VerdictFields {
    #[serde(default)]
    severity: Option<serde_json::Value>,
    #[serde(default)]
    explanation: Option<serde_json::Value>,
    #[serde(default)]
    ip: Option<serde_json::Value>,
}

/// Interpret a free-text classifier reply.
///
/// Keywords in the text give a first severity; a JSON object embedded in the
/// reply, if any, overrides severity, explanation and address field by field.
pub fn parse_verdict(text: &str) -> Verdict {
    let explanation = truncate(text.trim());
    let lowered = explanation.to_lowercase();
    let severity = if ["critical", "severe", "urgent"]
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        Severity::Critical
    } else if lowered.contains("high") {
        Severity::High
    } else if lowered.contains("medium") {
        Severity::Medium
    } else {
        Severity::Low
    };

    let mut verdict = Verdict {
        severity,
        explanation: Some(explanation),
        ip: None,
        analyzer: Analyzer::Remote,
    };

    let Some(fields) = embedded_object(text) else {
        return verdict;
    };
    if let Some(severity) = fields
        .severity
        .as_ref()
        .map(value_text)
        .and_then(|s| s.parse().ok())
    {
        verdict.severity = severity;
    }
    if let Some(explanation) = fields
        .explanation
        .as_ref()
        .map(value_text)
        .filter(|e| !e.is_empty())
    {
        verdict.explanation = Some(truncate(&explanation));
    }
    verdict.ip = fields
        .ip
        .as_ref()
        .map(value_text)
        .and_then(|ip| ip.trim().parse().ok());
    verdict
}

fn embedded_object(text: &str) -> Option<VerdictFields> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_EXPLANATION_CHARS).collect()
}

/// Chooses between the remote and offline classifier on every call.
pub struct ConfiguredClassifier {
    settings: RwLock<config::Classifier>,
    client: reqwest::Client,
}

impl ConfiguredClassifier {
    pub fn new(settings: config::Classifier) -> Result<Self, Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            settings: RwLock::new(settings),
            client,
        })
    }

    pub fn is_remote(&self) -> bool {
        self.settings.read().credential().is_some()
    }
}

#[async_trait]
impl Classifier for ConfiguredClassifier {
    async fn classify(&self, message: &str) -> Result<Verdict, Error> {
        let settings = self.settings.read().clone();
        let api_key = settings.credential().map(str::to_owned);
        match api_key {
            Some(api_key) => {
                RemoteClassifier::new(self.client.clone(), settings, api_key)
                    .classify(message)
                    .await
            }
            None => OfflineClassifier.classify(message).await,
        }
    }

    /// Swap the live settings; the next call sees them.
    fn reconfigure(&self, settings: &config::Classifier) {
        *self.settings.write() = settings.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keywords_drive_severity_without_json() {
        assert_eq!(parse_verdict("This is an URGENT matter").severity, Severity::Critical);
        assert_eq!(parse_verdict("high volume of SYNs").severity, Severity::High);
        assert_eq!(parse_verdict("Medium risk").severity, Severity::Medium);
        assert_eq!(parse_verdict("looks benign").severity, Severity::Low);
    }

    #[test]
    fn embedded_json_overrides_fields() {
        let reply = r#"Assessment follows. {"severity": "High", "explanation": "port scan", "ip": "203.0.113.9"} critical"#;
        let verdict = parse_verdict(reply);
        assert_eq!(verdict.severity, Severity::High);
        assert_eq!(verdict.explanation.as_deref(), Some("port scan"));
        assert_eq!(verdict.ip, Some(Ipv4Addr::new(203, 0, 113, 9)));
        assert_eq!(verdict.analyzer, Analyzer::Remote);
    }

    #[test]
    fn malformed_ip_field_is_ignored() {
        let verdict = parse_verdict(r#"{"severity": "low", "ip": "not-an-ip"}"#);
        assert_eq!(verdict.ip, None);
        assert_eq!(verdict.severity, Severity::Low);
    }

    #[test]
    fn explanation_is_truncated() {
        let reply = "x".repeat(MAX_EXPLANATION_CHARS + 100);
        let explanation = parse_verdict(&reply).explanation.unwrap();
        assert_eq!(explanation.chars().count(), MAX_EXPLANATION_CHARS);
    }

    #[tokio::test]
    async fn blank_key_selects_offline() {
        let settings = config::Classifier {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        let classifier = ConfiguredClassifier::new(settings).unwrap();
        assert!(!classifier.is_remote());
        assert_eq!(classifier.classify("anything").await.unwrap(), Verdict::local());

        classifier.reconfigure(&config::Classifier {
            api_key: Some("sk-test".into()),
            ..Default::default()
        });
        assert!(classifier.is_remote());
    }
}
