#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use std::time::Duration;

#[serde_as]
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Classifier {
    /// When set, events are classified by the remote service.
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible chat completions API.
    pub api_base: String,

    pub model: String,

    #[serde_as(as = "serde_with::DurationSeconds")]
    pub timeout: Duration,
}

impl Default for Classifier {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".into(),
            model: "gpt-4o-mini".into(),
            timeout: Duration::from_secs(20),
        }
    }
}

impl Classifier {
    /// Returns the key only when it is non-blank.
    pub fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

// keep the key out of logs
impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}
