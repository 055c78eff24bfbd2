use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use std::fmt;

/// AI provider behind a user-supplied API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Openai,
    Anthropic,
}

impl Provider {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "openai" => Some(Provider::Openai),
            "anthropic" => Some(Provider::Anthropic),
            _ => None,
        }
    }

    /// Literal prefix every key of this provider starts with.
    pub fn key_prefix(&self) -> &'static str {
        match self {
            Provider::Openai => "sk-",
            Provider::Anthropic => "sk-ant-",
        }
    }

    /// Environment variable the legacy converter script reads the key from.
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::Openai => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Openai => "openai",
            Provider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Missing fields deserialize to empty strings so the handler's own
// validation decides the response, instead of the extractor's rejection.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConvertRequest {
    pub url: String,
    pub platform: Option<String>,
    pub user_api_key: String,
    pub user_api_provider: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    pub success: bool,
    pub content: String,
    pub platform: String,
    pub ai_provider: String,
    pub timestamp: DateTime<Utc>,
    /// Which path produced the result: "primary" or "fallback".
    pub source: String,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateKeyRequest {
    pub api_key: String,
    pub provider: String,
}

#[derive(Serialize)]
pub struct ValidateKeyResponse {
    pub success: bool,
    pub provider: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
