use serde::Serialize;
use reqwest::{Client, ClientBuilder, StatusCode};
use std::time::Duration;
use once_cell::sync::Lazy;

use crate::api::models::Provider;
use crate::error::{Result, AppError};

const OPENAI_MODELS_URL: &str = "https://api.openai.com/v1/models";
const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_PROBE_MODEL: &str = "claude-3-5-sonnet-20241022";

// Create a static client to reuse connections
static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .timeout(Duration::from_secs(10))
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to build HTTP client")
});

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
}

/// Check the key's literal prefix for the provider, without any network
/// call. A mismatch is user-correctable input, not a provider verdict.
pub fn check_format(api_key: &str, provider: Provider) -> Result<()> {
    let prefix = provider.key_prefix();
    if api_key.starts_with(prefix) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "{} keys must start with {}",
            provider, prefix
        )))
    }
}

/// Confirm the key is live with one minimal request to the provider.
///
/// A provider 401 means the key itself is bad; every other failure is
/// reported as an internal error so the caller can tell the two apart.
pub async fn verify_key(api_key: &str, provider: Provider) -> Result<()> {
    check_format(api_key, provider)?;

    let status = match provider {
        Provider::Openai => {
            let res = CLIENT
                .get(OPENAI_MODELS_URL)
                .bearer_auth(api_key)
                .send()
                .await
                .map_err(|e| AppError::Internal(format!("openai key check failed: {}", e)))?;
            res.status()
        }
        Provider::Anthropic => {
            let body = MessagesRequest {
                model: ANTHROPIC_PROBE_MODEL.into(),
                max_tokens: 1,
                messages: vec![Message {
                    role: "user".into(),
                    content: "ping".into(),
                }],
            };
            let res = CLIENT
                .post(ANTHROPIC_MESSAGES_URL)
                .header("x-api-key", api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| AppError::Internal(format!("anthropic key check failed: {}", e)))?;
            res.status()
        }
    };

    if status == StatusCode::UNAUTHORIZED {
        return Err(AppError::InvalidApiKey(format!(
            "{} rejected the key",
            provider
        )));
    }
    if !status.is_success() {
        return Err(AppError::Internal(format!(
            "{} key check returned HTTP {}",
            provider, status
        )));
    }

    Ok(())
}
