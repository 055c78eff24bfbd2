use reqwest::{Client, ClientBuilder};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::{Duration, Instant};
use once_cell::sync::Lazy;
use tokio::process::Command;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::api::models::Provider;
use crate::config::Config;
use crate::error::{Result, AppError};
use crate::poll;

const PROBE_ATTEMPTS: u32 = 3;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_DELAY: Duration = Duration::from_secs(2);
const AUTOSTART_WINDOW: Duration = Duration::from_secs(30);
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

// Create a static client to reuse connections; per-call timeouts are set
// on each request.
pub(crate) static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .connect_timeout(Duration::from_secs(5))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
});

#[derive(Serialize)]
struct SubmitRequest<'a> {
    url: &'a str,
    platforms: Vec<&'a str>,
    converter_type: &'a str,
    api_key: &'a str,
    api_provider: &'a str,
}

#[derive(Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    success: bool,
    task_id: Option<String>,
}

/// Convert through the remote backend: probe, submit, then poll the task
/// to a terminal state.
pub async fn convert(config: &Config, url: &str, api_key: &str, provider: Provider) -> Result<String> {
    ensure_reachable(config).await?;
    let task_id = submit(config, url, api_key, provider).await?;
    info!("Conversion task {} submitted for {}", task_id, url);
    poll::poll_task(config, &task_id).await
}

/// Snapshot of the backend health endpoint for the status route.
pub async fn health(config: &Config) -> Result<serde_json::Value> {
    let health_url = format!("{}/api/v1/health", config.backend_url);
    let res = CLIENT.get(&health_url).timeout(PROBE_TIMEOUT).send().await?;
    if !res.status().is_success() {
        return Err(AppError::UpstreamUnreachable(format!(
            "health endpoint returned HTTP {}",
            res.status()
        )));
    }
    Ok(res
        .json::<serde_json::Value>()
        .await
        .unwrap_or(serde_json::Value::Null))
}

async fn probe_once(config: &Config) -> bool {
    let health_url = format!("{}/api/v1/health", config.backend_url);
    match CLIENT.get(&health_url).timeout(PROBE_TIMEOUT).send().await {
        Ok(res) => res.status().is_success(),
        Err(_) => false,
    }
}

/// Probe the backend health endpoint, optionally starting the backend
/// process when every probe fails.
async fn ensure_reachable(config: &Config) -> Result<()> {
    for attempt in 1..=PROBE_ATTEMPTS {
        if probe_once(config).await {
            return Ok(());
        }
        warn!(
            "Backend health probe {}/{} failed for {}",
            attempt, PROBE_ATTEMPTS, config.backend_url
        );
        if attempt < PROBE_ATTEMPTS {
            sleep(PROBE_DELAY).await;
        }
    }

    let Some(start_cmd) = &config.backend_start_cmd else {
        return Err(AppError::UpstreamUnreachable(format!(
            "health probe failed {} times for {}",
            PROBE_ATTEMPTS, config.backend_url
        )));
    };

    info!("Starting backend: {}", start_cmd);
    spawn_detached(start_cmd)?;

    // Give the freshly started process a bounded window to come up.
    let deadline = Instant::now() + AUTOSTART_WINDOW;
    while Instant::now() < deadline {
        sleep(PROBE_DELAY).await;
        if probe_once(config).await {
            return Ok(());
        }
    }

    Err(AppError::UpstreamUnreachable(format!(
        "backend did not come up within {}s after start",
        AUTOSTART_WINDOW.as_secs()
    )))
}

fn spawn_detached(cmd: &str) -> Result<()> {
    Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| AppError::UpstreamUnreachable(format!("failed to start backend: {}", e)))?;
    Ok(())
}

async fn submit(config: &Config, url: &str, api_key: &str, provider: Provider) -> Result<String> {
    let submit_url = format!("{}/api/v1/convert", config.backend_url);
    let body = SubmitRequest {
        url,
        platforms: vec!["markdown"],
        converter_type: provider.as_str(),
        api_key,
        api_provider: provider.as_str(),
    };

    let res = CLIENT
        .post(&submit_url)
        .timeout(SUBMIT_TIMEOUT)
        .json(&body)
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        let detail = res
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| {
                v.get("error")
                    .or_else(|| v.get("detail"))
                    .and_then(|d| d.as_str())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("backend returned HTTP {}", status));
        return Err(AppError::UpstreamRejected(detail));
    }

    let submitted: SubmitResponse = res
        .json()
        .await
        .map_err(|e| AppError::UpstreamRejected(format!("undecodable submit response: {}", e)))?;

    match submitted.task_id {
        Some(task_id) if submitted.success && !task_id.is_empty() => Ok(task_id),
        _ => Err(AppError::UpstreamRejected(
            "submission did not return a task id".to_string(),
        )),
    }
}
