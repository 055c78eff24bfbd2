use serde::Deserialize;
use reqwest::StatusCode;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::backend::CLIENT;
use crate::config::Config;
use crate::error::{Result, AppError};

/// Retry/backoff knobs for one polling run.
pub struct PollPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub max_error_delay: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy {
            max_attempts: 90,
            interval: Duration::from_secs(1),
            request_timeout: Duration::from_secs(10),
            max_consecutive_errors: 5,
            max_error_delay: Duration::from_secs(10),
        }
    }
}

/// Raw status payload as the backend reports it.
#[derive(Deserialize)]
struct TaskStatusRaw {
    status: String,
    progress: Option<u8>,
    current_step: Option<String>,
    result: Option<String>,
    error: Option<String>,
}

/// Interpreted task state. Separating interpretation from the retry loop
/// keeps the status semantics testable without a backend.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Pending { progress: u8, step: Option<String> },
    Completed { result: String },
    Failed { reason: String },
}

fn interpret(raw: &TaskStatusRaw) -> TaskState {
    match raw.status.as_str() {
        "completed" => match raw.result.as_deref() {
            Some(result) if !result.is_empty() => TaskState::Completed {
                result: result.to_string(),
            },
            // Terminal state is trusted, but without a payload the task
            // is unusable.
            _ => TaskState::Failed {
                reason: "task completed without a result payload".to_string(),
            },
        },
        "failed" => TaskState::Failed {
            reason: raw
                .error
                .clone()
                .unwrap_or_else(|| "conversion failed with no error detail".to_string()),
        },
        _ => TaskState::Pending {
            progress: raw.progress.unwrap_or(0),
            step: raw.current_step.clone(),
        },
    }
}

/// Delay before the next attempt after a transient error: grows with the
/// consecutive-error count, capped at `max_error_delay`.
fn error_delay(policy: &PollPolicy, consecutive_errors: u32) -> Duration {
    let scaled = policy.interval.saturating_mul(consecutive_errors);
    scaled.min(policy.max_error_delay)
}

pub async fn poll_task(config: &Config, task_id: &str) -> Result<String> {
    poll_task_with(config, task_id, &PollPolicy::default()).await
}

pub async fn poll_task_with(config: &Config, task_id: &str, policy: &PollPolicy) -> Result<String> {
    let status_url = format!("{}/api/v1/conversion/{}", config.backend_url, task_id);
    let mut consecutive_errors: u32 = 0;

    for attempt in 1..=policy.max_attempts {
        let response = CLIENT
            .get(&status_url)
            .timeout(policy.request_timeout)
            .send()
            .await;

        let transient = match response {
            Ok(res) if res.status() == StatusCode::NOT_FOUND => {
                // A vanished task will never resurface; retrying is wasted work.
                return Err(AppError::TaskNotFound(task_id.to_string()));
            }
            Ok(res) if res.status().is_success() => match res.json::<TaskStatusRaw>().await {
                Ok(raw) => {
                    consecutive_errors = 0;
                    match interpret(&raw) {
                        TaskState::Completed { result } => return Ok(result),
                        TaskState::Failed { reason } => return Err(AppError::TaskFailed(reason)),
                        TaskState::Pending { progress, step } => {
                            debug!(
                                "Task {}: {}% ({})",
                                task_id,
                                progress,
                                step.as_deref().unwrap_or("in progress")
                            );
                            sleep(policy.interval).await;
                            continue;
                        }
                    }
                }
                Err(e) => format!("undecodable status payload: {}", e),
            },
            Ok(res) => format!("status endpoint returned HTTP {}", res.status()),
            Err(e) => format!("status request failed: {}", e),
        };

        consecutive_errors += 1;
        warn!(
            "Task {}: attempt {} hit a transient error ({} consecutive) — {}",
            task_id, attempt, consecutive_errors, transient
        );

        if consecutive_errors >= policy.max_consecutive_errors {
            return Err(AppError::UpstreamUnreachable(format!(
                "too many consecutive errors while polling task {}: {}",
                task_id, transient
            )));
        }

        sleep(error_delay(policy, consecutive_errors)).await;
    }

    Err(AppError::Timeout(format!(
        "conversion task {} did not finish within {} attempts",
        task_id, policy.max_attempts
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: &str, result: Option<&str>, error: Option<&str>) -> TaskStatusRaw {
        TaskStatusRaw {
            status: status.to_string(),
            progress: Some(40),
            current_step: Some("converting".to_string()),
            result: result.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn completed_with_result_is_terminal_success() {
        let state = interpret(&raw("completed", Some("# Article"), None));
        assert_eq!(
            state,
            TaskState::Completed {
                result: "# Article".to_string()
            }
        );
    }

    #[test]
    fn completed_without_result_is_a_failure() {
        let state = interpret(&raw("completed", None, None));
        assert!(matches!(state, TaskState::Failed { .. }));
    }

    #[test]
    fn failed_carries_backend_error() {
        let state = interpret(&raw("failed", None, Some("extraction blocked")));
        assert_eq!(
            state,
            TaskState::Failed {
                reason: "extraction blocked".to_string()
            }
        );
    }

    #[test]
    fn failed_without_detail_gets_a_generic_reason() {
        match interpret(&raw("failed", None, None)) {
            TaskState::Failed { reason } => assert!(reason.contains("no error detail")),
            other => panic!("unexpected state: {:?}", other),
        }
    }

    #[test]
    fn unknown_statuses_stay_pending() {
        for status in ["pending", "running", "processing", "extracting_content"] {
            let state = interpret(&raw(status, None, None));
            assert!(matches!(state, TaskState::Pending { progress: 40, .. }), "status {status}");
        }
    }

    #[test]
    fn pending_without_progress_defaults_to_zero() {
        let raw = TaskStatusRaw {
            status: "pending".into(),
            progress: None,
            current_step: None,
            result: None,
            error: None,
        };
        assert_eq!(
            interpret(&raw),
            TaskState::Pending {
                progress: 0,
                step: None
            }
        );
    }

    #[test]
    fn error_delay_scales_with_consecutive_count() {
        let policy = PollPolicy::default();
        assert_eq!(error_delay(&policy, 1), Duration::from_secs(1));
        assert_eq!(error_delay(&policy, 3), Duration::from_secs(3));
    }

    #[test]
    fn error_delay_is_capped() {
        let policy = PollPolicy::default();
        assert_eq!(error_delay(&policy, 15), Duration::from_secs(10));
    }
}
