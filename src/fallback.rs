use std::collections::HashSet;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::api::models::Provider;
use crate::config::Config;
use crate::error::{Result, AppError};

const SUBPROCESS_TIMEOUT: Duration = Duration::from_secs(20);
const STDERR_PREFIX_CHARS: usize = 300;

/// Shell fragment handed to `bash -c`. The provider and URL arrive as
/// positional parameters so they never get interpolated into the script
/// text itself.
const CONVERTER_COMMAND: &str =
    r#"source venv/bin/activate && python3 news_converter_service.py --type "$1" --keep-txt "$2""#;

// The legacy converter script announces its output file on stdout with a
// marker line; the last occurrence wins.
static RESULT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)최종 결과:\s*(.+\.md)\s*$").expect("Failed to parse result-line regex")
});

/// In-flight fallback conversions, keyed by (url, provider). Shared
/// process-wide through `AppState` so concurrent requests see each
/// other's jobs.
pub type ActiveJobs = Arc<Mutex<HashSet<(String, Provider)>>>;

pub fn new_active_jobs() -> ActiveJobs {
    Arc::new(Mutex::new(HashSet::new()))
}

/// Removes its (url, provider) entry on drop, so the slot is released on
/// every exit path.
struct JobGuard {
    jobs: ActiveJobs,
    key: (String, Provider),
}

impl JobGuard {
    fn acquire(jobs: &ActiveJobs, url: &str, provider: Provider) -> Option<JobGuard> {
        let key = (url.to_string(), provider);
        let mut set = jobs.lock().unwrap();
        if !set.insert(key.clone()) {
            return None;
        }
        Some(JobGuard {
            jobs: jobs.clone(),
            key,
        })
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.lock().unwrap().remove(&self.key);
    }
}

fn parse_result_path(stdout: &str) -> Option<String> {
    RESULT_LINE
        .captures_iter(stdout)
        .last()
        .map(|cap| cap[1].trim().to_string())
}

fn stderr_prefix(stderr: &str) -> String {
    if stderr.chars().count() <= STDERR_PREFIX_CHARS {
        stderr.trim_end().to_string()
    } else {
        stderr.chars().take(STDERR_PREFIX_CHARS).collect()
    }
}

/// Run the legacy converter script locally and read the markdown file it
/// reports.
pub async fn convert_via_subprocess(
    jobs: &ActiveJobs,
    config: &Config,
    url: &str,
    api_key: &str,
    provider: Provider,
) -> Result<String> {
    let _guard = JobGuard::acquire(jobs, url, provider).ok_or_else(|| {
        AppError::Subprocess(format!(
            "a {} conversion for {} is already running",
            provider, url
        ))
    })?;

    run_converter(config, url, api_key, provider, SUBPROCESS_TIMEOUT).await
}

async fn run_converter(
    config: &Config,
    url: &str,
    api_key: &str,
    provider: Provider,
    time_limit: Duration,
) -> Result<String> {
    info!("Falling back to local converter for {} ({})", url, provider);

    let child = Command::new("bash")
        .arg("-c")
        .arg(CONVERTER_COMMAND)
        .arg("newsforge-fallback")
        .arg(provider.as_str())
        .arg(url)
        .current_dir(&config.converter_dir)
        .env(provider.env_var(), api_key)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| AppError::Subprocess(format!("failed to launch converter script: {}", e)))?;

    // kill_on_drop reaps the child when the timed-out future is dropped.
    let output = timeout(time_limit, child.wait_with_output())
        .await
        .map_err(|_| {
            AppError::Timeout(format!(
                "converter script exceeded {}s for {}",
                time_limit.as_secs(),
                url
            ))
        })??;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        warn!("Converter script exited with {}", output.status);
        return Err(AppError::Subprocess(format!(
            "converter script exited with {}: {}",
            output.status,
            stderr_prefix(&stderr)
        )));
    }

    let path = parse_result_path(&stdout).ok_or_else(|| {
        AppError::Subprocess("result file path not found in converter output".to_string())
    })?;

    // The script reports paths relative to its own working directory;
    // join leaves absolute paths untouched.
    let resolved = config.converter_dir.join(&path);
    tokio::fs::read_to_string(&resolved).await.map_err(|e| {
        AppError::Subprocess(format!(
            "failed to read result file {}: {}",
            resolved.display(),
            e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::path::Path;

    fn test_config(dir: &Path) -> Config {
        Config {
            server_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            backend_url: "http://127.0.0.1:1".to_string(),
            converter_dir: dir.to_path_buf(),
            backend_start_cmd: None,
        }
    }

    /// Stands in for the virtualenv: sourcing it shadows `python3` with a
    /// shell function, so the test controls the script's behavior.
    fn write_activate(dir: &Path, python3_body: &str) {
        let venv_bin = dir.join("venv/bin");
        std::fs::create_dir_all(&venv_bin).unwrap();
        std::fs::write(
            venv_bin.join("activate"),
            format!("python3() {{\n{}\n}}\n", python3_body),
        )
        .unwrap();
    }

    #[test]
    fn result_path_is_parsed_from_marker_line() {
        let stdout = "🎉 전체 프로세스 완료!\n📄 최종 결과: converted_articles/article_1.md\n";
        assert_eq!(
            parse_result_path(stdout),
            Some("converted_articles/article_1.md".to_string())
        );
    }

    #[test]
    fn last_marker_line_wins() {
        let stdout = "최종 결과: old.md\nsome noise\n최종 결과: new.md\n";
        assert_eq!(parse_result_path(stdout), Some("new.md".to_string()));
    }

    #[test]
    fn missing_marker_yields_none() {
        assert_eq!(parse_result_path("all done, no marker"), None);
        assert_eq!(parse_result_path("최종 결과: not-markdown.txt"), None);
    }

    #[test]
    fn stderr_prefix_is_bounded() {
        let long = "e".repeat(1000);
        assert_eq!(stderr_prefix(&long).chars().count(), STDERR_PREFIX_CHARS);
        assert_eq!(stderr_prefix("short\n"), "short");
    }

    #[test]
    fn guard_released_on_drop() {
        let jobs = new_active_jobs();
        {
            let guard = JobGuard::acquire(&jobs, "https://example.com/a", Provider::Openai);
            assert!(guard.is_some());
            assert!(
                JobGuard::acquire(&jobs, "https://example.com/a", Provider::Openai).is_none()
            );
            // A different provider for the same URL is a different job.
            assert!(
                JobGuard::acquire(&jobs, "https://example.com/a", Provider::Anthropic).is_some()
            );
        }
        assert!(JobGuard::acquire(&jobs, "https://example.com/a", Provider::Openai).is_some());
    }

    #[tokio::test]
    async fn successful_run_reads_result_file() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = dir.path().join("out.md");
        std::fs::write(&md_path, "# Converted\n\nbody").unwrap();
        write_activate(
            dir.path(),
            &format!("echo \"최종 결과: {}\"", md_path.display()),
        );

        let config = test_config(dir.path());
        let content = run_converter(
            &config,
            "https://example.com/a",
            "sk-test",
            Provider::Openai,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(content, "# Converted\n\nbody");
    }

    #[tokio::test]
    async fn relative_result_path_resolves_against_converter_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("converted_articles")).unwrap();
        std::fs::write(
            dir.path().join("converted_articles/article_1.md"),
            "relative content",
        )
        .unwrap();
        write_activate(dir.path(), "echo '최종 결과: converted_articles/article_1.md'");

        let config = test_config(dir.path());
        let content = run_converter(
            &config,
            "https://example.com/a",
            "sk-test",
            Provider::Openai,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(content, "relative content");
    }

    #[tokio::test]
    async fn api_key_reaches_script_via_env_var() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = dir.path().join("key.md");
        write_activate(
            dir.path(),
            &format!(
                "printf '%s' \"$ANTHROPIC_API_KEY\" > {p}\necho \"최종 결과: {p}\"",
                p = md_path.display()
            ),
        );

        let config = test_config(dir.path());
        let content = run_converter(
            &config,
            "https://example.com/a",
            "sk-ant-secret",
            Provider::Anthropic,
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(content, "sk-ant-secret");
    }

    #[tokio::test]
    async fn exit_zero_without_marker_is_result_not_found() {
        let dir = tempfile::tempdir().unwrap();
        write_activate(dir.path(), "echo 'converting...'");

        let config = test_config(dir.path());
        let err = run_converter(
            &config,
            "https://example.com/a",
            "sk-test",
            Provider::Openai,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            AppError::Subprocess(msg) => assert!(msg.contains("result file path not found")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn nonzero_exit_surfaces_stderr_prefix() {
        let dir = tempfile::tempdir().unwrap();
        write_activate(dir.path(), "echo 'extractor blew up' >&2\nreturn 3");

        let config = test_config(dir.path());
        let err = run_converter(
            &config,
            "https://example.com/a",
            "sk-test",
            Provider::Openai,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        match err {
            AppError::Subprocess(msg) => assert!(msg.contains("extractor blew up")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn wall_clock_timeout_kills_the_script() {
        let dir = tempfile::tempdir().unwrap();
        write_activate(dir.path(), "sleep 30");

        let config = test_config(dir.path());
        let err = run_converter(
            &config,
            "https://example.com/a",
            "sk-test",
            Provider::Openai,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn concurrent_identical_jobs_are_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let md_path = dir.path().join("out.md");
        std::fs::write(&md_path, "content").unwrap();
        write_activate(
            dir.path(),
            &format!("sleep 1\necho \"최종 결과: {}\"", md_path.display()),
        );

        let jobs = new_active_jobs();
        let config = test_config(dir.path());
        let (a, b) = tokio::join!(
            convert_via_subprocess(&jobs, &config, "https://example.com/a", "sk-x", Provider::Openai),
            convert_via_subprocess(&jobs, &config, "https://example.com/a", "sk-x", Provider::Openai),
        );

        // Exactly one of the two runs; the other is turned away by the
        // guard.
        let errors = [&a, &b].iter().filter(|r| r.is_err()).count();
        assert_eq!(errors, 1, "one duplicate should have been rejected");
        let rejected = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        match rejected {
            AppError::Subprocess(msg) => assert!(msg.contains("already running")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
