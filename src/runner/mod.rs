//! Execution backends
//!
//! Three interchangeable backends implement the same contract: run a
//! normalized submission and report its streams and exit status. The
//! backend is picked once at startup from `RUNNER_MODE`; nothing on the
//! request path branches on mode strings.

pub mod docker;
pub mod k8s;
pub mod native;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use crate::config::Config;
use crate::submission::{RunResult, Submission, EXIT_TIMEOUT};

pub use docker::DockerRunner;
pub use k8s::K8sRunner;
pub use native::NativeRunner;

/// Execution backend contract shared by native, docker and k8s runners
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a normalized submission to completion under its wall-clock
    /// deadline.
    async fn execute(&self, submission: &Submission) -> Result<RunResult>;
}

/// Construct the backend selected by the configuration
pub fn build_runner(config: &Config) -> Arc<dyn Runner> {
    match config.runner_mode {
        crate::config::RunnerMode::Native => Arc::new(NativeRunner::new()),
        crate::config::RunnerMode::Docker => Arc::new(DockerRunner::new()),
        crate::config::RunnerMode::K8s => Arc::new(K8sRunner::new(config)),
    }
}

/// Runner image for a language tag (docker and k8s backends)
pub fn runner_image(language: &str) -> &'static str {
    match language {
        "go" | "golang" => "coderipper/runner-go:latest",
        _ => "coderipper/runner-python:latest",
    }
}

/// Write submission files into `dir`, honoring relative subdirectories.
///
/// Paths were already validated at intake; this never writes outside `dir`.
pub(crate) async fn write_files(dir: &Path, files: &IndexMap<String, String>) -> Result<()> {
    for (name, contents) in files {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory for {}", name))?;
        }
        fs::write(&path, contents)
            .await
            .with_context(|| format!("Failed to write file {}", name))?;
    }
    Ok(())
}

/// Output of a supervised child process
#[derive(Debug)]
pub(crate) struct Captured {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub timed_out: bool,
}

/// Spawn a child, feed optional stdin, and capture both streams until exit
/// or `deadline`. On deadline the child is killed and whatever output it
/// produced so far is preserved; `exit_code` is then the timeout code.
pub(crate) async fn run_with_deadline(
    cmd: &mut Command,
    stdin: Option<&str>,
    deadline: Instant,
) -> Result<Captured> {
    cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().context("Failed to spawn process")?;

    if let Some(input) = stdin {
        if let Some(mut handle) = child.stdin.take() {
            // The child may exit before reading everything it was given
            if let Err(err) = handle.write_all(input.as_bytes()).await {
                debug!("stdin write ended early: {err}");
            }
        }
    }

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });
    let stderr_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    });

    match tokio::time::timeout_at(deadline, child.wait()).await {
        Ok(status) => {
            let status = status.context("Failed to wait for process")?;
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(Captured {
                stdout,
                stderr,
                exit_code: exit_code_of(status),
                timed_out: false,
            })
        }
        Err(_) => {
            let _ = child.kill().await;
            // Killing the child closes its pipes; the readers finish with
            // whatever was flushed before the deadline
            let stdout = stdout_task.await.unwrap_or_default();
            let stderr = stderr_task.await.unwrap_or_default();
            Ok(Captured {
                stdout,
                stderr,
                exit_code: EXIT_TIMEOUT,
                timed_out: true,
            })
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    // Terminated by signal: report the conventional 128+signal code
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn files(entries: &[(&str, &str)]) -> IndexMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn writes_files_into_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        write_files(dir.path(), &files(&[("pkg/util.py", "x = 1"), ("main.py", "print(x)")]))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("pkg/util.py")).unwrap(),
            "x = 1"
        );
        assert!(dir.path().join("main.py").exists());
    }

    #[tokio::test]
    async fn captures_streams_separately() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2; exit 3"]);
        let captured = run_with_deadline(&mut cmd, None, Instant::now() + Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(captured.stdout, "out\n");
        assert_eq!(captured.stderr, "err\n");
        assert_eq!(captured.exit_code, 3);
        assert!(!captured.timed_out);
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let mut cmd = Command::new("cat");
        let captured = run_with_deadline(
            &mut cmd,
            Some("hello\n"),
            Instant::now() + Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert_eq!(captured.stdout, "hello\n");
        assert_eq!(captured.exit_code, 0);
    }

    #[tokio::test]
    async fn deadline_kills_and_preserves_partial_output() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo partial; sleep 30"]);
        let captured =
            run_with_deadline(&mut cmd, None, Instant::now() + Duration::from_millis(300))
                .await
                .unwrap();
        assert!(captured.timed_out);
        assert_eq!(captured.exit_code, EXIT_TIMEOUT);
        assert_eq!(captured.stdout, "partial\n");
    }

    #[test]
    fn image_selection_by_language() {
        assert_eq!(runner_image("go"), "coderipper/runner-go:latest");
        assert_eq!(runner_image("golang"), "coderipper/runner-go:latest");
        assert_eq!(runner_image("python"), "coderipper/runner-python:latest");
        assert_eq!(runner_image("ruby"), "coderipper/runner-python:latest");
    }
}
