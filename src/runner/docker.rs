//! Docker runner: single-node isolation through the container runtime
//!
//! The submission directory is bind-mounted read-only at `/submission`, the
//! network is disabled and CPU/memory caps applied. The in-container
//! entrypoint (`./run.sh`) is supplied by the runner image, so only the
//! combined output stream is available.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use super::{run_with_deadline, runner_image, write_files, Runner};
use crate::submission::{RunResult, Submission, EXIT_TIMEOUT};

pub struct DockerRunner;

impl DockerRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DockerRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for DockerRunner {
    async fn execute(&self, submission: &Submission) -> Result<RunResult> {
        let temp_dir = tempfile::tempdir().context("Failed to create temp directory")?;
        write_files(temp_dir.path(), &submission.files).await?;

        let image = runner_image(&submission.language);
        let memory_mb = (submission.memory_limit_bytes / (1024 * 1024)).max(1);
        let mount = format!("{}:/submission:ro", temp_dir.path().display());

        debug!(language = %submission.language, image, "docker run");

        let mut cmd = Command::new("docker");
        cmd.args([
            "run",
            "--rm",
            "--network",
            "none",
            "-v",
            &mount,
            "--memory",
            &format!("{memory_mb}m"),
            "--cpus",
            "1",
            image,
            "./run.sh",
        ]);

        let deadline = Instant::now() + Duration::from_secs(submission.time_limit_secs);
        let captured = run_with_deadline(&mut cmd, None, deadline).await?;

        // Image compatibility: callers of this mode get one combined stream
        let mut combined = captured.stdout;
        combined.push_str(&captured.stderr);

        if captured.timed_out {
            combined.push_str("\n--- run timeout ---\n");
            return Ok(RunResult::new(
                &submission.language,
                combined,
                format!(
                    "Execution timed out after {} seconds",
                    submission.time_limit_secs
                ),
                EXIT_TIMEOUT,
            ));
        }

        Ok(RunResult::new(
            &submission.language,
            combined,
            String::new(),
            captured.exit_code,
        ))
    }
}
