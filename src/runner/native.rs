//! Native runner: executes submissions directly as host processes
//!
//! Intended for local development; there is no isolation beyond a private
//! temp directory and the wall-clock deadline.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::debug;

use super::{run_with_deadline, write_files, Runner};
use crate::submission::{RunResult, Submission};

const SUPPORTED: &str =
    "python, javascript, typescript, go, java, c, cpp, rust, ruby, php, bash, powershell";

pub struct NativeRunner;

impl NativeRunner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NativeRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// One toolchain invocation: an optional compile step, then the run step
#[derive(Debug)]
struct Invocation {
    compile: Option<(String, Vec<String>)>,
    run: (String, Vec<String>),
}

/// Static dispatch table from language tag to toolchain invocation.
///
/// `entry` is the absolute path of the entry file, `dir` the submission
/// root (also the working directory of every spawned process).
fn invocation_for(language: &str, entry: &Path, dir: &Path) -> Option<Invocation> {
    let entry_str = entry.to_string_lossy().into_owned();
    let dir_str = dir.to_string_lossy().into_owned();
    let out_file = |name: &str| dir.join(name).to_string_lossy().into_owned();

    let invocation = match language.to_lowercase().as_str() {
        "python" | "python3" => Invocation {
            compile: None,
            run: ("python3".into(), vec![entry_str]),
        },
        "javascript" | "js" | "node" => Invocation {
            compile: None,
            run: ("node".into(), vec![entry_str]),
        },
        "typescript" | "ts" => Invocation {
            compile: None,
            run: ("npx".into(), vec!["ts-node".into(), entry_str]),
        },
        "go" | "golang" => Invocation {
            compile: None,
            run: ("go".into(), vec!["run".into(), entry_str]),
        },
        "java" => {
            let class_name = entry
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            Invocation {
                compile: Some(("javac".into(), vec![entry_str])),
                run: ("java".into(), vec!["-cp".into(), dir_str, class_name]),
            }
        }
        "c" => {
            let out = out_file("a.out");
            Invocation {
                compile: Some(("gcc".into(), vec![entry_str, "-o".into(), out.clone()])),
                run: (out, vec![]),
            }
        }
        "cpp" | "c++" => {
            let out = out_file("a.out");
            Invocation {
                compile: Some(("g++".into(), vec![entry_str, "-o".into(), out.clone()])),
                run: (out, vec![]),
            }
        }
        "rust" => {
            let out = out_file("main");
            Invocation {
                compile: Some(("rustc".into(), vec![entry_str, "-o".into(), out.clone()])),
                run: (out, vec![]),
            }
        }
        "ruby" => Invocation {
            compile: None,
            run: ("ruby".into(), vec![entry_str]),
        },
        "php" => Invocation {
            compile: None,
            run: ("php".into(), vec![entry_str]),
        },
        "bash" | "sh" | "shell" => Invocation {
            compile: None,
            run: ("bash".into(), vec![entry_str]),
        },
        "powershell" | "ps1" => Invocation {
            compile: None,
            run: (
                "powershell".into(),
                vec!["-ExecutionPolicy".into(), "Bypass".into(), "-File".into(), entry_str],
            ),
        },
        _ => return None,
    };
    Some(invocation)
}

#[async_trait]
impl Runner for NativeRunner {
    async fn execute(&self, submission: &Submission) -> Result<RunResult> {
        // Removed on all exit paths when the guard drops
        let temp_dir = tempfile::tempdir().context("Failed to create temp directory")?;
        write_files(temp_dir.path(), &submission.files).await?;

        let entry: PathBuf = temp_dir.path().join(submission.entry_file());
        let Some(invocation) = invocation_for(&submission.language, &entry, temp_dir.path())
        else {
            return Ok(RunResult::new(
                &submission.language,
                String::new(),
                format!(
                    "Language '{}' is not supported for native execution. Supported: {}",
                    submission.language, SUPPORTED
                ),
                1,
            ));
        };

        debug!(language = %submission.language, entry = %entry.display(), "native run");

        // One deadline covers compilation and execution
        let deadline = Instant::now() + Duration::from_secs(submission.time_limit_secs);

        if let Some((compiler, args)) = &invocation.compile {
            let mut cmd = Command::new(compiler);
            cmd.args(args).current_dir(temp_dir.path());
            let compiled = run_with_deadline(&mut cmd, None, deadline).await?;
            if compiled.timed_out {
                return Ok(RunResult::timed_out(
                    &submission.language,
                    String::new(),
                    submission.time_limit_secs,
                ));
            }
            if compiled.exit_code != 0 {
                let mut diagnostics = compiled.stderr;
                if diagnostics.is_empty() {
                    diagnostics = compiled.stdout;
                }
                return Ok(RunResult::new(
                    &submission.language,
                    String::new(),
                    format!("Compilation failed:\n{diagnostics}"),
                    1,
                ));
            }
        }

        let (program, args) = &invocation.run;
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(temp_dir.path());
        let captured = run_with_deadline(&mut cmd, submission.stdin.as_deref(), deadline).await?;

        if captured.timed_out {
            return Ok(RunResult::timed_out(
                &submission.language,
                captured.stdout,
                submission.time_limit_secs,
            ));
        }

        Ok(RunResult::new(
            &submission.language,
            captured.stdout,
            captured.stderr,
            captured.exit_code,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn submission(language: &str, files: &[(&str, &str)], time_limit: u64) -> Submission {
        Submission {
            language: language.into(),
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<IndexMap<_, _>>(),
            stdin: None,
            time_limit_secs: time_limit,
            memory_limit_bytes: 128 * 1024 * 1024,
        }
    }

    fn has_program(name: &str) -> bool {
        std::process::Command::new(name)
            .arg("--version")
            .output()
            .is_ok()
    }

    #[test]
    fn dispatch_table_covers_the_closed_set() {
        let dir = Path::new("/tmp/sub");
        let entry = dir.join("main.py");

        let python = invocation_for("python", &entry, dir).unwrap();
        assert!(python.compile.is_none());
        assert_eq!(python.run.0, "python3");

        let java = invocation_for("java", &dir.join("Main.java"), dir).unwrap();
        let (compiler, _) = java.compile.unwrap();
        assert_eq!(compiler, "javac");
        assert_eq!(java.run.0, "java");
        assert_eq!(java.run.1, vec!["-cp", "/tmp/sub", "Main"]);

        let c = invocation_for("c", &dir.join("main.c"), dir).unwrap();
        assert!(c.compile.is_some());
        assert_eq!(c.run.0, "/tmp/sub/a.out");

        assert!(invocation_for("fortran", &entry, dir).is_none());
    }

    #[tokio::test]
    async fn unsupported_language_reports_exit_one() {
        let runner = NativeRunner::new();
        let result = runner
            .execute(&submission("fortran", &[("main.f90", "")], 3))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 1);
        assert!(!result.success);
        assert!(result.stderr.contains("not supported"));
        assert_eq!(result.language, "fortran");
    }

    #[tokio::test]
    async fn runs_script_and_captures_stdout() {
        if !has_program("bash") {
            return;
        }
        let runner = NativeRunner::new();
        let result = runner
            .execute(&submission("bash", &[("main.sh", "echo hi")], 3))
            .await
            .unwrap();
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.exit_code, 0);
        assert!(result.success);
    }

    #[tokio::test]
    async fn busy_loop_hits_deadline_with_timeout_code() {
        if !has_program("bash") {
            return;
        }
        let runner = NativeRunner::new();
        let result = runner
            .execute(&submission("bash", &[("main.sh", "while :; do :; done")], 1))
            .await
            .unwrap();
        assert_eq!(result.exit_code, 124);
        assert!(!result.success);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn stdin_reaches_the_program() {
        if !has_program("bash") {
            return;
        }
        let runner = NativeRunner::new();
        let mut sub = submission("bash", &[("main.sh", "read line; echo \"got $line\"")], 3);
        sub.stdin = Some("ping\n".into());
        let result = runner.execute(&sub).await.unwrap();
        assert_eq!(result.stdout, "got ping\n");
    }
}
