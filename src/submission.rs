//! Submission and run-result envelopes

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{Config, DEFAULT_MEMORY_BYTES};

/// Exit code reported when a run hits its wall-clock deadline
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported when a run was killed by the supervisor
pub const EXIT_KILLED: i32 = 137;

/// A run request: source files, language tag, optional stdin and caps.
///
/// File order is preserved from the request body; entry-file selection and
/// the payload archive both depend on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub language: String,
    pub files: IndexMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(rename = "timeLimitSeconds", default)]
    pub time_limit_secs: u64,
    #[serde(rename = "memoryLimitBytes", default)]
    pub memory_limit_bytes: u64,
}

impl Submission {
    /// Clamp limits to the safety caps and validate the payload.
    ///
    /// Normalizing an already-normalized submission is the identity.
    pub fn normalize(&mut self, config: &Config) -> Result<(), String> {
        if self.language.trim().is_empty() {
            return Err("language must not be empty".into());
        }
        if self.files.is_empty() {
            return Err("at least one file is required".into());
        }
        for path in self.files.keys() {
            validate_relative_path(path)?;
        }

        if self.time_limit_secs == 0 {
            self.time_limit_secs = 5;
        }
        self.time_limit_secs = self.time_limit_secs.clamp(1, 60);

        if self.memory_limit_bytes == 0 {
            self.memory_limit_bytes = DEFAULT_MEMORY_BYTES;
        }
        self.memory_limit_bytes = self.memory_limit_bytes.min(config.max_memory_bytes);

        Ok(())
    }

    /// Total byte length of all file contents; drives transport selection
    pub fn total_file_bytes(&self) -> usize {
        self.files.values().map(|c| c.len()).sum()
    }

    /// The file the runner launches: a language-preferred filename when
    /// present, otherwise the first file by insertion order.
    pub fn entry_file(&self) -> &str {
        for preferred in preferred_entry_names(&self.language).iter().copied() {
            if self.files.contains_key(preferred) {
                return preferred;
            }
        }
        self.files
            .keys()
            .next()
            .map(String::as_str)
            .expect("normalized submission has at least one file")
    }
}

/// Reject absolute paths and any `..` segment before the path reaches a
/// temp dir, ConfigMap or archive.
fn validate_relative_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("file path must not be empty".into());
    }
    if path.starts_with('/') || path.starts_with('\\') {
        return Err(format!("file path must be relative: {path}"));
    }
    // Windows drive prefixes count as absolute too
    if path.len() >= 2 && path.as_bytes()[1] == b':' {
        return Err(format!("file path must be relative: {path}"));
    }
    if path.split(['/', '\\']).any(|seg| seg == "..") {
        return Err(format!("file path must not escape the submission root: {path}"));
    }
    Ok(())
}

fn preferred_entry_names(language: &str) -> &'static [&'static str] {
    match language.to_lowercase().as_str() {
        "python" | "python3" => &["main.py"],
        "javascript" | "js" | "node" => &["index.js", "main.js"],
        "typescript" | "ts" => &["index.ts", "main.ts"],
        "go" | "golang" => &["main.go"],
        "java" => &["Main.java"],
        "c" => &["main.c"],
        "cpp" | "c++" => &["main.cpp"],
        "rust" => &["main.rs"],
        "ruby" => &["main.rb"],
        "php" => &["index.php", "main.php"],
        "bash" | "sh" | "shell" => &["main.sh", "run.sh"],
        "powershell" | "ps1" => &["main.ps1"],
        _ => &[],
    }
}

/// The response envelope shared by every backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "exitCode")]
    pub exit_code: i32,
    pub success: bool,
    pub language: String,
}

impl RunResult {
    /// Build a result; `success` is derived from the exit code and can never
    /// disagree with it.
    pub fn new(language: &str, stdout: String, stderr: String, exit_code: i32) -> Self {
        Self {
            stdout,
            stderr,
            exit_code,
            success: exit_code == 0,
            language: language.to_string(),
        }
    }

    /// Result for a run that hit its wall-clock deadline
    pub fn timed_out(language: &str, stdout: String, time_limit_secs: u64) -> Self {
        Self::new(
            language,
            stdout,
            format!("Execution timed out after {time_limit_secs} seconds"),
            EXIT_TIMEOUT,
        )
    }

    /// True when the result represents a deadline kill rather than user code
    /// finishing on its own
    pub fn is_timeout(&self) -> bool {
        self.exit_code == EXIT_TIMEOUT || self.exit_code == EXIT_KILLED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_MAX_MEMORY_BYTES;

    fn test_config() -> Config {
        let mut config = Config::from_env();
        config.max_memory_bytes = DEFAULT_MAX_MEMORY_BYTES;
        config
    }

    fn submission(files: &[(&str, &str)]) -> Submission {
        Submission {
            language: "python".into(),
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            stdin: None,
            time_limit_secs: 0,
            memory_limit_bytes: 0,
        }
    }

    #[test]
    fn defaults_applied_on_zero_limits() {
        let mut sub = submission(&[("main.py", "print(1)")]);
        sub.normalize(&test_config()).unwrap();
        assert_eq!(sub.time_limit_secs, 5);
        assert_eq!(sub.memory_limit_bytes, DEFAULT_MEMORY_BYTES);
    }

    #[test]
    fn time_limit_clamped_to_window() {
        let config = test_config();

        let mut sub = submission(&[("main.py", "")]);
        sub.time_limit_secs = 999;
        sub.normalize(&config).unwrap();
        assert_eq!(sub.time_limit_secs, 60);

        let mut sub = submission(&[("main.py", "")]);
        sub.time_limit_secs = 61;
        sub.normalize(&config).unwrap();
        assert_eq!(sub.time_limit_secs, 60);
    }

    #[test]
    fn memory_limit_clamped_to_backend_maximum() {
        let config = test_config();
        let mut sub = submission(&[("main.py", "")]);
        sub.memory_limit_bytes = u64::MAX;
        sub.normalize(&config).unwrap();
        assert_eq!(sub.memory_limit_bytes, config.max_memory_bytes);
    }

    #[test]
    fn normalize_is_idempotent() {
        let config = test_config();
        let mut sub = submission(&[("main.py", "print(1)")]);
        sub.time_limit_secs = 3;
        sub.memory_limit_bytes = 64 * 1024 * 1024;
        sub.normalize(&config).unwrap();
        let first = sub.clone();
        sub.normalize(&config).unwrap();
        assert_eq!(first.time_limit_secs, sub.time_limit_secs);
        assert_eq!(first.memory_limit_bytes, sub.memory_limit_bytes);
    }

    #[test]
    fn rejects_empty_payloads() {
        let config = test_config();
        let mut sub = submission(&[]);
        assert!(sub.normalize(&config).is_err());

        let mut sub = submission(&[("main.py", "")]);
        sub.language = " ".into();
        assert!(sub.normalize(&config).is_err());
    }

    #[test]
    fn rejects_escaping_paths() {
        let config = test_config();
        for bad in ["/etc/passwd", "../main.py", "a/../../b.py", "c:\\x.py"] {
            let mut sub = submission(&[(bad, "x")]);
            assert!(sub.normalize(&config).is_err(), "{bad} should be rejected");
        }
        let mut sub = submission(&[("pkg/util.py", "x"), ("main.py", "y")]);
        assert!(sub.normalize(&config).is_ok());
    }

    #[test]
    fn entry_prefers_language_filename_over_order() {
        let sub = submission(&[("helper.py", "x"), ("main.py", "y")]);
        assert_eq!(sub.entry_file(), "main.py");

        let sub = submission(&[("first.py", "x"), ("second.py", "y")]);
        assert_eq!(sub.entry_file(), "first.py");
    }

    #[test]
    fn success_tracks_exit_code() {
        assert!(RunResult::new("python", String::new(), String::new(), 0).success);
        assert!(!RunResult::new("python", String::new(), String::new(), 1).success);
        let timeout = RunResult::timed_out("python", String::new(), 3);
        assert_eq!(timeout.exit_code, EXIT_TIMEOUT);
        assert!(!timeout.success);
        assert!(timeout.is_timeout());
        assert!(timeout.stderr.contains("timed out"));
    }
}
