//! Process-wide configuration, read once at startup

use std::fmt;

/// Execution backend selected by `RUNNER_MODE`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerMode {
    Native,
    Docker,
    K8s,
}

impl RunnerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerMode::Native => "native",
            RunnerMode::Docker => "docker",
            RunnerMode::K8s => "k8s",
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "docker" => RunnerMode::Docker,
            "k8s" => RunnerMode::K8s,
            // Native is the best default for local dev without Docker
            _ => RunnerMode::Native,
        }
    }
}

impl fmt::Display for RunnerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object-store connection settings; present only when `S3_ENDPOINT` is set
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub use_ssl: bool,
}

/// Badge service event sink
#[derive(Debug, Clone)]
pub struct BadgeConfig {
    pub url: String,
    pub token: Option<String>,
}

/// Service configuration assembled from the environment.
///
/// Built once in `main` and passed into runners and handlers; nothing on the
/// request path reads the environment again.
#[derive(Debug, Clone)]
pub struct Config {
    pub runner_mode: RunnerMode,
    pub port: u16,
    pub namespace: String,
    /// Access-token signing secret; `None` disables authentication (dev only)
    pub auth_jwt_secret: Option<String>,
    pub badge: BadgeConfig,
    pub s3: Option<S3Config>,
    /// Ceiling applied to submission memory limits
    pub max_memory_bytes: u64,
    pub rate_limit_per_minute: u32,
}

pub const DEFAULT_MEMORY_BYTES: u64 = 128 * 1024 * 1024;
pub const DEFAULT_MAX_MEMORY_BYTES: u64 = 512 * 1024 * 1024;

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let runner_mode =
            RunnerMode::parse(&std::env::var("RUNNER_MODE").unwrap_or_default());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8081);

        let namespace = std::env::var("K8S_NAMESPACE").unwrap_or_else(|_| "default".into());

        let auth_jwt_secret = std::env::var("AUTH_JWT_SECRET").ok().filter(|s| !s.is_empty());

        let badge = BadgeConfig {
            url: std::env::var("BADGE_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8001/api/badges/trigger".into()),
            token: std::env::var("BADGE_SERVICE_TOKEN").ok().filter(|s| !s.is_empty()),
        };

        let s3 = std::env::var("S3_ENDPOINT").ok().filter(|s| !s.is_empty()).map(|endpoint| {
            S3Config {
                endpoint,
                access_key: std::env::var("S3_ACCESS_KEY").unwrap_or_default(),
                secret_key: std::env::var("S3_SECRET_KEY").unwrap_or_default(),
                bucket: std::env::var("S3_BUCKET")
                    .unwrap_or_else(|_| "coderipper-submissions".into()),
                use_ssl: std::env::var("S3_USE_SSL").map(|v| v != "false").unwrap_or(true),
            }
        });

        let max_memory_bytes = std::env::var("MAX_MEMORY_BYTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_MEMORY_BYTES);

        Self {
            runner_mode,
            port,
            namespace,
            auth_jwt_secret,
            badge,
            s3,
            max_memory_bytes,
            rate_limit_per_minute: 60,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parsing_defaults_to_native() {
        assert_eq!(RunnerMode::parse("k8s"), RunnerMode::K8s);
        assert_eq!(RunnerMode::parse("docker"), RunnerMode::Docker);
        assert_eq!(RunnerMode::parse("native"), RunnerMode::Native);
        assert_eq!(RunnerMode::parse(""), RunnerMode::Native);
        assert_eq!(RunnerMode::parse("bogus"), RunnerMode::Native);
    }
}
