//! Best-effort badge/achievement event notifier
//!
//! Runs on a detached task so a slow or dead badge service can never delay a
//! caller's response. Failures are logged and otherwise ignored.

use std::time::Duration;

use serde_json::json;
use tracing::warn;

use crate::auth::CallerId;
use crate::config::BadgeConfig;

pub struct BadgeNotifier {
    client: reqwest::Client,
    config: BadgeConfig,
}

impl BadgeNotifier {
    pub fn new(config: BadgeConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(3))
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Fire a `run_success` event for the caller and return immediately.
    pub fn notify_run_success(&self, caller: &CallerId) {
        let client = self.client.clone();
        let url = self.config.url.clone();
        let token = self.config.token.clone();
        let payload = json!({ "caller_id": caller.0, "event": "run_success" });

        tokio::spawn(async move {
            let mut request = client.post(&url).json(&payload);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            match request.send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(status = %response.status(), "badge trigger non-200");
                }
                Ok(_) => {}
                Err(err) => warn!("badge trigger failed: {err}"),
            }
        });
    }
}
