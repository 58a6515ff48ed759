//! Pod admission policy
//!
//! The cluster-side validator enforces the same hardening the k8s runner
//! already puts on its own Job specs, so a compromised or misconfigured
//! submitter cannot sneak a privileged pod past the API server. Checks run
//! in order; the first violation wins.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
use kube::core::DynamicObject;
use tracing::debug;

/// Validator configuration
#[derive(Debug, Clone, Default)]
pub struct AdmissionPolicy {
    /// When set, pods must request exactly this runtime class
    pub required_runtime_class: Option<String>,
}

impl AdmissionPolicy {
    pub fn from_env() -> Self {
        Self {
            required_runtime_class: std::env::var("REQUIRED_RUNTIME_CLASS")
                .ok()
                .filter(|s| !s.is_empty()),
        }
    }

    /// Apply the policy to a pod spec. Returns the first violation.
    pub fn validate_pod(&self, pod: &Pod) -> Result<(), String> {
        let Some(spec) = pod.spec.as_ref() else {
            return Ok(());
        };

        if let Some(required) = &self.required_runtime_class {
            if spec.runtime_class_name.as_deref() != Some(required.as_str()) {
                return Err(format!("pod must set runtimeClassName={required}"));
            }
        }

        if spec.automount_service_account_token == Some(true) {
            return Err("automountServiceAccountToken must be disabled".to_string());
        }

        for container in &spec.containers {
            let Some(security) = container.security_context.as_ref() else {
                continue;
            };
            if security.allow_privilege_escalation == Some(true) {
                return Err("allowPrivilegeEscalation must be false".to_string());
            }
            if security.read_only_root_filesystem == Some(false) {
                return Err("readOnlyRootFilesystem must be true".to_string());
            }
        }

        Ok(())
    }
}

/// Decide one admission review. The response UID always echoes the request
/// UID; policy rejections are `allowed=false` responses, never transport
/// errors.
pub fn review(policy: &AdmissionPolicy, incoming: AdmissionReview<Pod>) -> AdmissionReview<DynamicObject> {
    let request: AdmissionRequest<Pod> = match incoming.try_into() {
        Ok(request) => request,
        Err(err) => return AdmissionResponse::invalid(err.to_string()).into_review(),
    };

    let mut response = AdmissionResponse::from(&request);

    // Only Pod create/update carries the spec this policy covers
    if request.kind.kind == "Pod"
        && matches!(request.operation, Operation::Create | Operation::Update)
    {
        if let Some(pod) = &request.object {
            if let Err(message) = policy.validate_pod(pod) {
                debug!(uid = %request.uid, %message, "rejecting pod");
                response = response.deny(message);
            }
        }
    }

    response.into_review()
}

/// Router serving `POST /validate`
pub fn router(policy: AdmissionPolicy) -> Router {
    Router::new()
        .route("/validate", post(validate_handler))
        .with_state(Arc::new(policy))
}

async fn validate_handler(
    State(policy): State<Arc<AdmissionPolicy>>,
    Json(body): Json<AdmissionReview<Pod>>,
) -> Json<AdmissionReview<DynamicObject>> {
    Json(review(&policy, body))
}
