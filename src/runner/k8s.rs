//! Kubernetes runner: cluster-scale isolation through Jobs
//!
//! One run is one Job plus exactly one payload carrier (ConfigMap or
//! object-store archive). The payload carrier exists before the Job is
//! created; the Job is only deleted after supervision has reached a terminal
//! decision or fired its own deadline. Finished Jobs are reaped by the
//! platform's TTL; the ConfigMap is deleted here on every exit path.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, Pod, PodSpec, PodTemplateSpec, ResourceRequirements, SeccompProfile,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, LogParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::Client;
use tracing::{info, warn};

use super::{runner_image, Runner};
use crate::config::Config;
use crate::storage::StorageClient;
use crate::submission::{RunResult, Submission, EXIT_KILLED};
use crate::transport::{
    fetch_init_container, inline_volume, object_store_volume, pack_archive, select_transport,
    submission_configmap, TransportKind, SUBMISSION_MOUNT_PATH, SUBMISSION_VOLUME,
};

/// Pod label used to locate runner pods
pub const RUNNER_POD_APP: &str = "coderipper-runner";
/// Name of the container whose logs become the run's stdout
pub const RUNNER_CONTAINER: &str = "runner";
/// Service account assigned to runner pods (token automount disabled)
pub const RUNNER_SERVICE_ACCOUNT: &str = "coderipper-runner-sa";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const JOB_TTL_SECONDS: i32 = 60;
const PRESIGN_EXPIRY: Duration = Duration::from_secs(15 * 60);

pub struct K8sRunner {
    namespace: String,
    storage: Option<StorageClient>,
}

impl K8sRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            storage: config.s3.as_ref().map(StorageClient::new),
        }
    }

    /// Submit a Job for the submission, supervise it to a terminal state and
    /// collect its output.
    pub async fn run(
        &self,
        submission: &Submission,
        image: &str,
        timeout: Duration,
        namespace: &str,
    ) -> Result<RunResult> {
        // Phase 1: no side effects before we have cluster credentials
        let client = acquire_client().await?;
        let tag = unique_tag();

        // Phase 2: payload carrier must exist before the Job
        let kind = select_transport(submission.total_file_bytes(), self.storage.is_some());
        let (volume, init_containers, configmap_name) = match kind {
            TransportKind::Inline => {
                let name = format!("submission-{tag}");
                let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
                configmaps
                    .create(&PostParams::default(), &submission_configmap(&name, namespace, &submission.files))
                    .await
                    .context("create configmap")?;
                (inline_volume(&name), Vec::new(), Some(name))
            }
            TransportKind::ObjectStore => {
                let storage = self
                    .storage
                    .as_ref()
                    .context("object-store transport requires S3 configuration")?;
                let key = format!("submission-{tag}.tar");
                let archive = pack_archive(&submission.files)?;
                storage.ensure_bucket().await;
                storage.upload_archive(&key, archive).await?;
                let url = storage.presign_get(&key, PRESIGN_EXPIRY).await?;
                (object_store_volume(), vec![fetch_init_container(&url)], None)
            }
        };

        let job_name = format!("runner-job-{tag}");
        let result = self
            .supervise(&client, namespace, &job_name, image, timeout, volume, init_containers, submission)
            .await;

        // Phase 6: the ConfigMap never outlives the run, on any exit path
        if let Some(name) = configmap_name {
            let configmaps: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
            if let Err(err) = configmaps.delete(&name, &DeleteParams::default()).await {
                warn!("failed to delete configmap {}: {}", name, err);
            }
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn supervise(
        &self,
        client: &Client,
        namespace: &str,
        job_name: &str,
        image: &str,
        timeout: Duration,
        volume: Volume,
        init_containers: Vec<Container>,
        submission: &Submission,
    ) -> Result<RunResult> {
        let jobs: Api<Job> = Api::namespaced(client.clone(), namespace);

        // Phase 3
        let job = build_job(job_name, namespace, image, volume, init_containers);
        jobs.create(&PostParams::default(), &job)
            .await
            .context("create job")?;
        info!("Created job {}", job_name);

        // Phase 4: poll conditions under the run deadline
        match tokio::time::timeout(timeout, await_terminal(&jobs, job_name)).await {
            Ok(Ok(state)) => {
                info!("Job {} reached terminal state {:?}", job_name, state);
                // Phase 5
                self.collect_output(client, namespace, job_name, &submission.language)
                    .await
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                // Deadline fired before a terminal condition: the Job is
                // deleted here, never earlier
                if let Err(err) = jobs.delete(job_name, &DeleteParams::background()).await {
                    warn!("failed to delete timed-out job {}: {}", job_name, err);
                }
                Ok(RunResult::new(
                    &submission.language,
                    String::new(),
                    format!("Execution timed out after {} seconds", timeout.as_secs()),
                    EXIT_KILLED,
                ))
            }
        }
    }

    /// Locate the Job's pod and recover its logs and real exit code.
    ///
    /// The Job state is already terminal here, so lookup or log-stream
    /// failures degrade to an exit-1 result instead of an error.
    async fn collect_output(
        &self,
        client: &Client,
        namespace: &str,
        job_name: &str,
        language: &str,
    ) -> Result<RunResult> {
        let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
        // job-name narrows the app label to this session's pod, so
        // concurrent runs cannot cross-read logs
        let selector = format!("app={RUNNER_POD_APP},job-name={job_name}");
        let pod = match pods.list(&ListParams::default().labels(&selector)).await {
            Ok(list) => list.items.into_iter().next(),
            Err(err) => {
                warn!("pod list failed for {}: {}", job_name, err);
                None
            }
        };
        let Some(pod) = pod else {
            return Ok(RunResult::new(language, String::new(), "no pod logs".into(), 1));
        };

        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let log_params = LogParams {
            container: Some(RUNNER_CONTAINER.to_string()),
            ..LogParams::default()
        };
        let stdout = match pods.logs(&pod_name, &log_params).await {
            Ok(text) => text,
            Err(err) => {
                warn!("log stream failed for pod {}: {}", pod_name, err);
                return Ok(RunResult::new(language, String::new(), "no pod logs".into(), 1));
            }
        };

        let exit_code = terminated_exit_code(&pod).unwrap_or(0);
        Ok(RunResult::new(language, stdout, String::new(), exit_code))
    }
}

#[async_trait]
impl Runner for K8sRunner {
    async fn execute(&self, submission: &Submission) -> Result<RunResult> {
        let image = runner_image(&submission.language);
        let timeout = Duration::from_secs(submission.time_limit_secs);
        self.run(submission, image, timeout, &self.namespace).await
    }
}

/// In-cluster discovery first, on-disk kubeconfig as the local-dev fallback
async fn acquire_client() -> Result<Client> {
    let config = match kube::Config::incluster() {
        Ok(config) => config,
        Err(_) => kube::Config::from_kubeconfig(&KubeConfigOptions::default())
            .await
            .context("failed to create kubernetes config")?,
    };
    Client::try_from(config).context("failed to create kubernetes client")
}

/// Terminal states observable on a Job's condition list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TerminalState {
    Complete,
    Failed,
}

async fn await_terminal(jobs: &Api<Job>, name: &str) -> Result<TerminalState> {
    let mut poll = tokio::time::interval(POLL_INTERVAL);
    loop {
        poll.tick().await;
        let job = jobs.get(name).await.context("get job")?;
        if let Some(state) = terminal_condition(&job) {
            return Ok(state);
        }
    }
}

fn terminal_condition(job: &Job) -> Option<TerminalState> {
    let conditions = job.status.as_ref()?.conditions.as_ref()?;
    for condition in conditions {
        if condition.status != "True" {
            continue;
        }
        match condition.type_.as_str() {
            "Complete" => return Some(TerminalState::Complete),
            "Failed" => return Some(TerminalState::Failed),
            _ => {}
        }
    }
    None
}

fn terminated_exit_code(pod: &Pod) -> Option<i32> {
    pod.status
        .as_ref()?
        .container_statuses
        .as_ref()?
        .iter()
        .find(|status| status.name == RUNNER_CONTAINER)?
        .state
        .as_ref()?
        .terminated
        .as_ref()
        .map(|terminated| terminated.exit_code)
}

/// Hardened Job spec: no retries, short TTL, no token automount, locked-down
/// security context. The admission validator enforces the same policy on the
/// API path.
fn build_job(
    name: &str,
    namespace: &str,
    image: &str,
    volume: Volume,
    init_containers: Vec<Container>,
) -> Job {
    let container = Container {
        name: RUNNER_CONTAINER.to_string(),
        image: Some(image.to_string()),
        args: Some(vec!["./run.sh".to_string()]),
        volume_mounts: Some(vec![VolumeMount {
            name: SUBMISSION_VOLUME.to_string(),
            mount_path: SUBMISSION_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }]),
        resources: Some(ResourceRequirements {
            limits: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("500m".to_string())),
                ("memory".to_string(), Quantity("512Mi".to_string())),
            ])),
            requests: Some(BTreeMap::from([
                ("cpu".to_string(), Quantity("100m".to_string())),
                ("memory".to_string(), Quantity("128Mi".to_string())),
            ])),
            ..Default::default()
        }),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            run_as_non_root: Some(true),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    let pod_spec = PodSpec {
        service_account_name: Some(RUNNER_SERVICE_ACCOUNT.to_string()),
        automount_service_account_token: Some(false),
        restart_policy: Some("Never".to_string()),
        host_network: Some(false),
        containers: vec![container],
        init_containers: if init_containers.is_empty() {
            None
        } else {
            Some(init_containers)
        },
        volumes: Some(vec![volume]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            ttl_seconds_after_finished: Some(JOB_TTL_SECONDS),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(BTreeMap::from([(
                        "app".to_string(),
                        RUNNER_POD_APP.to_string(),
                    )])),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Unique monotonic tag deriving the job, ConfigMap and object-key names
fn unique_tag() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use crate::transport::inline_volume;

    fn sample_job(conditions: Vec<JobCondition>) -> Job {
        Job {
            status: Some(JobStatus {
                conditions: Some(conditions),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn condition(type_: &str, status: &str) -> JobCondition {
        JobCondition {
            type_: type_.to_string(),
            status: status.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn terminal_detection_follows_conditions() {
        assert_eq!(terminal_condition(&sample_job(vec![])), None);
        assert_eq!(
            terminal_condition(&sample_job(vec![condition("Complete", "True")])),
            Some(TerminalState::Complete)
        );
        assert_eq!(
            terminal_condition(&sample_job(vec![condition("Failed", "True")])),
            Some(TerminalState::Failed)
        );
        // Only conditions with status True count
        assert_eq!(
            terminal_condition(&sample_job(vec![condition("Complete", "False")])),
            None
        );
        assert_eq!(terminal_condition(&Job::default()), None);
    }

    #[test]
    fn job_spec_is_hardened() {
        let job = build_job(
            "runner-job-1",
            "default",
            "coderipper/runner-python:latest",
            inline_volume("submission-1"),
            Vec::new(),
        );

        let spec = job.spec.as_ref().unwrap();
        assert_eq!(spec.backoff_limit, Some(0));
        assert_eq!(spec.ttl_seconds_after_finished, Some(60));

        let pod = spec.template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(pod.automount_service_account_token, Some(false));
        assert_eq!(pod.service_account_name.as_deref(), Some(RUNNER_SERVICE_ACCOUNT));
        assert!(pod.init_containers.is_none());

        let labels = spec.template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(labels.get("app").map(String::as_str), Some(RUNNER_POD_APP));

        let container = &pod.containers[0];
        assert_eq!(container.name, RUNNER_CONTAINER);
        let security = container.security_context.as_ref().unwrap();
        assert_eq!(security.allow_privilege_escalation, Some(false));
        assert_eq!(security.read_only_root_filesystem, Some(true));
        assert_eq!(security.run_as_non_root, Some(true));
        assert_eq!(
            security.seccomp_profile.as_ref().unwrap().type_,
            "RuntimeDefault"
        );

        let resources = container.resources.as_ref().unwrap();
        assert_eq!(
            resources.limits.as_ref().unwrap().get("memory"),
            Some(&Quantity("512Mi".to_string()))
        );
        assert_eq!(
            resources.requests.as_ref().unwrap().get("cpu"),
            Some(&Quantity("100m".to_string()))
        );

        let mounts = container.volume_mounts.as_ref().unwrap();
        assert_eq!(mounts[0].mount_path, SUBMISSION_MOUNT_PATH);
        assert_eq!(mounts[0].read_only, Some(true));
    }

    #[test]
    fn object_store_job_carries_init_container() {
        let job = build_job(
            "runner-job-2",
            "default",
            "coderipper/runner-python:latest",
            object_store_volume(),
            vec![fetch_init_container("https://store.example/sub.tar")],
        );
        let pod = job.spec.unwrap().template.spec.unwrap();
        let inits = pod.init_containers.unwrap();
        assert_eq!(inits.len(), 1);
        assert_eq!(inits[0].name, "fetch-submission");
        assert!(pod.volumes.unwrap()[0].empty_dir.is_some());
    }

    #[test]
    fn tags_are_unique_and_monotonic_enough() {
        let a = unique_tag();
        let b = unique_tag();
        assert!(b >= a);
    }
}
