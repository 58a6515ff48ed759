//! Submission transport into the runner pod
//!
//! Small payloads ride inline in a ConfigMap volume; payloads over the
//! ConfigMap size ceiling are packed into a tar archive, uploaded to the
//! object store and fetched by an init container. The decision is
//! deterministic per submission; an upload failure on the object-store path
//! is an infrastructure error, never a mid-flight fallback to ConfigMap.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use indexmap::IndexMap;
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, EmptyDirVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Platform-imposed ConfigMap size ceiling that drives transport selection
pub const MAX_CONFIGMAP_BYTES: usize = 256 * 1024;

/// Where the submission lands inside the runner container
pub const SUBMISSION_MOUNT_PATH: &str = "/submission";

/// Name of the pod volume carrying the submission
pub const SUBMISSION_VOLUME: &str = "submission";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// ConfigMap mounted read-only at `/submission`
    Inline,
    /// Tar archive in the object store, fetched by an init container
    ObjectStore,
}

/// Pick the transport for a payload of `total_bytes`.
pub fn select_transport(total_bytes: usize, object_store_configured: bool) -> TransportKind {
    if total_bytes > MAX_CONFIGMAP_BYTES && object_store_configured {
        TransportKind::ObjectStore
    } else {
        TransportKind::Inline
    }
}

/// Pack all submission files into an uncompressed tar archive in memory:
/// one 0644 entry per file, in insertion order.
pub fn pack_archive(files: &IndexMap<String, String>) -> Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .with_context(|| format!("tar entry {}", path))?;
    }
    builder.into_inner().context("finalize tar archive")
}

/// ConfigMap carrying the submission file map for the inline transport
pub fn submission_configmap(
    name: &str,
    namespace: &str,
    files: &IndexMap<String, String>,
) -> ConfigMap {
    let data: BTreeMap<String, String> =
        files.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

/// Volume backed by the inline ConfigMap
pub fn inline_volume(configmap_name: &str) -> Volume {
    Volume {
        name: SUBMISSION_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: configmap_name.to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Empty-dir volume filled by the fetch init container
pub fn object_store_volume() -> Volume {
    Volume {
        name: SUBMISSION_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

/// Init container downloading and extracting the payload archive into the
/// submission volume.
pub fn fetch_init_container(presigned_url: &str) -> Container {
    Container {
        name: "fetch-submission".to_string(),
        image: Some("alpine:3.18".to_string()),
        command: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "apk add --no-cache curl tar >/dev/null 2>&1 && \
                 curl -fsS '{presigned_url}' -o /tmp/sub.tar && \
                 mkdir -p {SUBMISSION_MOUNT_PATH} && \
                 tar -xf /tmp/sub.tar -C {SUBMISSION_MOUNT_PATH}"
            ),
        ]),
        volume_mounts: Some(vec![VolumeMount {
            name: SUBMISSION_VOLUME.to_string(),
            mount_path: SUBMISSION_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}
