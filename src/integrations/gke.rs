//! Google Kubernetes Engine integration.
//!
//! Probes the instance metadata service once at startup; afterwards the pod
//! enricher can attach a Cloud Logging deep-link for any pod without doing
//! I/O.

use std::sync::OnceLock;
use std::time::Duration;

use sentry::protocol::Value;
use serde::Deserialize;
use tracing::{info, warn};

use crate::incident::IncidentDraft;

const INSTANCE_METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/attributes/?recursive=true";
const PROJECT_METADATA_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/project/?recursive=true";

const CONTEXT_NAME: &str = "Google Kubernetes Engine";

#[derive(Debug, Clone)]
struct GkeIdentity {
    cluster_name: String,
    cluster_location: String,
    project_id: String,
}

static IDENTITY: OnceLock<Option<GkeIdentity>> = OnceLock::new();

#[derive(Deserialize, Default)]
struct InstanceMetadata {
    #[serde(default, rename = "cluster-name", alias = "clusterName")]
    cluster_name: Option<String>,
    #[serde(default, rename = "cluster-location", alias = "clusterLocation")]
    cluster_location: Option<String>,
}

#[derive(Deserialize, Default)]
struct ProjectMetadata {
    #[serde(default, rename = "project-id", alias = "projectId")]
    project_id: Option<String>,
}

/// Probe the metadata service and remember the cluster identity. Failures
/// are logged and disable the integration for the process lifetime.
pub async fn init(enabled: bool) {
    if !enabled {
        let _ = IDENTITY.set(None);
        return;
    }
    info!(integration = "gke", "initializing GKE integration");
    match probe().await {
        Ok(identity) => {
            info!(
                integration = "gke",
                cluster = identity.cluster_name,
                location = identity.cluster_location,
                project = identity.project_id,
                "GKE cluster identity detected"
            );
            sentry::configure_scope(|scope| {
                scope.set_tag("gke_cluster_name", &identity.cluster_name);
                scope.set_tag("gke_cluster_location", &identity.cluster_location);
                scope.set_tag("gke_project_name", &identity.project_id);
            });
            let _ = IDENTITY.set(Some(identity));
        }
        Err(err) => {
            warn!(integration = "gke", error = %err, "error initializing GKE integration");
            let _ = IDENTITY.set(None);
        }
    }
}

async fn probe() -> Result<GkeIdentity, reqwest::Error> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()?;

    let instance: InstanceMetadata = client
        .get(INSTANCE_METADATA_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?
        .json()
        .await?;
    let project: ProjectMetadata = client
        .get(PROJECT_METADATA_URL)
        .header("Metadata-Flavor", "Google")
        .send()
        .await?
        .json()
        .await?;

    Ok(GkeIdentity {
        cluster_name: instance.cluster_name.unwrap_or_default(),
        cluster_location: instance.cluster_location.unwrap_or_default(),
        project_id: project.project_id.unwrap_or_default(),
    })
}

/// Attach the GKE context with a "Pod Logs" deep-link, when the integration
/// is active and the identity is complete.
pub fn attach_pod_log_link(draft: &mut IncidentDraft, pod_name: &str, namespace: &str) {
    let Some(Some(identity)) = IDENTITY.get() else {
        return;
    };
    let Some(log_link) = identity.pod_logs_link(pod_name, namespace) else {
        return;
    };

    let mut entries = vec![
        (
            "Cluster name",
            Value::String(identity.cluster_name.clone()),
        ),
        (
            "Cluster location",
            Value::String(identity.cluster_location.clone()),
        ),
        ("GCP project", Value::String(identity.project_id.clone())),
        ("Pod Logs", Value::String(log_link)),
    ];
    if let Some(cluster_url) = identity.cluster_url() {
        entries.push(("Cluster URL", Value::String(cluster_url)));
    }
    draft.set_context(CONTEXT_NAME, entries);
}

impl GkeIdentity {
    fn is_complete(&self) -> bool {
        !self.cluster_name.is_empty()
            && !self.cluster_location.is_empty()
            && !self.project_id.is_empty()
    }

    fn cluster_url(&self) -> Option<String> {
        if !self.is_complete() {
            return None;
        }
        Some(format!(
            "https://console.cloud.google.com/kubernetes/clusters/details/{}/{}/details?project={}",
            self.cluster_location, self.cluster_name, self.project_id
        ))
    }

    fn pod_logs_link(&self, pod_name: &str, namespace: &str) -> Option<String> {
        if pod_name.is_empty() || namespace.is_empty() || !self.is_complete() {
            return None;
        }
        Some(format!(
            "https://console.cloud.google.com/logs/query;query=\
             resource.type%3D%22k8s_container%22%0A\
             resource.labels.project_id%3D%22{project}%22%0A\
             resource.labels.location%3D%22{location}%22%0A\
             resource.labels.cluster_name%3D%22{cluster}%22%0A\
             resource.labels.namespace_name%3D%22{namespace}%22%0A\
             resource.labels.pod_name%3D%22{pod}%22%0A\
             ;duration=PT1H?project={project}",
            project = self.project_id,
            location = self.cluster_location,
            cluster = self.cluster_name,
            namespace = namespace,
            pod = pod_name,
        ))
    }
}
