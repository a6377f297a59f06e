//! Typed view over the workload kinds the agent understands.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Api, Client};

use crate::errors::{AgentError, Result};
use crate::informers::InformerHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    ReplicaSet,
    Deployment,
    Job,
    CronJob,
}

impl WorkloadKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Pod" => Some(Self::Pod),
            "ReplicaSet" => Some(Self::ReplicaSet),
            "Deployment" => Some(Self::Deployment),
            "Job" => Some(Self::Job),
            "CronJob" => Some(Self::CronJob),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "Pod",
            Self::ReplicaSet => "ReplicaSet",
            Self::Deployment => "Deployment",
            Self::Job => "Job",
            Self::CronJob => "CronJob",
        }
    }

    /// Lowercase form used in fingerprints and breadcrumb messages.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::ReplicaSet => "replicaset",
            Self::Deployment => "deployment",
            Self::Job => "job",
            Self::CronJob => "cronjob",
        }
    }

    /// Tag key carrying the object name, e.g. `replicaset_name`.
    pub fn name_tag(self) -> &'static str {
        match self {
            Self::Pod => "pod_name",
            Self::ReplicaSet => "replicaset_name",
            Self::Deployment => "deployment_name",
            Self::Job => "job_name",
            Self::CronJob => "cronjob_name",
        }
    }
}

/// Tagged variant over the five workload kinds; the per-kind enrichment is
/// selection over this tag.
#[derive(Debug, Clone)]
pub enum Workload {
    Pod(Pod),
    ReplicaSet(ReplicaSet),
    Deployment(Deployment),
    Job(Job),
    CronJob(CronJob),
}

impl Workload {
    pub fn kind(&self) -> WorkloadKind {
        match self {
            Self::Pod(_) => WorkloadKind::Pod,
            Self::ReplicaSet(_) => WorkloadKind::ReplicaSet,
            Self::Deployment(_) => WorkloadKind::Deployment,
            Self::Job(_) => WorkloadKind::Job,
            Self::CronJob(_) => WorkloadKind::CronJob,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Pod(o) => &o.metadata,
            Self::ReplicaSet(o) => &o.metadata,
            Self::Deployment(o) => &o.metadata,
            Self::Job(o) => &o.metadata,
            Self::CronJob(o) => &o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata().uid.as_deref().unwrap_or_default()
    }

    pub fn owner_references(&self) -> &[OwnerReference] {
        self.metadata()
            .owner_references
            .as_deref()
            .unwrap_or_default()
    }

    pub fn annotations(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata().annotations.as_ref()
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata().creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Pretty-printed object metadata with managed fields stripped, for
    /// context blocks.
    pub fn metadata_json(&self) -> Option<String> {
        let mut metadata = self.metadata().clone();
        metadata.managed_fields = None;
        serde_json::to_string_pretty(&metadata).ok()
    }
}

/// Object store by (kind, namespace, name).
///
/// The cluster-backed implementation consults the informer mirror first and
/// falls back to a live API read; tests substitute an in-memory map.
/// Returned objects must not be retained across handler invocations.
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    async fn get(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Workload>;
}

/// Informer-cache-first store over the live cluster.
pub struct ClusterStore {
    client: Client,
    informers: Option<Arc<InformerHub>>,
}

impl ClusterStore {
    pub fn new(client: Client, informers: Option<Arc<InformerHub>>) -> Self {
        Self { client, informers }
    }

    fn lookup_error(kind: WorkloadKind, namespace: &str, name: &str) -> AgentError {
        AgentError::OwnerLookupFailed {
            kind: kind.as_str().to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl WorkloadStore for ClusterStore {
    async fn get(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Result<Workload> {
        if let Some(informers) = &self.informers {
            if let Some(workload) = informers.lookup(kind, namespace, name) {
                return Ok(workload);
            }
        }

        let client = self.client.clone();
        let missing = |_| Self::lookup_error(kind, namespace, name);
        match kind {
            WorkloadKind::Pod => Api::<Pod>::namespaced(client, namespace)
                .get(name)
                .await
                .map(Workload::Pod)
                .map_err(missing),
            WorkloadKind::ReplicaSet => Api::<ReplicaSet>::namespaced(client, namespace)
                .get(name)
                .await
                .map(Workload::ReplicaSet)
                .map_err(missing),
            WorkloadKind::Deployment => Api::<Deployment>::namespaced(client, namespace)
                .get(name)
                .await
                .map(Workload::Deployment)
                .map_err(missing),
            WorkloadKind::Job => Api::<Job>::namespaced(client, namespace)
                .get(name)
                .await
                .map(Workload::Job)
                .map_err(missing),
            WorkloadKind::CronJob => Api::<CronJob>::namespaced(client, namespace)
                .get(name)
                .await
                .map(Workload::CronJob)
                .map_err(missing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trip() {
        for kind in [
            WorkloadKind::Pod,
            WorkloadKind::ReplicaSet,
            WorkloadKind::Deployment,
            WorkloadKind::Job,
            WorkloadKind::CronJob,
        ] {
            assert_eq!(WorkloadKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(WorkloadKind::parse("Node"), None);
    }

    #[test]
    fn metadata_json_strips_managed_fields() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                managed_fields: Some(vec![Default::default()]),
                ..Default::default()
            },
            ..Default::default()
        };
        let json = Workload::Pod(pod).metadata_json().unwrap();
        assert!(json.contains("\"web\""));
        assert!(!json.contains("managedFields"));
    }
}
