//! Root-owner resolution over the owner-reference graph.

use std::future::Future;
use std::pin::Pin;

use crate::errors::{AgentError, Result};
use crate::workload::{Workload, WorkloadKind, WorkloadStore};

/// Owner graphs in real clusters are one or two levels deep; anything past
/// this bound is treated as a malformed (cyclic) graph.
pub const MAX_OWNER_DEPTH: usize = 16;

/// Find the root owners of `workload` by depth-first search over its owner
/// references, first parent first.
///
/// Returns the empty list when the object has no owners at all, so callers
/// never re-enhance an object as its own root. A parent that cannot be
/// retrieved fails the whole resolution with `OwnerLookupFailed`.
pub async fn find_root_owners(
    store: &dyn WorkloadStore,
    workload: &Workload,
) -> Result<Vec<Workload>> {
    if workload.owner_references().is_empty() {
        return Ok(Vec::new());
    }
    let mut roots = Vec::new();
    collect_roots(store, workload, 0, &mut roots).await?;
    Ok(roots)
}

fn collect_roots<'a>(
    store: &'a dyn WorkloadStore,
    workload: &'a Workload,
    depth: usize,
    roots: &'a mut Vec<Workload>,
) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
    Box::pin(async move {
        if depth >= MAX_OWNER_DEPTH {
            return Err(AgentError::OwnerGraphTooDeep {
                name: workload.name().to_string(),
                limit: MAX_OWNER_DEPTH,
            });
        }

        let parents = workload.owner_references();
        if parents.is_empty() {
            roots.push(workload.clone());
            return Ok(());
        }

        for parent in parents {
            let kind = WorkloadKind::parse(&parent.kind).ok_or_else(|| {
                AgentError::OwnerLookupFailed {
                    kind: parent.kind.clone(),
                    namespace: workload.namespace().to_string(),
                    name: parent.name.clone(),
                }
            })?;
            let parent_obj = store.get(kind, workload.namespace(), &parent.name).await?;
            collect_roots(store, &parent_obj, depth + 1, roots).await?;
        }
        Ok(())
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
    use k8s_openapi::api::batch::v1::{CronJob, Job};
    use k8s_openapi::api::core::v1::Pod;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    use super::*;

    /// In-memory store keyed by (kind, namespace, name).
    #[derive(Default)]
    pub struct MapStore {
        objects: HashMap<(WorkloadKind, String, String), Workload>,
    }

    impl MapStore {
        pub fn insert(&mut self, workload: Workload) {
            let key = (
                workload.kind(),
                workload.namespace().to_string(),
                workload.name().to_string(),
            );
            self.objects.insert(key, workload);
        }
    }

    #[async_trait]
    impl WorkloadStore for MapStore {
        async fn get(
            &self,
            kind: WorkloadKind,
            namespace: &str,
            name: &str,
        ) -> Result<Workload> {
            self.objects
                .get(&(kind, namespace.to_string(), name.to_string()))
                .cloned()
                .ok_or_else(|| AgentError::OwnerLookupFailed {
                    kind: kind.as_str().to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
        }
    }

    pub fn meta(namespace: &str, name: &str, owners: Vec<(&str, &str)>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            owner_references: if owners.is_empty() {
                None
            } else {
                Some(
                    owners
                        .into_iter()
                        .map(|(kind, name)| OwnerReference {
                            kind: kind.to_string(),
                            name: name.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                )
            },
            ..Default::default()
        }
    }

    pub fn pod(namespace: &str, name: &str, owners: Vec<(&str, &str)>) -> Workload {
        Workload::Pod(Pod {
            metadata: meta(namespace, name, owners),
            ..Default::default()
        })
    }

    pub fn replicaset(namespace: &str, name: &str, owners: Vec<(&str, &str)>) -> Workload {
        Workload::ReplicaSet(ReplicaSet {
            metadata: meta(namespace, name, owners),
            ..Default::default()
        })
    }

    pub fn deployment(namespace: &str, name: &str, owners: Vec<(&str, &str)>) -> Workload {
        Workload::Deployment(Deployment {
            metadata: meta(namespace, name, owners),
            ..Default::default()
        })
    }

    pub fn job(namespace: &str, name: &str, owners: Vec<(&str, &str)>) -> Workload {
        Workload::Job(Job {
            metadata: meta(namespace, name, owners),
            ..Default::default()
        })
    }

    pub fn cronjob(namespace: &str, name: &str) -> Workload {
        Workload::CronJob(CronJob {
            metadata: meta(namespace, name, vec![]),
            ..Default::default()
        })
    }
}
