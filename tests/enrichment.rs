//! End-to-end enrichment scenarios driven through an in-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::batch::v1::{CronJob, Job};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateTerminated, ContainerStatus, Event, ObjectReference, Pod,
    PodSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};

use sentry_kubernetes_agent::crons::CronsState;
use sentry_kubernetes_agent::enrich::{
    enrich_cluster_event, enrich_pod_termination, resolve_involved, EnrichContext,
};
use sentry_kubernetes_agent::errors::AgentError;
use sentry_kubernetes_agent::ring::RecentEventRing;
use sentry_kubernetes_agent::workload::{Workload, WorkloadKind, WorkloadStore};

#[derive(Default)]
struct MapStore {
    objects: HashMap<(WorkloadKind, String, String), Workload>,
}

impl MapStore {
    fn insert(&mut self, workload: Workload) {
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
    ) -> Result<Workload, AgentError> {
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

fn meta(namespace: &str, name: &str, owners: Vec<(&str, &str)>) -> ObjectMeta {
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

fn pod_on_node(namespace: &str, name: &str, node: &str, owners: Vec<(&str, &str)>) -> Pod {
    Pod {
        metadata: meta(namespace, name, owners),
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn warning_event(namespace: &str, message: &str, kind: &str, name: &str) -> Event {
    Event {
        metadata: ObjectMeta {
            name: Some(format!("{name}.17541619a910bfcd")),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        involved_object: ObjectReference {
            kind: Some(kind.to_string()),
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-{name}")),
            ..Default::default()
        },
        message: Some(message.to_string()),
        reason: Some("Killing".to_string()),
        type_: Some("Warning".to_string()),
        ..Default::default()
    }
}

fn terminated_status(container: &str, exit_code: i32, reason: &str) -> ContainerStatus {
    ContainerStatus {
        name: container.to_string(),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code,
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

struct Fixture {
    store: MapStore,
    ring: RecentEventRing,
    crons: CronsState,
}

impl Fixture {
    fn new() -> Self {
        Self {
            store: MapStore::default(),
            ring: RecentEventRing::default(),
            crons: CronsState::new(),
        }
    }

    fn ctx(&self) -> EnrichContext<'_> {
        EnrichContext {
            store: &self.store,
            ring: &self.ring,
            crons: &self.crons,
        }
    }
}

#[tokio::test]
async fn oom_killed_pod_owned_by_a_replicaset() {
    let mut fixture = Fixture::new();
    fixture.store.insert(Workload::Pod(pod_on_node(
        "default",
        "worker-abc",
        "node-1",
        vec![("ReplicaSet", "worker-rs")],
    )));
    fixture.store.insert(Workload::ReplicaSet(ReplicaSet {
        metadata: meta("default", "worker-rs", vec![]),
        ..Default::default()
    }));

    let event = warning_event(
        "default",
        "Memory cgroup out of memory: Killed process 1234 (python3).",
        "Pod",
        "worker-abc",
    );
    let involved = resolve_involved(&fixture.store, &event).await;
    assert!(involved.is_some());

    let draft = enrich_cluster_event(&fixture.ctx(), &event, involved.as_ref()).await;

    // The pattern owns the issue identity; owners do not extend it.
    assert_eq!(draft.fingerprint().len(), 2);
    assert!(draft.fingerprint()[0].contains("Memory cgroup out of memory"));
    assert_eq!(draft.fingerprint()[1], "python3");

    assert_eq!(draft.tag("replicaset_name"), Some("worker-rs"));
    assert_eq!(draft.tag("pod_name"), None);
    assert_eq!(draft.tag("node_name"), Some("node-1"));
    assert_eq!(
        draft.message,
        "worker-abc: Memory cgroup out of memory: Killed process 1234 (python3)."
    );
}

#[tokio::test]
async fn standalone_pod_container_exit_137() {
    let fixture = Fixture::new();
    let pod = pod_on_node("default", "debug", "node-2", vec![]);
    let status = terminated_status("main", 137, "Error");

    let draft = enrich_pod_termination(&fixture.ctx(), &pod, &status)
        .await
        .expect("non-zero termination must produce an incident");

    assert_eq!(draft.message, "debug: Error: container \"main\"");
    assert_eq!(
        draft.fingerprint(),
        ["Error: container \"main\"", "debug"]
    );
    assert_eq!(draft.tag("event_source_component"), Some("x-pod-controller"));
    assert_eq!(draft.tag("pod_name"), Some("debug"));
    assert_eq!(draft.tag("container_name"), Some("main"));
}

#[tokio::test]
async fn zero_exit_terminations_produce_nothing() {
    let fixture = Fixture::new();
    let pod = pod_on_node("default", "debug", "node-2", vec![]);
    let status = terminated_status("main", 0, "Completed");
    assert!(enrich_pod_termination(&fixture.ctx(), &pod, &status)
        .await
        .is_none());
}

#[tokio::test]
async fn owned_pods_group_by_their_root_owner() {
    let mut fixture = Fixture::new();
    fixture.store.insert(Workload::ReplicaSet(ReplicaSet {
        metadata: meta("default", "worker-rs", vec![]),
        ..Default::default()
    }));
    let pod = pod_on_node(
        "default",
        "worker-abc",
        "node-1",
        vec![("ReplicaSet", "worker-rs")],
    );
    let status = terminated_status("app", 1, "Error");

    let draft = enrich_pod_termination(&fixture.ctx(), &pod, &status)
        .await
        .unwrap();

    // No (Pod, name) pair; identity comes from the root.
    assert_eq!(
        draft.fingerprint(),
        [
            "Error: container \"app\"",
            "replicaset",
            "worker-rs"
        ]
    );
    assert_eq!(draft.tag("replicaset_name"), Some("worker-rs"));
}

#[tokio::test]
async fn pod_of_a_monitored_cronjob_groups_under_the_monitor() {
    let mut fixture = Fixture::new();
    fixture.store.insert(Workload::Job(Job {
        metadata: meta(
            "default",
            "nightly-backup-28123000",
            vec![("CronJob", "nightly-backup")],
        ),
        ..Default::default()
    }));
    fixture.store.insert(Workload::CronJob(CronJob {
        metadata: meta("default", "nightly-backup", vec![]),
        ..Default::default()
    }));
    fixture.crons.upsert_cronjob(&CronJob {
        metadata: meta("default", "nightly-backup", vec![]),
        spec: Some(Default::default()),
        ..Default::default()
    });

    let pod = pod_on_node(
        "default",
        "nightly-backup-28123000-x1",
        "node-3",
        vec![("Job", "nightly-backup-28123000")],
    );
    let status = terminated_status("backup", 2, "Error");

    let draft = enrich_pod_termination(&fixture.ctx(), &pod, &status)
        .await
        .unwrap();

    assert_eq!(draft.tag("cronjob_name"), Some("nightly-backup"));
    assert!(draft.context("Monitor").is_some());
    assert_eq!(
        draft.fingerprint(),
        [
            "Error: container \"backup\"",
            "cronjob",
            "nightly-backup"
        ]
    );
}

#[tokio::test]
async fn unresolvable_involved_objects_still_produce_incidents() {
    let fixture = Fixture::new();
    let event = warning_event("default", "Back-off restarting failed container", "Pod", "gone");

    let involved = resolve_involved(&fixture.store, &event).await;
    assert!(involved.is_none());

    let draft = enrich_cluster_event(&fixture.ctx(), &event, involved.as_ref()).await;
    assert_eq!(
        draft.fingerprint(),
        ["Back-off restarting failed container", "gone"]
    );
    assert_eq!(
        draft.message,
        "gone: Back-off restarting failed container"
    );
}

#[tokio::test]
async fn prior_event_occurrences_become_breadcrumbs() {
    let mut fixture = Fixture::new();
    fixture.store.insert(Workload::Pod(pod_on_node(
        "default",
        "worker-abc",
        "node-1",
        vec![],
    )));

    let event = warning_event("default", "Liveness probe failed: timeout", "Pod", "worker-abc");
    let event_name = event.metadata.name.clone().unwrap();

    // Two prior occurrences recorded as events about this event object.
    for (message, type_) in [("first warning", "Warning"), ("routine note", "Normal")] {
        fixture.ring.add(&Event {
            metadata: ObjectMeta {
                namespace: Some("default".to_string()),
                name: Some(format!("{message}-record")),
                ..Default::default()
            },
            involved_object: ObjectReference {
                kind: Some("Event".to_string()),
                name: Some(event_name.clone()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            message: Some(message.to_string()),
            type_: Some(type_.to_string()),
            last_timestamp: Some(Time(chrono::Utc::now())),
            ..Default::default()
        });
    }

    let involved = resolve_involved(&fixture.store, &event).await;
    let draft = enrich_cluster_event(&fixture.ctx(), &event, involved.as_ref()).await;

    // Two ring breadcrumbs plus the "Created pod" breadcrumb.
    assert_eq!(draft.breadcrumbs().len(), 3);
    assert_eq!(draft.breadcrumbs()[0].message.as_deref(), Some("first warning"));
    assert_eq!(draft.breadcrumbs()[0].level, sentry::Level::Warning);
    assert_eq!(draft.breadcrumbs()[1].level, sentry::Level::Info);
}
