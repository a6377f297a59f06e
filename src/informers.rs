//! Cached mirrors of the workload controllers in a watched namespace.
//!
//! One reflector store per resource kind. The cronjob and job streams
//! additionally drive the heartbeat coordinator when cron monitoring is
//! enabled; the replicaset and deployment mirrors exist purely so owner
//! lookups stay off the API server.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet};
use k8s_openapi::api::batch::v1::{CronJob, Job};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::context::WatchTarget;
use crate::crons::{self, CronsState};
use crate::errors::{AgentError, Result};
use crate::router::DsnRouter;
use crate::workload::{ClusterStore, Workload, WorkloadKind};

pub struct InformerHub {
    cronjobs: Store<CronJob>,
    jobs: Store<Job>,
    replicasets: Store<ReplicaSet>,
    deployments: Store<Deployment>,
}

impl InformerHub {
    /// Cache lookup by (kind, namespace, name). Pods are not mirrored;
    /// their lookups always go to the API server.
    pub fn lookup(&self, kind: WorkloadKind, namespace: &str, name: &str) -> Option<Workload> {
        match kind {
            WorkloadKind::Pod => None,
            WorkloadKind::CronJob => self
                .cronjobs
                .get(&ObjectRef::new(name).within(namespace))
                .map(|obj| Workload::CronJob((*obj).clone())),
            WorkloadKind::Job => self
                .jobs
                .get(&ObjectRef::new(name).within(namespace))
                .map(|obj| Workload::Job((*obj).clone())),
            WorkloadKind::ReplicaSet => self
                .replicasets
                .get(&ObjectRef::new(name).within(namespace))
                .map(|obj| Workload::ReplicaSet((*obj).clone())),
            WorkloadKind::Deployment => self
                .deployments
                .get(&ObjectRef::new(name).within(namespace))
                .map(|obj| Workload::Deployment((*obj).clone())),
        }
    }
}

/// Spawn the informer drivers for one watch target and return the hub.
///
/// Delivery runs in background tasks, but this function does not return
/// until every cache has completed its initial sync, so callers can rely
/// on the mirrors from the first lookup onwards.
pub async fn start_informers(
    client: Client,
    target: &WatchTarget,
    crons_enabled: bool,
    crons: Arc<CronsState>,
    router: Arc<DsnRouter>,
) -> Result<Arc<InformerHub>> {
    let (cronjob_reader, cronjob_writer) = reflector::store::<CronJob>();
    let (job_reader, job_writer) = reflector::store::<Job>();
    let (replicaset_reader, replicaset_writer) = reflector::store::<ReplicaSet>();
    let (deployment_reader, deployment_writer) = reflector::store::<Deployment>();

    let hub = Arc::new(InformerHub {
        cronjobs: cronjob_reader.clone(),
        jobs: job_reader.clone(),
        replicasets: replicaset_reader.clone(),
        deployments: deployment_reader.clone(),
    });
    let store = Arc::new(ClusterStore::new(client.clone(), Some(hub.clone())));

    // Cronjob stream: mirror plus monitor registration.
    {
        let crons = crons.clone();
        let api: Api<CronJob> = target.api(client.clone());
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(cronjob_writer)
            .boxed();
        tokio::spawn(async move {
            while let Some(delivery) = stream.next().await {
                match delivery {
                    Ok(watcher::Event::Apply(cronjob))
                    | Ok(watcher::Event::InitApply(cronjob)) => {
                        if crons_enabled {
                            crons.upsert_cronjob(&cronjob);
                        }
                    }
                    Ok(watcher::Event::Delete(cronjob)) => {
                        if crons_enabled {
                            if let Some(name) = cronjob.metadata.name.as_deref() {
                                crons.remove_cronjob(name);
                            }
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "cronjob informer stream error"),
                }
            }
        });
    }

    // Job stream: mirror plus check-in dispatch.
    {
        let crons = crons.clone();
        let store = store.clone();
        let api: Api<Job> = target.api(client.clone());
        let mut stream = watcher(api, watcher::Config::default())
            .default_backoff()
            .reflect(job_writer)
            .boxed();
        tokio::spawn(async move {
            while let Some(delivery) = stream.next().await {
                match delivery {
                    Ok(watcher::Event::Apply(job)) | Ok(watcher::Event::InitApply(job)) => {
                        if crons_enabled {
                            crons::handle_job_event(&crons, &router, store.as_ref(), &job).await;
                        }
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "job informer stream error"),
                }
            }
        });
    }

    spawn_mirror(target.api::<ReplicaSet>(client.clone()), replicaset_writer);
    spawn_mirror(target.api::<Deployment>(client), deployment_writer);

    let ready = tokio::join!(
        cronjob_reader.wait_until_ready(),
        job_reader.wait_until_ready(),
        replicaset_reader.wait_until_ready(),
        deployment_reader.wait_until_ready(),
    );
    match ready {
        (Ok(()), Ok(()), Ok(()), Ok(())) => {
            info!(namespace = %target, "informer caches synced");
            Ok(hub)
        }
        _ => Err(AgentError::WatchTerminated(format!(
            "informer caches failed to sync in {target}"
        ))),
    }
}

/// Drive a handler-less reflector; the store is the whole point.
fn spawn_mirror<K>(api: Api<K>, writer: reflector::store::Writer<K>)
where
    K: kube::Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .boxed();
    tokio::spawn(async move {
        while let Some(delivery) = stream.next().await {
            if let Err(err) = delivery {
                warn!(error = %err, "informer stream error");
            }
        }
    });
}
