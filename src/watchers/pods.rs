//! The pods watcher family.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use sentry::Hub;
use tracing::{debug, error, warn};

use super::{PODS_WATCHER, WATCHER_TAG};
use crate::context::{AgentContext, WatchTarget};
use crate::enrich;
use crate::errors::{AgentError, Result};
use crate::workload::Workload;

/// Watch pod modifications in one namespace, forever.
pub async fn run_pods_watcher(ctx: Arc<AgentContext>, target: WatchTarget) {
    let hub = Arc::new(Hub::new_from_top(Hub::main()));
    loop {
        if let Err(err) = watch_pods(&ctx, &target, &hub).await {
            error!(
                namespace = %target,
                watcher = PODS_WATCHER,
                error = %err,
                "error while watching pods"
            );
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn watch_pods(ctx: &AgentContext, target: &WatchTarget, hub: &Arc<Hub>) -> Result<()> {
    let api: Api<Pod> = target.api(ctx.client.clone());
    debug!(namespace = %target, "opening the pod watch stream");
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(delivery) = stream.next().await {
        match delivery {
            // Only live modifications; the initial listing would replay
            // terminations that predate the watcher.
            Ok(watcher::Event::Apply(pod)) => handle_pod(ctx, hub, &pod).await,
            Ok(_) => {}
            Err(err) => {
                let err = super::classify_watch_error(&err);
                warn!(namespace = %target, error = %err, "skipping a pod watch delivery");
            }
        }
    }

    Err(AgentError::WatchTerminated(
        "pod watch stream ended".to_string(),
    ))
}

async fn handle_pod(ctx: &AgentContext, hub: &Arc<Hub>, pod: &Pod) {
    if pod.metadata.deletion_timestamp.is_some() {
        debug!("pod is about to be deleted; ignoring state modifications");
        return;
    }

    let Some(statuses) = pod.status.as_ref().and_then(|s| s.container_statuses.as_ref()) else {
        return;
    };

    for status in statuses {
        let Some(terminated) = status.state.as_ref().and_then(|s| s.terminated.as_ref()) else {
            continue;
        };
        if terminated.exit_code == 0 {
            continue;
        }

        let hub = Arc::new(Hub::new_from_top(hub));
        let workload = Workload::Pod(pod.clone());
        match ctx.router.client_for(ctx.store.as_ref(), &workload).await {
            Ok(Some(client)) => hub.bind_client(Some(client)),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "routing failed, using the default client"),
        }

        if let Some(mut draft) = enrich::enrich_pod_termination(&ctx.enrich(), pod, status).await {
            draft.set_tag(WATCHER_TAG, PODS_WATCHER);
            hub.capture_event(draft.freeze());
        }
    }
}
