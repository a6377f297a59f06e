//! The events watcher family.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;
use sentry::Hub;
use tracing::{debug, error, warn};

use super::{EVENTS_WATCHER, WATCHER_TAG};
use crate::context::{AgentContext, WatchTarget};
use crate::enrich;
use crate::errors::{AgentError, Result};

/// Watch cluster events in one namespace, forever.
///
/// Each iteration starts with a fresh cutoff (unless historical mode is on)
/// so events that fired while the watcher was down are not re-sent.
pub async fn run_events_watcher(ctx: Arc<AgentContext>, target: WatchTarget) {
    let hub = Arc::new(Hub::new_from_top(Hub::main()));
    loop {
        let cutoff = if ctx.settings.watch_historical {
            debug!(namespace = %target, watcher = EVENTS_WATCHER, "watching all available events");
            None
        } else {
            let now = Utc::now();
            debug!(
                namespace = %target,
                watcher = EVENTS_WATCHER,
                cutoff = %now,
                "watching events starting from the cutoff"
            );
            Some(now)
        };
        if let Err(err) = watch_events(&ctx, &target, cutoff, &hub).await {
            error!(
                namespace = %target,
                watcher = EVENTS_WATCHER,
                error = %err,
                "error while watching events"
            );
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

async fn watch_events(
    ctx: &AgentContext,
    target: &WatchTarget,
    cutoff: Option<DateTime<Utc>>,
    hub: &Arc<Hub>,
) -> Result<()> {
    let api: Api<Event> = target.api(ctx.client.clone());
    debug!(namespace = %target, "opening the event watch stream");
    let mut stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .boxed();

    while let Some(delivery) = stream.next().await {
        match delivery {
            Ok(watcher::Event::Apply(event)) | Ok(watcher::Event::InitApply(event)) => {
                handle_event(ctx, hub, &event, cutoff).await;
            }
            Ok(_) => {}
            Err(err) => {
                // The watcher resumes from the last resource version on its
                // own; anything it still reports is worth a log line.
                let err = super::classify_watch_error(&err);
                warn!(namespace = %target, error = %err, "skipping an event watch delivery");
            }
        }
    }

    Err(AgentError::WatchTerminated(
        "event watch stream ended".to_string(),
    ))
}

/// Process one delivery, then record the event in the recent-event ring —
/// dropped events too, so later incidents can use them as breadcrumbs.
async fn handle_event(
    ctx: &AgentContext,
    hub: &Arc<Hub>,
    event: &Event,
    cutoff: Option<DateTime<Utc>>,
) {
    process_event(ctx, hub, event, cutoff).await;
    ctx.ring.add(event);
}

/// An event is too old when its timestamp (last-seen, falling back to the
/// event time) exists and is strictly earlier than the cutoff. Events
/// without any timestamp are never dropped by age.
pub fn is_too_old(event: &Event, cutoff: Option<DateTime<Utc>>) -> bool {
    let Some(cutoff) = cutoff else {
        return false;
    };
    let event_ts = event
        .last_timestamp
        .as_ref()
        .map(|t| t.0)
        .or_else(|| event.event_time.as_ref().map(|t| t.0));
    match event_ts {
        Some(ts) => ts < cutoff,
        None => false,
    }
}

async fn process_event(
    ctx: &AgentContext,
    hub: &Arc<Hub>,
    event: &Event,
    cutoff: Option<DateTime<Utc>>,
) {
    if is_too_old(event, cutoff) {
        debug!("ignoring an event because it is too old");
        return;
    }

    if event.type_.as_deref() == Some("Normal") {
        debug!("skipping an event of type Normal");
        return;
    }

    if ctx.filters.should_drop(event) {
        debug!(
            reason = event.reason.as_deref().unwrap_or_default(),
            "skipping a filtered event"
        );
        return;
    }

    // Never capture through a shared hub; every incident gets its own clone
    // so a routed client binding cannot leak across deliveries.
    let hub = Arc::new(Hub::new_from_top(hub));

    let involved = enrich::resolve_involved(ctx.store.as_ref(), event).await;
    if let Some(workload) = &involved {
        match ctx.router.client_for(ctx.store.as_ref(), workload).await {
            Ok(Some(client)) => hub.bind_client(Some(client)),
            Ok(None) => {}
            Err(err) => warn!(error = %err, "routing failed, using the default client"),
        }
    }

    let mut draft = enrich::enrich_cluster_event(&ctx.enrich(), event, involved.as_ref()).await;
    draft.set_tag(WATCHER_TAG, EVENTS_WATCHER);
    hub.capture_event(draft.freeze());
}
