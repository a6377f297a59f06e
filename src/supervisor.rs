//! Watcher supervision.
//!
//! One task per (namespace × watcher family). The watcher loops handle
//! stream errors themselves; the supervisor's job is panic isolation: a
//! crashed task is logged, rested and respawned without touching its
//! siblings.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};

use crate::context::{AgentContext, WatchTarget};
use crate::crons::CronsState;
use crate::filters::EventFilter;
use crate::informers;
use crate::ring::RecentEventRing;
use crate::router::DsnRouter;
use crate::settings::Settings;
use crate::watchers::{run_events_watcher, run_pods_watcher, EVENTS_WATCHER, PODS_WATCHER};
use crate::workload::ClusterStore;

const RESTART_DELAY: Duration = Duration::from_secs(1);

/// Spawn every watcher and informer, then wait for a shutdown signal.
pub async fn run(client: kube::Client, settings: Arc<Settings>) {
    let ring = Arc::new(RecentEventRing::default());
    let filters = Arc::new(EventFilter::from_settings(&settings));
    let router = Arc::new(DsnRouter::new(settings.custom_dsns));
    let crons = Arc::new(CronsState::new());

    for target in WatchTarget::from_scope(&settings.scope) {
        // Blocks until the informer caches have completed their initial
        // sync; a failed sync leaves owner lookups on the API server.
        let hub = match informers::start_informers(
            client.clone(),
            &target,
            settings.monitor_cronjobs,
            crons.clone(),
            router.clone(),
        )
        .await
        {
            Ok(hub) => Some(hub),
            Err(err) => {
                error!(namespace = %target, error = %err, "informer startup failed");
                None
            }
        };
        let store = Arc::new(ClusterStore::new(client.clone(), hub));

        let ctx = Arc::new(AgentContext {
            client: client.clone(),
            settings: settings.clone(),
            ring: ring.clone(),
            filters: filters.clone(),
            router: router.clone(),
            crons: crons.clone(),
            store,
        });

        info!(namespace = %target, "starting watchers");
        spawn_supervised(EVENTS_WATCHER, {
            let ctx = ctx.clone();
            let target = target.clone();
            move || run_events_watcher(ctx.clone(), target.clone())
        });
        spawn_supervised(PODS_WATCHER, {
            let ctx = ctx.clone();
            let target = target.clone();
            move || run_pods_watcher(ctx.clone(), target.clone())
        });
    }

    shutdown_signal().await;
    info!("shutdown signal received, stopping");
}

/// Run `make()` in its own task and respawn it if it ever panics or
/// returns.
fn spawn_supervised<F, Fut>(name: &'static str, make: F)
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let task = tokio::spawn(make());
            match task.await {
                Ok(()) => warn!(watcher = name, "watcher task exited; restarting"),
                Err(err) if err.is_panic() => {
                    error!(watcher = name, "watcher task panicked; restarting");
                }
                Err(_) => return,
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received Ctrl+C"),
        () = terminate => info!("received SIGTERM"),
    }
}
