//! Agent entry point: configuration, SDK and cluster bootstrap, then the
//! watcher supervisor until a shutdown signal arrives.

use std::sync::Arc;

use anyhow::Context as _;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sentry_kubernetes_agent::{
    cluster, integrations::gke, patterns, sentry_ext, settings::Settings, supervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::from_env().context("invalid configuration")?;

    // RUST_LOG wins over LOG_LEVEL when both are set.
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(settings.log_directive.clone())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting sentry-kubernetes-agent"
    );

    patterns::validate_patterns().context("invalid message pattern table")?;

    let _sentry_guard = sentry_ext::init_sdk();
    sentry_ext::apply_global_tags();
    gke::init(settings.gke_integration).await;

    let config = cluster::load_cluster_config(&settings)
        .await
        .context("cluster config discovery failed")?;
    let client = kube::Client::try_from(config.clone())
        .context("cannot construct the Kubernetes client")?;
    sentry_ext::set_kubernetes_context(&config, &client).await;

    supervisor::run(client, Arc::new(settings)).await;
    Ok(())
}
