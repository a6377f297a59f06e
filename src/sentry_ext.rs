//! Sentry SDK wiring: initialization, global tags, cluster context.

use std::borrow::Cow;
use std::sync::Arc;

use sentry::protocol::{ClientSdkInfo, Context, Map, Value};
use tracing::{debug, error, info, warn};

use crate::settings::Settings;

const SDK_NAME: &str = "sentry-kubernetes-agent";

/// Initialize the SDK from the ambient environment (`SENTRY_DSN` and
/// friends). The returned guard must stay alive for the process lifetime.
pub fn init_sdk() -> sentry::ClientInitGuard {
    debug!("initializing the Sentry SDK");
    let guard = sentry::init(sentry::ClientOptions {
        debug: true,
        before_send: Some(Arc::new(|mut event| {
            event.sdk = Some(Cow::Owned(ClientSdkInfo {
                name: SDK_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                integrations: Vec::new(),
                packages: Vec::new(),
            }));
            event.release = None;
            event.server_name = None;
            Some(event)
        })),
        ..Default::default()
    });

    if guard.is_enabled() {
        debug!("Sentry SDK initialized");
    } else {
        warn!("no Sentry DSN specified, events will not be sent");
    }
    guard
}

/// Copy `GLOBAL_TAG_*` environment variables onto the main scope so every
/// outgoing incident carries them.
pub fn apply_global_tags() {
    let tags = Settings::global_tags();
    sentry::configure_scope(|scope| {
        for (key, value) in &tags {
            info!(tag = key, value, "global tag detected");
            scope.set_tag(key, value);
        }
    });
}

/// Attach a "Kubernetes" context block describing the connected cluster.
pub async fn set_kubernetes_context(config: &kube::Config, client: &kube::Client) {
    let mut entries = Map::new();
    entries.insert(
        "API endpoint".to_string(),
        Value::String(config.cluster_url.to_string()),
    );
    match client.apiserver_version().await {
        Ok(version) => {
            entries.insert(
                "Server version".to_string(),
                Value::String(version.git_version),
            );
        }
        Err(err) => error!(error = %err, "error while getting cluster version"),
    }
    sentry::configure_scope(|scope| {
        scope.set_context("Kubernetes", Context::Other(entries));
    });
}
