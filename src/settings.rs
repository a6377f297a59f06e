//! Environment-driven configuration.
//!
//! All knobs are plain environment variables; absence or an unrecognized
//! value falls back to the documented default.

use crate::errors::{AgentError, Result};

/// How to obtain the cluster credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterConfigType {
    /// Try in-cluster first, then fall back to a kubeconfig.
    Auto,
    InCluster,
    OutCluster,
}

/// Which namespaces the agent watches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchScope {
    /// Watch every namespace with a single stream per watcher family.
    AllNamespaces,
    Namespaces(Vec<String>),
}

pub const ALL_NAMESPACES_LABEL: &str = "__all__";
const DEFAULT_NAMESPACE: &str = "default";

/// Runtime configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cluster_config_type: ClusterConfigType,
    pub kubeconfig_path: Option<String>,
    pub scope: WatchScope,
    /// When set, the event cutoff is the zero time and old events replay.
    pub watch_historical: bool,
    /// Override for the event-reason drop list; `None` keeps the default.
    pub filter_reasons: Option<Vec<String>>,
    /// Override for the event-source drop list; `None` keeps the default.
    pub filter_sources: Option<Vec<String>>,
    pub monitor_cronjobs: bool,
    pub custom_dsns: bool,
    pub gke_integration: bool,
    /// tracing directive derived from `LOG_LEVEL`.
    pub log_directive: String,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            cluster_config_type: parse_cluster_config_type(&env_trimmed("CLUSTER_CONFIG_TYPE"))?,
            kubeconfig_path: non_empty(env_trimmed("KUBECONFIG_PATH")),
            scope: parse_watch_scope(&env_trimmed("WATCH_NAMESPACES"))?,
            watch_historical: is_truthy(&env_trimmed("WATCH_HISTORICAL")),
            filter_reasons: parse_list(&env_trimmed("FILTER_OUT_EVENT_REASONS")),
            filter_sources: parse_list(&env_trimmed("FILTER_OUT_EVENT_SOURCES")),
            monitor_cronjobs: is_truthy(&env_trimmed("MONITOR_CRONJOBS")),
            custom_dsns: is_truthy(&env_trimmed("CUSTOM_DSNS")),
            gke_integration: is_truthy(&env_trimmed("INTEGRATION_GKE_ENABLED")),
            log_directive: log_directive(&env_trimmed("LOG_LEVEL")),
        })
    }

    /// Global tags from `GLOBAL_TAG_*` environment variables.
    pub fn global_tags() -> Vec<(String, String)> {
        std::env::vars()
            .filter_map(|(key, value)| {
                let tag = key.strip_prefix("GLOBAL_TAG_")?;
                let value = value.trim();
                if tag.is_empty() || value.is_empty() {
                    return None;
                }
                Some((tag.to_string(), value.to_string()))
            })
            .collect()
    }
}

/// Truthy values are {yes, true, 1}, case-insensitive.
pub fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "yes" | "true" | "1")
}

fn env_trimmed(name: &str) -> String {
    std::env::var(name).unwrap_or_default().trim().to_string()
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn parse_cluster_config_type(raw: &str) -> Result<ClusterConfigType> {
    match raw.to_lowercase().as_str() {
        "" | "auto" => Ok(ClusterConfigType::Auto),
        "in-cluster" => Ok(ClusterConfigType::InCluster),
        "out-cluster" => Ok(ClusterConfigType::OutCluster),
        other => Err(AgentError::Config(format!(
            "invalid cluster configuration type: {other:?}"
        ))),
    }
}

fn parse_watch_scope(raw: &str) -> Result<WatchScope> {
    if raw.is_empty() {
        return Ok(WatchScope::Namespaces(vec![DEFAULT_NAMESPACE.to_string()]));
    }
    if raw == ALL_NAMESPACES_LABEL {
        return Ok(WatchScope::AllNamespaces);
    }

    let mut namespaces = Vec::new();
    for part in raw.split(',') {
        let namespace = part.trim();
        if namespace.is_empty() {
            continue;
        }
        if !is_valid_namespace(namespace) {
            return Err(AgentError::Config(format!(
                "invalid namespace name: {namespace:?}"
            )));
        }
        if !namespaces.iter().any(|existing| existing == namespace) {
            namespaces.push(namespace.to_string());
        }
    }
    if namespaces.is_empty() {
        return Err(AgentError::Config("no namespaces specified".to_string()));
    }
    Ok(WatchScope::Namespaces(namespaces))
}

fn parse_list(raw: &str) -> Option<Vec<String>> {
    if raw.is_empty() {
        return None;
    }
    Some(
        raw.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect(),
    )
}

/// Label-value validation: at most 63 characters of [A-Za-z0-9._-], with
/// alphanumeric first and last characters.
fn is_valid_namespace(name: &str) -> bool {
    if name.is_empty() || name.len() > 63 {
        return false;
    }
    let bytes = name.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Map a zerolog-style level name onto a tracing filter directive.
fn log_directive(raw: &str) -> String {
    match raw.to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "" | "info" => "info",
        "warn" => "warn",
        "error" | "fatal" | "panic" => "error",
        "disabled" => "off",
        other => {
            tracing::warn!(level = other, "unrecognized LOG_LEVEL, defaulting to info");
            "info"
        }
    }
    .to_string()
}
