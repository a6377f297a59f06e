//! Shared state handed to watcher tasks.

use std::fmt;
use std::sync::Arc;

use kube::{Api, Client};

use crate::crons::CronsState;
use crate::enrich::EnrichContext;
use crate::filters::EventFilter;
use crate::ring::RecentEventRing;
use crate::router::DsnRouter;
use crate::settings::{Settings, WatchScope, ALL_NAMESPACES_LABEL};
use crate::workload::ClusterStore;

/// One watch target per (namespace × watcher family); `__all__` collapses
/// into a single all-namespaces target.
#[derive(Clone, Debug)]
pub enum WatchTarget {
    AllNamespaces,
    Namespace(String),
}

impl WatchTarget {
    pub fn from_scope(scope: &WatchScope) -> Vec<WatchTarget> {
        match scope {
            WatchScope::AllNamespaces => vec![WatchTarget::AllNamespaces],
            WatchScope::Namespaces(namespaces) => namespaces
                .iter()
                .map(|ns| WatchTarget::Namespace(ns.clone()))
                .collect(),
        }
    }

    pub fn api<K>(&self, client: Client) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        match self {
            Self::AllNamespaces => Api::all(client),
            Self::Namespace(namespace) => Api::namespaced(client, namespace),
        }
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllNamespaces => f.write_str(ALL_NAMESPACES_LABEL),
            Self::Namespace(namespace) => f.write_str(namespace),
        }
    }
}

/// Everything a watcher task needs, cloned cheaply via `Arc`.
pub struct AgentContext {
    pub client: Client,
    pub settings: Arc<Settings>,
    pub ring: Arc<RecentEventRing>,
    pub filters: Arc<EventFilter>,
    pub router: Arc<DsnRouter>,
    pub crons: Arc<CronsState>,
    pub store: Arc<ClusterStore>,
}

impl AgentContext {
    pub fn enrich(&self) -> EnrichContext<'_> {
        EnrichContext {
            store: self.store.as_ref(),
            ring: &self.ring,
            crons: &self.crons,
        }
    }
}
