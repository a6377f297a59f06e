//! Per-incident destination routing.
//!
//! A workload (or any of its ancestors) can carry the DSN annotation to
//! redirect its incidents to another Sentry project. Clients are constructed
//! once per distinct DSN and cached for the process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::errors::{AgentError, Result};
use crate::owners::MAX_OWNER_DEPTH;
use crate::workload::{Workload, WorkloadKind, WorkloadStore};

pub const DSN_ANNOTATION: &str = "k8s.sentry.io/dsn";

pub struct DsnRouter {
    enabled: bool,
    clients: RwLock<HashMap<String, Arc<sentry::Client>>>,
}

impl DsnRouter {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the destination client for `workload`.
    ///
    /// Returns `None` when routing is disabled or no annotation is found on
    /// the object or any ancestor, in which case the caller keeps the
    /// default client. The annotation closest to the object wins.
    pub async fn client_for(
        &self,
        store: &dyn WorkloadStore,
        workload: &Workload,
    ) -> Result<Option<Arc<sentry::Client>>> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(dsn) = self.search_dsn(store, workload).await? else {
            return Ok(None);
        };

        if let Some(client) = self
            .clients
            .read()
            .expect("dsn client cache lock poisoned")
            .get(&dsn)
        {
            return Ok(Some(client.clone()));
        }

        let client = build_client(&dsn)?;
        debug!(dsn, "initialized destination client");
        self.clients
            .write()
            .expect("dsn client cache lock poisoned")
            .insert(dsn, client.clone());
        Ok(Some(client))
    }

    /// Walk from the object up its first owner references, returning the
    /// first DSN annotation found.
    async fn search_dsn(
        &self,
        store: &dyn WorkloadStore,
        workload: &Workload,
    ) -> Result<Option<String>> {
        let mut current = workload.clone();
        for _ in 0..MAX_OWNER_DEPTH {
            if let Some(dsn) = current
                .annotations()
                .and_then(|annotations| annotations.get(DSN_ANNOTATION))
            {
                return Ok(Some(dsn.clone()));
            }
            let Some(owner) = current.owner_references().first() else {
                return Ok(None);
            };
            let kind = WorkloadKind::parse(&owner.kind).ok_or_else(|| {
                AgentError::OwnerLookupFailed {
                    kind: owner.kind.clone(),
                    namespace: current.namespace().to_string(),
                    name: owner.name.clone(),
                }
            })?;
            current = store.get(kind, current.namespace(), &owner.name).await?;
        }
        Err(AgentError::OwnerGraphTooDeep {
            name: workload.name().to_string(),
            limit: MAX_OWNER_DEPTH,
        })
    }

    #[cfg(test)]
    fn cached_client(&self, dsn: &str) -> Option<Arc<sentry::Client>> {
        self.clients
            .read()
            .expect("dsn client cache lock poisoned")
            .get(dsn)
            .cloned()
    }
}

fn build_client(dsn: &str) -> Result<Arc<sentry::Client>> {
    let parsed = dsn
        .parse::<sentry::types::Dsn>()
        .map_err(|err| AgentError::ClientInitFailed {
            dsn: dsn.to_string(),
            reason: err.to_string(),
        })?;
    let options = sentry::ClientOptions {
        dsn: Some(parsed),
        debug: true,
        attach_stacktrace: true,
        ..Default::default()
    };
    Ok(Arc::new(sentry::Client::from(options)))
}
