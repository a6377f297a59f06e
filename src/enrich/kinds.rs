//! Per-kind enrichment, selected over the workload tag.

use sentry::protocol::Value;
use sentry::Level;

use crate::incident::IncidentDraft;
use crate::integrations::gke;
use crate::workload::{Workload, WorkloadKind};

/// How much identity the enriched object contributes.
#[derive(Clone, Copy)]
pub enum EnrichMode {
    /// Fingerprint pair, name tag, context, breadcrumb, kind extras.
    Full,
    /// Context, breadcrumb and kind extras only; identity comes from the
    /// root owners instead.
    Collapsed,
}

pub fn enrich_kind(draft: &mut IncidentDraft, workload: &Workload, mode: EnrichMode) {
    let kind = workload.kind();
    let name = workload.name();

    if matches!(mode, EnrichMode::Full) {
        match kind {
            // A pod is identified by bare name; everything else by a
            // (kind, name) pair.
            WorkloadKind::Pod => draft.push_fingerprint(&[name]),
            _ => draft.push_fingerprint(&[kind.short_name(), name]),
        }
        draft.set_tag(kind.name_tag(), name);
    }

    if let Some(json) = workload.metadata_json() {
        draft.set_context(kind.as_str(), vec![("Metadata", Value::String(json))]);
    }

    draft.add_breadcrumb(
        format!("Created {} {}", kind.short_name(), name),
        Level::Info,
        workload.creation_timestamp(),
    );

    match workload {
        Workload::Pod(pod) => {
            if let Some(node) = pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) {
                draft.set_tag("node_name", node);
            }
            gke::attach_pod_log_link(draft, name, workload.namespace());
        }
        Workload::CronJob(_) => {
            draft.set_context("Monitor", vec![("Slug", Value::String(name.to_string()))]);
        }
        _ => {}
    }
}
