//! Incident enrichment.
//!
//! Turns a raw observation (a cluster event or a container termination)
//! into a finalized incident draft: normalized message, stable fingerprint,
//! tags, context blocks and breadcrumbs.

pub mod kinds;

use k8s_openapi::api::core::v1::{ContainerStatus, Event, Pod};
use sentry::protocol::Value;
use sentry::Level;
use tracing::{debug, warn};

use crate::crons::CronsState;
use crate::errors::Result;
use crate::incident::IncidentDraft;
use crate::owners::find_root_owners;
use crate::patterns;
use crate::ring::RecentEventRing;
use crate::workload::{Workload, WorkloadKind, WorkloadStore};

use self::kinds::{enrich_kind, EnrichMode};

const COMBINED_FROM_SIMILAR_PREFIX: &str = "(combined from similar events):";

/// Shared collaborators of the enrichment pipeline.
pub struct EnrichContext<'a> {
    pub store: &'a dyn WorkloadStore,
    pub ring: &'a RecentEventRing,
    pub crons: &'a CronsState,
}

/// Strip the combined-events prefix and match the message against the
/// pattern table. A match locks the fingerprint for the rest of the
/// pipeline.
fn apply_common(draft: &mut IncidentDraft) {
    if let Some(rest) = draft.message.strip_prefix(COMBINED_FROM_SIMILAR_PREFIX) {
        draft.message = rest.trim().to_string();
        draft.set_tag("combined_from_similar", "true");
    }
    if let Some(fingerprint) = patterns::match_message(&draft.message) {
        draft.lock_fingerprint(fingerprint);
    }
}

/// Resolve the involved object of a cluster event through the store.
///
/// Kinds outside the workload set and unresolvable objects degrade to
/// `None`; the caller still produces an incident, just without per-kind
/// enrichment.
pub async fn resolve_involved(store: &dyn WorkloadStore, event: &Event) -> Option<Workload> {
    let involved = &event.involved_object;
    let name = involved.name.as_deref()?;
    let namespace = involved
        .namespace
        .as_deref()
        .or(event.metadata.namespace.as_deref())
        .unwrap_or_default();
    let kind_raw = involved.kind.as_deref()?;
    let Some(kind) = WorkloadKind::parse(kind_raw) else {
        let err = crate::errors::AgentError::UnsupportedKind(kind_raw.to_string());
        debug!(error = %err, name, "involved object is not enriched");
        return None;
    };
    match store.get(kind, namespace, name).await {
        Ok(workload) => Some(workload),
        Err(err) => {
            warn!(error = %err, kind = kind_raw, name, "cannot resolve involved object");
            None
        }
    }
}

/// Build an incident draft for an abnormal cluster event.
pub async fn enrich_cluster_event(
    ctx: &EnrichContext<'_>,
    event: &Event,
    involved: Option<&Workload>,
) -> IncidentDraft {
    let mut draft = IncidentDraft::new(event.message.clone().unwrap_or_default());
    apply_common(&mut draft);

    draft.set_tag("event_type", event.type_.as_deref().unwrap_or_default());
    draft.set_tag("reason", event.reason.as_deref().unwrap_or_default());
    draft.set_tag(
        "kind",
        event.involved_object.kind.as_deref().unwrap_or_default(),
    );
    draft.set_tag(
        "object_uid",
        event.involved_object.uid.as_deref().unwrap_or_default(),
    );
    let namespace = event
        .involved_object
        .namespace
        .as_deref()
        .or(event.metadata.namespace.as_deref())
        .unwrap_or_default();
    draft.set_tag("namespace", namespace);
    draft.set_tag(
        "event_source_component",
        event
            .source
            .as_ref()
            .and_then(|s| s.component.as_deref())
            .unwrap_or_default(),
    );

    // The involved-object context is omitted on purpose: the per-kind
    // metadata block carries the same information.
    let mut entries = Vec::new();
    if let Some(source) = &event.source {
        if let Ok(json) = serde_json::to_string_pretty(source) {
            entries.push(("Source", Value::String(json)));
        }
    }
    let mut metadata = event.metadata.clone();
    metadata.managed_fields = None;
    if let Ok(json) = serde_json::to_string_pretty(&metadata) {
        entries.push(("Metadata", Value::String(json)));
    }
    if !entries.is_empty() {
        draft.set_context("Event", entries);
    }

    // Prior occurrences of this event become breadcrumbs.
    if let Some(event_name) = event.metadata.name.as_deref() {
        for related in ctx.ring.query(namespace, "Event", event_name) {
            let level = if related.type_.as_deref() == Some("Warning") {
                Level::Warning
            } else {
                Level::Info
            };
            draft.add_breadcrumb(
                related.message.unwrap_or_default(),
                level,
                related.last_timestamp.map(|t| t.0),
            );
        }
    }

    match involved {
        Some(workload) => {
            if let Err(err) = enrich_object(ctx, &mut draft, workload).await {
                warn!(error = %err, "object enrichment incomplete");
            }
        }
        None => {
            // Degraded path: no retrievable workload, identify by name only.
            let name = event
                .involved_object
                .name
                .clone()
                .unwrap_or_default();
            let original_message = draft.message.clone();
            if !name.is_empty() {
                draft.message = format!("{name}: {original_message}");
            }
            draft.seed_fingerprint(&original_message);
            if !name.is_empty() {
                draft.push_fingerprint(&[&name]);
            }
        }
    }

    draft
}

/// Build an incident draft for a non-zero container termination, or
/// nothing when the status is not a failed termination.
pub async fn enrich_pod_termination(
    ctx: &EnrichContext<'_>,
    pod: &Pod,
    status: &ContainerStatus,
) -> Option<IncidentDraft> {
    let terminated = status.state.as_ref()?.terminated.as_ref()?;
    if terminated.exit_code == 0 {
        return None;
    }

    let reason = terminated.reason.clone().unwrap_or_default();
    let message = match terminated.message.clone().filter(|m| !m.is_empty()) {
        Some(message) => message,
        None => format!("{}: container \"{}\"", reason, status.name),
    };

    let mut draft = IncidentDraft::new(message);
    apply_common(&mut draft);

    draft.set_tag("reason", &reason);
    draft.set_tag("kind", WorkloadKind::Pod.as_str());
    draft.set_tag("object_uid", pod.metadata.uid.as_deref().unwrap_or_default());
    draft.set_tag(
        "namespace",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
    );
    draft.set_tag("pod_name", pod.metadata.name.as_deref().unwrap_or_default());
    draft.set_tag("container_name", &status.name);
    // Container terminations have no controller reporting them; a synthetic
    // source component keeps them filterable like any other event source.
    draft.set_tag("event_source_component", "x-pod-controller");

    if let Ok(json) = serde_json::to_string_pretty(status) {
        draft.set_context("Container", vec![("Status", Value::String(json))]);
    }

    let workload = Workload::Pod(pod.clone());
    if let Err(err) = enrich_object(ctx, &mut draft, &workload).await {
        warn!(error = %err, "object enrichment incomplete");
    }
    Some(draft)
}

/// Message prefixing, fingerprint seeding, and per-kind plus root-owner
/// enrichment for the involved workload.
pub async fn enrich_object(
    ctx: &EnrichContext<'_>,
    draft: &mut IncidentDraft,
    workload: &Workload,
) -> Result<()> {
    let name = workload.name().to_string();
    let original_message = draft.message.clone();
    draft.message = format!("{name}: {original_message}");
    draft.seed_fingerprint(&original_message);

    // A pod spawned by a monitored cronjob is grouped under its monitor
    // instead of its generic owner chain.
    if matches!(workload, Workload::Pod(_)) {
        if let Some(owner) = workload.owner_references().first() {
            if owner.kind == "Job" && attach_cronjob_monitor(ctx, draft, workload, &owner.name).await {
                enrich_kind(draft, workload, EnrichMode::Collapsed);
                return Ok(());
            }
        }
    }

    let roots = find_root_owners(ctx.store, workload).await?;
    if roots.is_empty() {
        enrich_kind(draft, workload, EnrichMode::Full);
    } else {
        // Children group by their root owners: the object keeps its context
        // and breadcrumbs but contributes neither fingerprint nor name tag.
        enrich_kind(draft, workload, EnrichMode::Collapsed);
        for root in &roots {
            enrich_kind(draft, root, EnrichMode::Full);
        }
    }
    Ok(())
}

/// If the pod's owning job belongs to a cronjob present in the heartbeat
/// map, attach the monitor identity. Returns whether it did.
async fn attach_cronjob_monitor(
    ctx: &EnrichContext<'_>,
    draft: &mut IncidentDraft,
    pod: &Workload,
    job_name: &str,
) -> bool {
    let Ok(job) = ctx
        .store
        .get(WorkloadKind::Job, pod.namespace(), job_name)
        .await
    else {
        return false;
    };
    let Some(cron_ref) = job
        .owner_references()
        .first()
        .filter(|owner| owner.kind == "CronJob")
    else {
        return false;
    };
    if !ctx.crons.contains(&cron_ref.name) {
        return false;
    }

    match ctx
        .store
        .get(WorkloadKind::CronJob, pod.namespace(), &cron_ref.name)
        .await
    {
        Ok(cronjob) => enrich_kind(draft, &cronjob, EnrichMode::Full),
        Err(err) => {
            warn!(error = %err, cronjob = cron_ref.name, "monitored cronjob not retrievable");
            draft.set_tag("cronjob_name", &cron_ref.name);
            draft.set_context(
                "Monitor",
                vec![("Slug", Value::String(cron_ref.name.clone()))],
            );
            draft.add_breadcrumb(
                format!("Created cronjob {}", cron_ref.name),
                Level::Info,
                None,
            );
            draft.push_fingerprint(&["cronjob", &cron_ref.name]);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combined_prefix_is_stripped_and_tagged() {
        let mut draft =
            IncidentDraft::new("(combined from similar events): Back-off restarting container");
        apply_common(&mut draft);
        assert_eq!(draft.message, "Back-off restarting container");
        assert_eq!(draft.tag("combined_from_similar"), Some("true"));
    }

    #[test]
    fn pattern_match_locks_the_fingerprint() {
        let mut draft =
            IncidentDraft::new("Memory cgroup out of memory: Killed process 1234 (python3).");
        apply_common(&mut draft);
        assert!(draft.fingerprint_locked());
        assert_eq!(draft.fingerprint().last().map(String::as_str), Some("python3"));
    }

    #[test]
    fn plain_messages_stay_unlocked() {
        let mut draft = IncidentDraft::new("Back-off restarting failed container");
        apply_common(&mut draft);
        assert!(!draft.fingerprint_locked());
        assert!(draft.fingerprint().is_empty());
    }
}
