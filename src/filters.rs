//! Event drop filters.

use std::collections::HashSet;

use k8s_openapi::api::core::v1::Event;
use tracing::debug;

use crate::settings::Settings;

const DEFAULT_DROP_REASONS: [&str; 4] = [
    "DockerStart",
    "KubeletStart",
    "NodeSysctlChange",
    "ContainerdStart",
];

/// Case-insensitive membership filters over event reason and source
/// component. An event with an empty reason or source is never dropped.
pub struct EventFilter {
    reasons: HashSet<String>,
    sources: HashSet<String>,
}

impl EventFilter {
    pub fn new(reasons: Option<&[String]>, sources: Option<&[String]>) -> Self {
        let reasons = match reasons {
            Some(overrides) => normalize(overrides.iter().map(String::as_str)),
            None => normalize(DEFAULT_DROP_REASONS.into_iter()),
        };
        let sources = match sources {
            Some(overrides) => normalize(overrides.iter().map(String::as_str)),
            None => HashSet::new(),
        };
        debug!(?reasons, ?sources, "prepared the event filters");
        Self { reasons, sources }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.filter_reasons.as_deref(),
            settings.filter_sources.as_deref(),
        )
    }

    pub fn should_drop(&self, event: &Event) -> bool {
        self.is_filtered_by_reason(event) || self.is_filtered_by_source(event)
    }

    fn is_filtered_by_reason(&self, event: &Event) -> bool {
        match normalized_field(event.reason.as_deref()) {
            Some(reason) => self.reasons.contains(&reason),
            None => false,
        }
    }

    fn is_filtered_by_source(&self, event: &Event) -> bool {
        let component = event.source.as_ref().and_then(|s| s.component.as_deref());
        match normalized_field(component) {
            Some(component) => self.sources.contains(&component),
            None => false,
        }
    }
}

fn normalize<'a>(values: impl Iterator<Item = &'a str>) -> HashSet<String> {
    values
        .map(|value| value.trim().to_lowercase())
        .filter(|value| !value.is_empty())
        .collect()
}

fn normalized_field(value: Option<&str>) -> Option<String> {
    let value = value?.trim().to_lowercase();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
