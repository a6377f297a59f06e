//! Incident drafts.
//!
//! A draft accumulates message, fingerprint, tags, context blocks and
//! breadcrumbs during enrichment and freezes into a `sentry` protocol event
//! at send time.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sentry::protocol::{Breadcrumb, Context, Event, Map, Value};
use sentry::Level;

pub const BREADCRUMB_LIMIT: usize = 20;

pub struct IncidentDraft {
    pub message: String,
    pub level: Level,
    fingerprint: Vec<String>,
    /// Set by a message-pattern match; locked fingerprints ignore further
    /// appends so pattern-normalized incidents collapse across workloads.
    fingerprint_locked: bool,
    tags: BTreeMap<String, String>,
    contexts: BTreeMap<String, Context>,
    breadcrumbs: Vec<Breadcrumb>,
}

impl IncidentDraft {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: Level::Error,
            fingerprint: Vec::new(),
            fingerprint_locked: false,
            tags: BTreeMap::new(),
            contexts: BTreeMap::new(),
            breadcrumbs: Vec::new(),
        }
    }

    /// Set a tag, skipping empty keys or values.
    pub fn set_tag(&mut self, key: &str, value: &str) {
        if !key.is_empty() && !value.is_empty() {
            self.tags.insert(key.to_string(), value.to_string());
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    pub fn set_context(&mut self, name: &str, entries: Vec<(&str, Value)>) {
        let mut map = Map::new();
        for (key, value) in entries {
            map.insert(key.to_string(), value);
        }
        self.contexts.insert(name.to_string(), Context::Other(map));
    }

    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts.get(name)
    }

    /// Replace the fingerprint with a pattern-derived one and lock it.
    pub fn lock_fingerprint(&mut self, fingerprint: Vec<String>) {
        self.fingerprint = fingerprint;
        self.fingerprint_locked = true;
    }

    pub fn fingerprint_locked(&self) -> bool {
        self.fingerprint_locked
    }

    /// Seed the fingerprint with the original message, unless a pattern
    /// already decided the identity or a seed is present.
    pub fn seed_fingerprint(&mut self, message: &str) {
        if !self.fingerprint_locked && self.fingerprint.is_empty() {
            self.fingerprint.push(message.to_string());
        }
    }

    pub fn push_fingerprint(&mut self, parts: &[&str]) {
        if self.fingerprint_locked {
            return;
        }
        self.fingerprint.extend(parts.iter().map(|p| p.to_string()));
    }

    pub fn fingerprint(&self) -> &[String] {
        &self.fingerprint
    }

    /// Append a breadcrumb, evicting the oldest once the limit is reached.
    pub fn add_breadcrumb(
        &mut self,
        message: impl Into<String>,
        level: Level,
        timestamp: Option<DateTime<Utc>>,
    ) {
        if self.breadcrumbs.len() >= BREADCRUMB_LIMIT {
            self.breadcrumbs.remove(0);
        }
        self.breadcrumbs.push(Breadcrumb {
            message: Some(message.into()),
            level,
            timestamp: timestamp
                .map(SystemTime::from)
                .unwrap_or(SystemTime::UNIX_EPOCH),
            ..Default::default()
        });
    }

    pub fn breadcrumbs(&self) -> &[Breadcrumb] {
        &self.breadcrumbs
    }

    /// Freeze the draft into a protocol event.
    pub fn freeze(self) -> Event<'static> {
        let fingerprint: Vec<Cow<'static, str>> =
            self.fingerprint.into_iter().map(Cow::Owned).collect();
        Event {
            message: Some(self.message),
            level: self.level,
            fingerprint: Cow::Owned(fingerprint),
            tags: self.tags.into_iter().collect(),
            contexts: self.contexts.into_iter().collect(),
            breadcrumbs: self.breadcrumbs.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tags_are_skipped() {
        let mut draft = IncidentDraft::new("boom");
        draft.set_tag("", "value");
        draft.set_tag("key", "");
        draft.set_tag("kept", "yes");
        assert_eq!(draft.tag("kept"), Some("yes"));
        assert_eq!(draft.freeze().tags.len(), 1);
    }

    #[test]
    fn locked_fingerprint_ignores_appends() {
        let mut draft = IncidentDraft::new("boom");
        draft.lock_fingerprint(vec!["pattern".to_string(), "python3".to_string()]);
        draft.seed_fingerprint("boom");
        draft.push_fingerprint(&["replicaset", "web-rs"]);
        assert_eq!(draft.fingerprint(), ["pattern", "python3"]);
    }

    #[test]
    fn seed_only_applies_once() {
        let mut draft = IncidentDraft::new("boom");
        draft.seed_fingerprint("boom");
        draft.seed_fingerprint("other");
        draft.push_fingerprint(&["pod-name"]);
        assert_eq!(draft.fingerprint(), ["boom", "pod-name"]);
    }

    #[test]
    fn breadcrumbs_are_capped() {
        let mut draft = IncidentDraft::new("boom");
        for i in 0..(BREADCRUMB_LIMIT + 5) {
            draft.add_breadcrumb(format!("crumb {i}"), Level::Info, None);
        }
        assert_eq!(draft.breadcrumbs().len(), BREADCRUMB_LIMIT);
        // Oldest entries were evicted.
        assert_eq!(
            draft.breadcrumbs()[0].message.as_deref(),
            Some("crumb 5")
        );
    }

    #[test]
    fn freeze_carries_everything_over() {
        let mut draft = IncidentDraft::new("web: boom");
        draft.seed_fingerprint("boom");
        draft.set_tag("pod_name", "web");
        draft.set_context("Pod", vec![("Metadata", Value::String("{}".to_string()))]);
        draft.add_breadcrumb("Created pod web", Level::Info, Some(Utc::now()));

        let event = draft.freeze();
        assert_eq!(event.message.as_deref(), Some("web: boom"));
        assert_eq!(event.level, Level::Error);
        assert_eq!(event.fingerprint.as_ref(), ["boom"]);
        assert_eq!(event.tags.get("pod_name").map(String::as_str), Some("web"));
        assert!(event.contexts.contains_key("Pod"));
        assert_eq!(event.breadcrumbs.values.len(), 1);
    }
}
