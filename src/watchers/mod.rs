//! Long-lived watch streams over cluster events and pods.

pub mod events;
pub mod pods;

pub use events::run_events_watcher;
pub use pods::run_pods_watcher;

use kube::runtime::watcher;

use crate::errors::AgentError;

pub const EVENTS_WATCHER: &str = "events";
pub const PODS_WATCHER: &str = "pods";

/// Tag every outgoing incident with the watcher family that produced it.
pub(crate) const WATCHER_TAG: &str = "watcher_name";

/// Classify a watch-stream error. A delivery that cannot be decoded into
/// its typed object is a cast failure and the delivery is skipped; anything
/// else is a transport-level watch error the stream recovers from on its
/// own.
pub(crate) fn classify_watch_error(err: &watcher::Error) -> AgentError {
    match err {
        watcher::Error::WatchFailed(kube::Error::SerdeError(reason)) => {
            AgentError::CastFailed(reason.to_string())
        }
        other => AgentError::WatchTerminated(other.to_string()),
    }
}
