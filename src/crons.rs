//! Cron-job heartbeat coordination.
//!
//! Tracks one monitor per cronjob and translates job state transitions into
//! Sentry monitor check-ins: an in-progress check-in when a job starts and a
//! terminal ok/error check-in when its first condition reports completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use k8s_openapi::api::batch::v1::{CronJob, Job};
use sentry::protocol::{MonitorCheckIn, MonitorCheckInStatus, MonitorConfig, MonitorSchedule};
use sentry::Hub;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::router::DsnRouter;
use crate::workload::{Workload, WorkloadStore};

/// Heartbeat state for one cronjob.
pub struct CronsMonitorData {
    pub monitor_slug: String,
    pub schedule: String,
    pub required_completions: i32,
    /// job name -> check-in id of the in-progress check-in we emitted.
    jobs: Mutex<HashMap<String, Uuid>>,
}

impl CronsMonitorData {
    pub fn new(monitor_slug: &str, schedule: &str, completions: Option<i32>) -> Self {
        Self {
            monitor_slug: monitor_slug.to_string(),
            schedule: schedule.to_string(),
            // If not set, any single pod success is enough.
            required_completions: completions.unwrap_or(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            schedule: MonitorSchedule::Crontab {
                value: self.schedule.clone(),
            },
            checkin_margin: None,
            max_runtime: None,
            timezone: None,
            failure_issue_threshold: None,
            recovery_threshold: None,
        }
    }

    pub fn record_in_progress(&self, job_name: &str, check_in_id: Uuid) {
        self.jobs
            .lock()
            .expect("monitor jobs lock poisoned")
            .insert(job_name.to_string(), check_in_id);
    }

    pub fn in_progress_id(&self, job_name: &str) -> Option<Uuid> {
        self.jobs
            .lock()
            .expect("monitor jobs lock poisoned")
            .get(job_name)
            .copied()
    }
}

/// Process-wide map cronjob-name -> monitor state.
#[derive(Default)]
pub struct CronsState {
    monitors: RwLock<HashMap<String, Arc<CronsMonitorData>>>,
}

impl CronsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cronjob informer Add handler: register a monitor unless one exists.
    pub fn upsert_cronjob(&self, cronjob: &CronJob) {
        let Some(name) = cronjob.metadata.name.as_deref() else {
            return;
        };
        let mut monitors = self.monitors.write().expect("crons state lock poisoned");
        if monitors.contains_key(name) {
            debug!(cronjob = name, "cronjob already has a monitor entry");
            return;
        }
        let schedule = cronjob
            .spec
            .as_ref()
            .map(|spec| spec.schedule.as_str())
            .unwrap_or_default();
        let completions = cronjob
            .spec
            .as_ref()
            .and_then(|spec| spec.job_template.spec.as_ref())
            .and_then(|spec| spec.completions);
        debug!(cronjob = name, schedule, "registering cronjob monitor");
        monitors.insert(
            name.to_string(),
            Arc::new(CronsMonitorData::new(name, schedule, completions)),
        );
    }

    /// Cronjob informer Delete handler.
    pub fn remove_cronjob(&self, name: &str) {
        let removed = self
            .monitors
            .write()
            .expect("crons state lock poisoned")
            .remove(name);
        if removed.is_some() {
            debug!(cronjob = name, "removed cronjob monitor");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<CronsMonitorData>> {
        self.monitors
            .read()
            .expect("crons state lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.monitors
            .read()
            .expect("crons state lock poisoned")
            .contains_key(name)
    }
}

/// What a job delivery asks the coordinator to do.
pub enum CheckInAction {
    Start {
        monitor: Arc<CronsMonitorData>,
        job_name: String,
        check_in_id: Uuid,
    },
    Finish {
        monitor: Arc<CronsMonitorData>,
        check_in_id: Uuid,
        status: MonitorCheckInStatus,
    },
}

/// Classify a job delivery against the monitor map.
///
/// Jobs whose first owner is not a registered cronjob are ignored. The
/// terminal transition is driven by `status.conditions[0].type` only;
/// terminal-looking counters without a recorded condition are skipped.
pub fn classify_job(state: &CronsState, job: &Job) -> Option<CheckInAction> {
    let owner = job.metadata.owner_references.as_ref()?.first()?;
    if owner.kind != "CronJob" {
        return None;
    }
    let monitor = state.get(&owner.name)?;
    let job_name = job.metadata.name.clone()?;

    let status = job.status.as_ref();
    let active = status.and_then(|s| s.active).unwrap_or(0);
    let succeeded = status.and_then(|s| s.succeeded).unwrap_or(0);
    let failed = status.and_then(|s| s.failed).unwrap_or(0);

    if active == 0 && succeeded == 0 && failed == 0 {
        if monitor.in_progress_id(&job_name).is_some() {
            return None;
        }
        return Some(CheckInAction::Start {
            monitor,
            job_name,
            check_in_id: Uuid::new_v4(),
        });
    }

    if active > 0 {
        return None;
    }

    if succeeded > 0 || failed > 0 {
        let Some(condition) = status.and_then(|s| s.conditions.as_ref()).and_then(|c| c.first())
        else {
            debug!(
                job = job_name,
                "job counters look terminal but no condition is recorded; skipping check-in"
            );
            return None;
        };
        let status = match condition.type_.as_str() {
            "Complete" => MonitorCheckInStatus::Ok,
            "Failed" => MonitorCheckInStatus::Error,
            _ => return None,
        };
        let check_in_id = monitor
            .in_progress_id(&job_name)
            .unwrap_or_else(Uuid::new_v4);
        return Some(CheckInAction::Finish {
            monitor,
            check_in_id,
            status,
        });
    }

    None
}

/// Job informer Apply handler: classify, route, send.
pub async fn handle_job_event(
    state: &CronsState,
    router: &DsnRouter,
    store: &dyn WorkloadStore,
    job: &Job,
) {
    let Some(action) = classify_job(state, job) else {
        return;
    };

    // Clone the ambient hub before binding anything; the destination may be
    // overridden per-job by the DSN annotation walk.
    let hub = Arc::new(Hub::new_from_top(Hub::main()));
    match router.client_for(store, &Workload::Job(job.clone())).await {
        Ok(Some(client)) => hub.bind_client(Some(client)),
        Ok(None) => {}
        Err(err) => warn!(error = %err, "falling back to the default client for check-in"),
    }
    let Some(client) = hub.client() else {
        warn!("no client configured, dropping check-in");
        return;
    };

    match action {
        CheckInAction::Start {
            monitor,
            job_name,
            check_in_id,
        } => {
            debug!(
                monitor = monitor.monitor_slug,
                job = job_name,
                "sending in-progress check-in"
            );
            send_check_in(
                &client,
                &monitor,
                check_in_id,
                MonitorCheckInStatus::InProgress,
            );
            monitor.record_in_progress(&job_name, check_in_id);
        }
        CheckInAction::Finish {
            monitor,
            check_in_id,
            status,
        } => {
            debug!(
                monitor = monitor.monitor_slug,
                ?status,
                "sending terminal check-in"
            );
            send_check_in(&client, &monitor, check_in_id, status);
        }
    }
}

fn send_check_in(
    client: &sentry::Client,
    monitor: &CronsMonitorData,
    check_in_id: Uuid,
    status: MonitorCheckInStatus,
) {
    let check_in = MonitorCheckIn {
        check_in_id,
        monitor_slug: monitor.monitor_slug.clone(),
        status,
        duration: None,
        environment: None,
        monitor_config: Some(monitor.monitor_config()),
    };
    client.send_envelope(check_in.into());
}
