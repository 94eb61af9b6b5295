// crates/ncp-server/src/scheduler/mod.rs
// Scheduler (C10): persistent cron/one-shot jobs emitting resource-update notifications

mod parse;

pub use parse::{ScheduleSpec, cron_matches, cron_next_after, is_cron_expr, parse_schedule};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{NcpError, Result};
use crate::notify::Notifier;
use crate::util::{jaccard_tokens, write_atomic};

/// Names this token-similar to an existing job are rejected as duplicates.
const DUPLICATE_JACCARD: f64 = 0.7;

/// Dispatcher tick interval.
const TICK_INTERVAL: StdDuration = StdDuration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Active,
    Paused,
    Error,
    Completed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Active => "active",
            JobStatus::Paused => "paused",
            JobStatus::Error => "error",
            JobStatus::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum JobAction {
    #[default]
    ResourceUpdate,
    Notification,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JobConstraints {
    #[serde(default)]
    pub fire_once: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_executions: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u32,
}

impl JobConstraints {
    /// Execution budget including the fire_once ≡ max_executions=1 equivalence.
    fn budget(&self) -> Option<u32> {
        if self.fire_once {
            Some(self.max_executions.map_or(1, |m| m.min(1)))
        } else {
            self.max_executions
        }
    }

    fn exhausted(&self) -> bool {
        self.budget().is_some_and(|max| self.execution_count >= max)
    }
}

/// One scheduled job, as persisted in scheduled-jobs.json. All timestamps
/// are UTC instants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    /// The schedule as the user supplied it.
    pub schedule: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub one_shot_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub action: JobAction,
    #[serde(default)]
    pub constraints: JobConstraints,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

impl ScheduledJob {
    fn spec(&self) -> Option<ScheduleSpec> {
        if let Some(expr) = &self.cron {
            Some(ScheduleSpec::Cron(expr.clone()))
        } else {
            self.one_shot_time.map(ScheduleSpec::OneShot)
        }
    }

    pub fn resource_uri(&self) -> String {
        format!("ncp://scheduler/{}", self.id)
    }
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct JobDocument {
    #[serde(default)]
    jobs: Vec<ScheduledJob>,
}

/// The single JSON document holding all jobs. Loaded eagerly at startup,
/// rewritten atomically on each mutation. Finished jobs are retained until
/// explicitly removed.
pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl JobStore {
    pub fn load(path: PathBuf) -> Result<Self> {
        let document = match std::fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<JobDocument>(&contents)
                .map_err(|e| NcpError::Config(format!("scheduled jobs {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JobDocument::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(jobs = document.jobs.len(), "Loaded scheduled jobs");
        Ok(Self {
            path,
            jobs: Mutex::new(document.jobs),
        })
    }

    /// Create a job from a schedule string. Rejects creates whose name is
    /// token-similar (Jaccard > 0.7) to an existing job, citing the conflict.
    pub fn create(
        &self,
        name: &str,
        schedule: &str,
        description: Option<String>,
        action: JobAction,
        mut constraints: JobConstraints,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob> {
        let spec = parse_schedule(schedule, now)?;
        constraints.execution_count = 0;

        let job = {
            let mut jobs = self.jobs.lock().expect("job lock poisoned");
            if let Some(existing) = jobs
                .iter()
                .find(|j| jaccard_tokens(&j.name, name) > DUPLICATE_JACCARD)
            {
                return Err(NcpError::InvalidArguments(format!(
                    "a similar job already exists: '{}' ({}), scheduled '{}'",
                    existing.name, existing.id, existing.schedule
                )));
            }

            let next_run = spec.next_after(now);
            let job = ScheduledJob {
                id: uuid::Uuid::new_v4().to_string(),
                name: name.to_string(),
                schedule: schedule.to_string(),
                cron: spec.cron().map(str::to_string),
                one_shot_time: match &spec {
                    ScheduleSpec::OneShot(at) => Some(*at),
                    ScheduleSpec::Cron(_) => None,
                },
                description,
                action,
                constraints,
                status: JobStatus::Active,
                last_run: None,
                next_run,
            };
            jobs.push(job.clone());
            job
        };
        self.persist()?;
        info!(job = %job.name, id = %job.id, next_run = ?job.next_run, "Scheduled job created");
        Ok(job)
    }

    pub fn list(&self) -> Vec<ScheduledJob> {
        self.jobs.lock().expect("job lock poisoned").clone()
    }

    pub fn get(&self, id: &str) -> Option<ScheduledJob> {
        self.jobs
            .lock()
            .expect("job lock poisoned")
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = {
            let mut jobs = self.jobs.lock().expect("job lock poisoned");
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        };
        if removed {
            self.persist()?;
        }
        Ok(removed)
    }

    pub fn set_status(&self, id: &str, status: JobStatus, now: DateTime<Utc>) -> Result<bool> {
        let changed = {
            let mut jobs = self.jobs.lock().expect("job lock poisoned");
            match jobs.iter_mut().find(|j| j.id == id) {
                Some(job) => {
                    job.status = status;
                    // Resuming recomputes the next fire time from now.
                    if status == JobStatus::Active {
                        job.next_run = job.spec().and_then(|s| s.next_after(now));
                    }
                    true
                }
                None => false,
            }
        };
        if changed {
            self.persist()?;
        }
        Ok(changed)
    }

    /// Advance every due job and return the notifications to emit. The
    /// mutation (execution count, next_run, status) is applied and persisted
    /// before the caller sends anything, so each `next_run` instant fires at
    /// most once.
    pub fn collect_due(&self, now: DateTime<Utc>) -> Result<Vec<FiredJob>> {
        let fired = {
            let mut jobs = self.jobs.lock().expect("job lock poisoned");
            let mut fired = Vec::new();
            for job in jobs.iter_mut() {
                if job.status != JobStatus::Active {
                    continue;
                }
                let Some(due) = job.next_run else { continue };
                if due > now {
                    continue;
                }

                // End-date passed without firing: complete silently.
                if let Some(end) = job.constraints.end_date
                    && due > end
                {
                    job.status = JobStatus::Completed;
                    job.next_run = None;
                    continue;
                }

                job.constraints.execution_count += 1;
                job.last_run = Some(now);

                let next = match job.spec() {
                    Some(ScheduleSpec::Cron(expr)) => cron_next_after(&expr, now),
                    _ => None,
                };
                let within_end = |t: &DateTime<Utc>| {
                    job.constraints.end_date.is_none_or(|end| *t <= end)
                };
                if job.constraints.exhausted() || next.as_ref().is_none_or(|t| !within_end(t)) {
                    job.status = JobStatus::Completed;
                    job.next_run = None;
                } else {
                    job.next_run = next;
                }

                fired.push(FiredJob {
                    job: job.clone(),
                    execute_time: due,
                });
            }
            fired
        };

        if !fired.is_empty() {
            self.persist()?;
        }
        Ok(fired)
    }

    fn persist(&self) -> Result<()> {
        let json = {
            let jobs = self.jobs.lock().expect("job lock poisoned");
            serde_json::to_vec_pretty(&JobDocument { jobs: jobs.clone() })?
        };
        write_atomic(&self.path, &json)?;
        Ok(())
    }
}

/// A job that just fired, with the instant it was due.
#[derive(Debug, Clone)]
pub struct FiredJob {
    pub job: ScheduledJob,
    pub execute_time: DateTime<Utc>,
}

/// Dispatcher: wakes periodically, advances due jobs, emits
/// `notifications/resources/updated` for each firing.
pub struct Scheduler {
    store: Arc<JobStore>,
    notifier: Arc<dyn Notifier>,
}

impl Scheduler {
    pub fn new(store: Arc<JobStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// One dispatcher pass. Exposed for tests; `run` calls it on a timer.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<usize> {
        let fired = self.store.collect_due(now)?;
        for entry in &fired {
            let job = &entry.job;
            let payload = json!({
                "uri": job.resource_uri(),
                "jobId": job.id,
                "jobName": job.name,
                "executeTime": entry.execute_time,
                "status": job.status.to_string(),
                "action": job.action,
                "nextRun": job.next_run,
                "constraints": job.constraints,
            });
            self.notifier
                .notify("notifications/resources/updated", Some(payload));
            info!(job = %job.name, id = %job.id, status = %job.status, "Job fired");
        }
        Ok(fired.len())
    }

    /// Run until the shutdown signal flips. Persists through the store on
    /// every firing, so a crash never replays a completed instant.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Scheduler dispatcher started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(TICK_INTERVAL) => {
                    if let Err(e) = self.tick(Utc::now()) {
                        warn!(error = %e, "Scheduler tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler dispatcher stopping");
                        break;
                    }
                }
            }
        }
    }
}
