//! Scheduled organization jobs.
//!
//! [`JobManager`] owns the job table and keeps the scheduler's registrations in
//! line with it. [`JobRunner`] is what the scheduler calls when a job is due.

use crate::error::{Error, Result};
use crate::organizer::{
    DEFAULT_DATE_FORMAT, OperationKind, OrganizeRequest, validate_date_format,
};
use crate::run::Run;
use crate::scheduler::{JobHandler, JobScheduler};
use crate::service::OrganizeService;
use crate::store::{Record, RecordStore};
use crate::trigger::{ScheduleConfig, Trigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: u64,
    pub name: String,
    pub description: Option<String>,
    pub operation_kind: OperationKind,
    pub source_directory: PathBuf,
    pub date_format: Option<String>,
    pub trigger: Trigger,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub run_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// The organization this job performs. Unmatched files always go to
    /// `Others`.
    pub fn request(&self) -> OrganizeRequest {
        match self.operation_kind {
            OperationKind::ByType => OrganizeRequest::by_type(&self.source_directory),
            OperationKind::ByDate => OrganizeRequest::by_date(
                &self.source_directory,
                self.date_format
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string()),
            ),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::validation("job name must not be empty"));
        }
        if self.source_directory.as_os_str().is_empty() {
            return Err(Error::validation("source directory is required"));
        }
        if let Some(format) = &self.date_format {
            validate_date_format(format)?;
        }
        Ok(())
    }
}

impl Record for ScheduledJob {
    const ENTITY: &'static str = "job";

    fn id(&self) -> u64 {
        self.id
    }

    fn set_id(&mut self, id: u64) {
        self.id = id;
    }
}

/// Input for [`JobManager::create`].
#[derive(Debug, Clone)]
pub struct NewJob {
    pub name: String,
    pub description: Option<String>,
    pub operation_kind: OperationKind,
    pub source_directory: PathBuf,
    pub date_format: Option<String>,
    pub schedule: ScheduleConfig,
    pub enabled: bool,
}

impl NewJob {
    pub fn new(
        name: impl Into<String>,
        source_directory: impl Into<PathBuf>,
        schedule: ScheduleConfig,
    ) -> Self {
        Self {
            name: name.into(),
            description: None,
            operation_kind: OperationKind::ByType,
            source_directory: source_directory.into(),
            date_format: None,
            schedule,
            enabled: true,
        }
    }
}

/// Partial change for [`JobManager::update`]. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub operation_kind: Option<OperationKind>,
    pub source_directory: Option<PathBuf>,
    pub date_format: Option<String>,
    pub schedule: Option<ScheduleConfig>,
    pub enabled: Option<bool>,
}

impl JobUpdate {
    fn apply(self, job: &mut ScheduledJob) -> Result<()> {
        if let Some(schedule) = &self.schedule {
            job.trigger = Trigger::from_config(schedule)?;
        }
        if let Some(name) = self.name {
            job.name = name;
        }
        if let Some(description) = self.description {
            job.description = Some(description);
        }
        if let Some(kind) = self.operation_kind {
            job.operation_kind = kind;
        }
        if let Some(dir) = self.source_directory {
            job.source_directory = dir;
        }
        if let Some(format) = self.date_format {
            job.date_format = Some(format);
        }
        if let Some(enabled) = self.enabled {
            job.enabled = enabled;
        }
        job.validate()
    }
}

/// Job lifecycle. Every operation returns the job as it stands afterwards.
pub struct JobManager {
    jobs: Arc<RecordStore<ScheduledJob>>,
    scheduler: Arc<JobScheduler>,
}

impl JobManager {
    pub fn new(jobs: Arc<RecordStore<ScheduledJob>>, scheduler: Arc<JobScheduler>) -> Self {
        Self { jobs, scheduler }
    }

    pub fn scheduler(&self) -> &Arc<JobScheduler> {
        &self.scheduler
    }

    pub fn create(&self, new: NewJob) -> Result<ScheduledJob> {
        let trigger = Trigger::from_config(&new.schedule)?;
        let now = Utc::now();
        let job = ScheduledJob {
            id: 0,
            name: new.name,
            description: new.description,
            operation_kind: new.operation_kind,
            source_directory: new.source_directory,
            date_format: new.date_format,
            trigger,
            enabled: new.enabled,
            last_run: None,
            next_run: None,
            run_count: 0,
            created_at: now,
            updated_at: now,
        };
        job.validate()?;

        let mut job = self.jobs.insert(job)?;
        if job.enabled {
            match self.scheduler.register(job.id, job.trigger.clone()) {
                Ok(next_run) => {
                    job.next_run = Some(next_run);
                    self.jobs.update(&job)?;
                }
                Err(error) => {
                    self.jobs.delete(job.id)?;
                    return Err(error);
                }
            }
        }

        tracing::info!(job_id = job.id, name = %job.name, trigger = %job.trigger, "job created");
        Ok(job)
    }

    pub fn get(&self, job_id: u64) -> Result<ScheduledJob> {
        self.jobs.fetch(job_id).map(|job| self.snapshot(job))
    }

    pub fn list(&self) -> Vec<ScheduledJob> {
        self.jobs
            .list()
            .into_iter()
            .map(|job| self.snapshot(job))
            .collect()
    }

    pub fn update(&self, job_id: u64, changes: JobUpdate) -> Result<ScheduledJob> {
        let job = self.jobs.modify(job_id, |job| {
            changes.apply(job)?;
            job.updated_at = Utc::now();
            self.sync_registration(job)
        })?;
        tracing::info!(job_id, enabled = job.enabled, "job updated");
        Ok(job)
    }

    pub fn delete(&self, job_id: u64) -> Result<()> {
        self.scheduler.unregister(job_id);
        if !self.jobs.delete(job_id)? {
            return Err(Error::NotFound {
                entity: ScheduledJob::ENTITY,
                id: job_id,
            });
        }
        tracing::info!(job_id, "job deleted");
        Ok(())
    }

    pub fn enable(&self, job_id: u64) -> Result<ScheduledJob> {
        self.set_enabled(job_id, true)
    }

    /// Disables the job, dropping its registration and next run time.
    pub fn disable(&self, job_id: u64) -> Result<ScheduledJob> {
        self.set_enabled(job_id, false)
    }

    /// Brings the scheduler in line with the job table, which other processes
    /// may have changed. Enabled jobs are registered, or re-registered when
    /// their trigger changed. Registrations whose job is gone or disabled are
    /// dropped. Jobs that cannot be registered are logged and left out.
    ///
    /// Returns how many jobs are registered afterwards.
    pub fn sync_registrations(&self) -> usize {
        let enabled: BTreeMap<u64, ScheduledJob> = self
            .jobs
            .list()
            .into_iter()
            .filter(|job| job.enabled)
            .map(|job| (job.id, job))
            .collect();

        for job_id in self.scheduler.job_ids() {
            if !enabled.contains_key(&job_id) {
                self.scheduler.unregister(job_id);
                tracing::info!(job_id, "job removed or disabled, unregistered");
            }
        }

        for job in enabled.values() {
            if self.scheduler.trigger(job.id).as_ref() == Some(&job.trigger) {
                continue;
            }
            match self.scheduler.register(job.id, job.trigger.clone()) {
                Ok(next_run) => {
                    tracing::info!(job_id = job.id, next_run = %next_run, "job registered");
                    let recorded = self.jobs.modify(job.id, |job| {
                        job.next_run = Some(next_run);
                        Ok(())
                    });
                    if let Err(error) = recorded {
                        tracing::warn!(job_id = job.id, error = %error, "could not record next run");
                    }
                }
                Err(error) => {
                    self.scheduler.unregister(job.id);
                    tracing::warn!(job_id = job.id, error = %error, "could not register job");
                }
            }
        }

        self.scheduler.job_ids().len()
    }

    fn set_enabled(&self, job_id: u64, enabled: bool) -> Result<ScheduledJob> {
        let current = self.jobs.fetch(job_id)?;
        if current.enabled == enabled && self.scheduler.is_registered(job_id) == enabled {
            return Ok(self.snapshot(current));
        }
        let job = self.jobs.modify(job_id, |job| {
            job.enabled = enabled;
            job.updated_at = Utc::now();
            self.sync_registration(job)
        })?;
        tracing::info!(job_id, enabled, "job toggled");
        Ok(job)
    }

    fn sync_registration(&self, job: &mut ScheduledJob) -> Result<()> {
        if job.enabled {
            job.next_run = Some(self.scheduler.register(job.id, job.trigger.clone())?);
        } else {
            self.scheduler.unregister(job.id);
            job.next_run = None;
        }
        Ok(())
    }

    fn snapshot(&self, mut job: ScheduledJob) -> ScheduledJob {
        if let Some(next_run) = self.scheduler.next_run(job.id) {
            job.next_run = Some(next_run);
        }
        job
    }
}

/// What one firing of a job did.
#[derive(Debug)]
pub enum JobOutcome {
    /// The job is gone or disabled; nothing was recorded.
    Skipped,
    Completed(Run),
    Failed {
        run_id: Option<u64>,
        error: Error,
    },
}

/// Runs scheduled jobs through the [`OrganizeService`].
pub struct JobRunner {
    jobs: Arc<RecordStore<ScheduledJob>>,
    service: Arc<OrganizeService>,
    scheduler: Arc<JobScheduler>,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<RecordStore<ScheduledJob>>,
        service: Arc<OrganizeService>,
        scheduler: Arc<JobScheduler>,
    ) -> Self {
        Self {
            jobs,
            service,
            scheduler,
        }
    }

    /// Runs one job now. Failures are recorded on the run and the job, never
    /// returned as errors.
    pub fn run_job(&self, job_id: u64) -> JobOutcome {
        let job = match self.jobs.get(job_id) {
            Some(job) if job.enabled => job,
            Some(_) => {
                tracing::debug!(job_id, "job disabled, not running");
                return JobOutcome::Skipped;
            }
            None => {
                tracing::debug!(job_id, "job no longer exists, not running");
                return JobOutcome::Skipped;
            }
        };

        tracing::info!(job_id, name = %job.name, "running scheduled job");
        let result = self.service.execute(&job.request(), false);

        let finished_at = Utc::now();
        let next_run = self.scheduler.next_run(job_id);
        let recorded = self.jobs.modify(job_id, |job| {
            job.last_run = Some(finished_at);
            job.run_count += 1;
            if next_run.is_some() {
                job.next_run = next_run;
            }
            Ok(())
        });
        if let Err(error) = recorded {
            tracing::warn!(job_id, error = %error, "could not record job run");
        }

        match result {
            Ok(run) => {
                tracing::info!(
                    job_id,
                    run_id = run.id,
                    files_moved = run.files_moved,
                    "scheduled job completed"
                );
                JobOutcome::Completed(run)
            }
            Err(error) => {
                let run_id = match &error {
                    Error::RunFailed { run_id, .. } => Some(*run_id),
                    _ => None,
                };
                tracing::error!(job_id, run_id, error = %error, "scheduled job failed");
                JobOutcome::Failed { run_id, error }
            }
        }
    }
}

impl JobHandler for JobRunner {
    fn fire(&self, job_id: u64) {
        self.run_job(job_id);
    }
}
