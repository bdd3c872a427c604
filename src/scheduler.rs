//! Time-based job firing.
//!
//! The scheduler keeps one registration per job id and a tokio task that
//! sleeps until the earliest due registration. Firings run on the blocking
//! pool. A job whose previous firing is still in flight is skipped for that
//! tick, so the same job never runs twice at once.

use crate::error::{Error, Result};
use crate::trigger::Trigger;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Longest sleep between checks, bounding the effect of wall clock jumps.
const MAX_IDLE: Duration = Duration::from_secs(60);

/// Work performed when a registration comes due.
pub trait JobHandler: Send + Sync + 'static {
    fn fire(&self, job_id: u64);
}

#[derive(Debug)]
struct Registration {
    trigger: Trigger,
    next_fire: Option<DateTime<Utc>>,
    paused: bool,
}

#[derive(Default)]
struct Shared {
    registrations: Mutex<BTreeMap<u64, Registration>>,
    in_flight: Mutex<HashSet<u64>>,
    wake: Notify,
}

/// Marks a job as in flight until dropped.
pub struct FireGuard {
    shared: Arc<Shared>,
    job_id: u64,
}

impl FireGuard {
    fn acquire(shared: &Arc<Shared>, job_id: u64) -> Option<Self> {
        if !shared.in_flight.lock().insert(job_id) {
            return None;
        }
        Some(Self {
            shared: Arc::clone(shared),
            job_id,
        })
    }

    pub fn job_id(&self) -> u64 {
        self.job_id
    }
}

impl Drop for FireGuard {
    fn drop(&mut self) {
        self.shared.in_flight.lock().remove(&self.job_id);
    }
}

#[derive(Default)]
pub struct JobScheduler {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `job_id`, replacing any existing registration, and returns its
    /// first fire time.
    pub fn register(&self, job_id: u64, trigger: Trigger) -> Result<DateTime<Utc>> {
        let next_fire = trigger.next_after(Utc::now()).ok_or_else(|| {
            Error::validation(format!("{} has no upcoming fire time", trigger))
        })?;
        tracing::debug!(job_id, next_fire = %next_fire, trigger = %trigger, "registered job");
        self.shared.registrations.lock().insert(
            job_id,
            Registration {
                trigger,
                next_fire: Some(next_fire),
                paused: false,
            },
        );
        self.shared.wake.notify_one();
        Ok(next_fire)
    }

    /// Removes a registration. Unknown ids are ignored.
    pub fn unregister(&self, job_id: u64) {
        if self.shared.registrations.lock().remove(&job_id).is_some() {
            tracing::debug!(job_id, "unregistered job");
            self.shared.wake.notify_one();
        }
    }

    pub fn pause(&self, job_id: u64) {
        if let Some(registration) = self.shared.registrations.lock().get_mut(&job_id) {
            registration.paused = true;
        }
    }

    /// Resumes a paused registration, counting its next fire from now.
    pub fn resume(&self, job_id: u64) {
        let mut registrations = self.shared.registrations.lock();
        if let Some(registration) = registrations.get_mut(&job_id)
            && registration.paused
        {
            registration.paused = false;
            registration.next_fire = registration.trigger.next_after(Utc::now());
            self.shared.wake.notify_one();
        }
    }

    /// Next fire time, `None` when absent or paused.
    pub fn next_run(&self, job_id: u64) -> Option<DateTime<Utc>> {
        self.shared
            .registrations
            .lock()
            .get(&job_id)
            .filter(|r| !r.paused)
            .and_then(|r| r.next_fire)
    }

    /// The trigger a job is registered with.
    pub fn trigger(&self, job_id: u64) -> Option<Trigger> {
        self.shared
            .registrations
            .lock()
            .get(&job_id)
            .map(|r| r.trigger.clone())
    }

    /// Registered job ids in ascending order.
    pub fn job_ids(&self) -> Vec<u64> {
        self.shared.registrations.lock().keys().copied().collect()
    }

    pub fn is_registered(&self, job_id: u64) -> bool {
        self.shared.registrations.lock().contains_key(&job_id)
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Takes every registration due at `now`, advancing each to its next fire
    /// time after `now`. Overdue fires collapse into one.
    ///
    /// Jobs still in flight are skipped and get no guard.
    pub fn collect_due(&self, now: DateTime<Utc>) -> Vec<FireGuard> {
        let mut registrations = self.shared.registrations.lock();
        let mut due = Vec::new();

        for (&job_id, registration) in registrations.iter_mut() {
            if registration.paused {
                continue;
            }
            match registration.next_fire {
                Some(next_fire) if next_fire <= now => {}
                _ => continue,
            }
            registration.next_fire = registration.trigger.next_after(now);

            match FireGuard::acquire(&self.shared, job_id) {
                Some(guard) => due.push(guard),
                None => tracing::warn!(
                    job_id,
                    "previous firing still running, skipping this one"
                ),
            }
        }
        due
    }

    /// Spawns the scheduling loop on the current tokio runtime. Calling it
    /// again while running does nothing.
    pub fn start(&self, handler: Arc<dyn JobHandler>) -> Result<()> {
        let mut task = self.task.lock();
        if task.is_some() {
            return Ok(());
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| Error::conflict("the scheduler must be started inside a tokio runtime"))?;

        let scheduler = Self {
            shared: Arc::clone(&self.shared),
            task: Mutex::new(None),
        };
        *task = Some(runtime.spawn(async move { scheduler.run_loop(handler).await }));
        tracing::info!(
            jobs = self.shared.registrations.lock().len(),
            "scheduler started"
        );
        Ok(())
    }

    /// Stops the loop. Firings already handed to the blocking pool finish on
    /// their own.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            tracing::info!("scheduler stopped");
        }
    }

    async fn run_loop(&self, handler: Arc<dyn JobHandler>) {
        loop {
            for guard in self.collect_due(Utc::now()) {
                let handler = Arc::clone(&handler);
                let job_id = guard.job_id();
                tracing::debug!(job_id, "firing job");
                tokio::task::spawn_blocking(move || {
                    handler.fire(job_id);
                    drop(guard);
                });
            }

            let wait = self.until_next_fire(Utc::now());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shared.wake.notified() => {}
            }
        }
    }

    fn until_next_fire(&self, now: DateTime<Utc>) -> Duration {
        self.shared
            .registrations
            .lock()
            .values()
            .filter(|r| !r.paused)
            .filter_map(|r| r.next_fire)
            .min()
            .map(|next| (next - now).to_std().unwrap_or(Duration::ZERO))
            .map_or(MAX_IDLE, |wait| wait.min(MAX_IDLE))
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
