//! In-process intake queue.
//!
//! Webhooks are accepted as jobs and handed to a fixed number of worker
//! tasks. A job whose attempt fails with a transient error goes back to the
//! queue after `backoff * 2^(n-1)`; permanent errors and exhausted attempts
//! land in the failed set with the reason. Finished jobs stay queryable
//! until they are pruned by age or count.
//!
//! Shutdown stops intake but drains the waiting list; jobs sitting out a
//! retry backoff are failed with a shutdown reason. Jobs live in memory
//! only, so nothing survives a crash or a forced kill.

use crate::event::IssueEvent;
use crate::metrics_defs::{JOB_DURATION, JOB_RETRIES, JOBS_COMPLETED, JOBS_FAILED, QUEUE_WAITING};
use crate::reconciler::{Outcome, ReconcileError, Reconciler};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use shared::{counter, gauge, histogram};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type JobId = u64;

/// Runs one job attempt.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, event: &IssueEvent) -> Result<Outcome, ReconcileError>;
}

#[async_trait]
impl JobHandler for Reconciler {
    async fn handle(&self, event: &IssueEvent) -> Result<Outcome, ReconcileError> {
        self.reconcile(event).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retention {
    pub max_age: Duration,
    pub max_count: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct QueueOptions {
    /// Total attempts per job
    pub attempts: u32,
    /// Delay before the first retry; doubled for each further one
    pub backoff: Duration,
    pub remove_on_complete: Retention,
    pub remove_on_fail: Retention,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Waiting,
    Active,
    /// Waiting out the backoff before the next attempt
    Delayed,
    Completed,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct JobStatus {
    pub id: JobId,
    pub state: JobState,
    pub attempts_made: u32,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<Outcome>,
    /// Error of the most recent failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub delayed: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum CancelError {
    #[error("job {0} not found")]
    NotFound(JobId),
    #[error("job {0} has already started")]
    AlreadyStarted(JobId),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("queue is shutting down")]
pub struct QueueClosed;

struct Job {
    event: Arc<IssueEvent>,
    state: JobState,
    attempts_made: u32,
    outcome: Option<Outcome>,
    last_error: Option<String>,
    finished_at: Option<Instant>,
}

#[derive(Default)]
struct QueueState {
    next_id: JobId,
    jobs: HashMap<JobId, Job>,
    waiting: VecDeque<JobId>,
    /// Finished jobs, oldest first
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    workers: usize,
    closed: bool,
}

impl QueueState {
    fn take_waiting(&mut self) -> Option<(JobId, Arc<IssueEvent>, u32)> {
        while let Some(id) = self.waiting.pop_front() {
            if let Some(job) = self.jobs.get_mut(&id) {
                job.state = JobState::Active;
                job.attempts_made += 1;
                return Some((id, job.event.clone(), job.attempts_made));
            }
        }
        None
    }

    fn publish_waiting(&self) {
        gauge!(QUEUE_WAITING).set(self.waiting.len() as f64);
    }

    fn fail(&mut self, id: JobId, error: String, retention: Retention) {
        let Some(job) = self.jobs.get_mut(&id) else {
            return;
        };
        counter!(JOBS_FAILED).increment(1);
        job.state = JobState::Failed;
        job.last_error = Some(error);
        job.finished_at = Some(Instant::now());
        self.failed.push_back(id);
        prune(&mut self.failed, &mut self.jobs, retention.max_age, retention.max_count);
    }
}

const SHUTDOWN_REASON: &str = "queue shut down before the retry was due";

// Drops finished jobs older than `max_age`, then the oldest beyond `max_count`.
fn prune(
    list: &mut VecDeque<JobId>,
    jobs: &mut HashMap<JobId, Job>,
    max_age: Duration,
    max_count: usize,
) -> usize {
    let now = Instant::now();
    let before = list.len();

    list.retain(|id| {
        let expired = jobs
            .get(id)
            .and_then(|job| job.finished_at)
            .is_none_or(|finished| now.duration_since(finished) >= max_age);
        if expired {
            jobs.remove(id);
        }
        !expired
    });

    while list.len() > max_count {
        if let Some(id) = list.pop_front() {
            jobs.remove(&id);
        }
    }

    before - list.len()
}

struct Inner {
    state: Mutex<QueueState>,
    notify: Notify,
    options: QueueOptions,
}

#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<Inner>,
}

impl JobQueue {
    pub fn new(options: QueueOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
                options,
            }),
        }
    }

    pub fn enqueue(&self, event: IssueEvent) -> Result<JobId, QueueClosed> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(QueueClosed);
        }

        state.next_id += 1;
        let id = state.next_id;
        state.jobs.insert(
            id,
            Job {
                event: Arc::new(event),
                state: JobState::Waiting,
                attempts_made: 0,
                outcome: None,
                last_error: None,
                finished_at: None,
            },
        );
        state.waiting.push_back(id);
        state.publish_waiting();
        drop(state);

        self.inner.notify.notify_one();
        Ok(id)
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        let state = self.inner.state.lock();
        state.jobs.get(&id).map(|job| JobStatus {
            id,
            state: job.state,
            attempts_made: job.attempts_made,
            summary: job.event.summary.clone(),
            issue_key: job.event.issue_key.clone(),
            outcome: job.outcome.clone(),
            last_error: job.last_error.clone(),
        })
    }

    pub fn counts(&self) -> QueueCounts {
        let state = self.inner.state.lock();
        let mut counts = QueueCounts {
            completed: state.completed.len(),
            failed: state.failed.len(),
            ..QueueCounts::default()
        };
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Completed | JobState::Failed => {}
            }
        }
        counts
    }

    /// Removes a job that has not started yet, or is waiting for a retry.
    pub fn cancel(&self, id: JobId) -> Result<(), CancelError> {
        let mut state = self.inner.state.lock();
        let job_state = state
            .jobs
            .get(&id)
            .map(|job| job.state)
            .ok_or(CancelError::NotFound(id))?;

        match job_state {
            JobState::Waiting | JobState::Delayed => {
                state.jobs.remove(&id);
                state.waiting.retain(|waiting| *waiting != id);
                state.publish_waiting();
                tracing::info!(job_id = id, "Job cancelled");
                Ok(())
            }
            JobState::Active | JobState::Completed | JobState::Failed => {
                Err(CancelError::AlreadyStarted(id))
            }
        }
    }

    pub fn prune_completed(&self, max_age: Duration, max_count: usize) -> usize {
        let mut state = self.inner.state.lock();
        let QueueState {
            completed, jobs, ..
        } = &mut *state;
        prune(completed, jobs, max_age, max_count)
    }

    pub fn prune_failed(&self, max_age: Duration, max_count: usize) -> usize {
        let mut state = self.inner.state.lock();
        let QueueState { failed, jobs, .. } = &mut *state;
        prune(failed, jobs, max_age, max_count)
    }

    /// Applies the configured retention to both finished sets.
    pub fn prune_finished(&self) -> usize {
        let options = &self.inner.options;
        let removed = self.prune_completed(
            options.remove_on_complete.max_age,
            options.remove_on_complete.max_count,
        ) + self.prune_failed(
            options.remove_on_fail.max_age,
            options.remove_on_fail.max_count,
        );
        if removed > 0 {
            tracing::debug!(removed, "Pruned finished jobs");
        }
        removed
    }

    /// Starts `count` workers, each running one job at a time.
    pub fn spawn_workers<H: JobHandler>(&self, count: usize, handler: Arc<H>) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker| {
                let queue = self.clone();
                let handler = handler.clone();
                tokio::spawn(async move { queue.work(worker, handler).await })
            })
            .collect()
    }

    /// Stops accepting jobs. Workers drain the waiting list, then exit.
    /// Delayed jobs are moved to the failed set.
    pub fn shutdown(&self) {
        let retention = self.inner.options.remove_on_fail;
        let mut state = self.inner.state.lock();
        state.closed = true;

        let mut delayed: Vec<JobId> = state
            .jobs
            .iter()
            .filter(|(_, job)| job.state == JobState::Delayed)
            .map(|(id, _)| *id)
            .collect();
        delayed.sort_unstable();
        for id in &delayed {
            state.fail(*id, SHUTDOWN_REASON.to_string(), retention);
        }
        let draining = state.waiting.len();
        drop(state);

        tracing::info!(draining, failed = delayed.len(), "Queue shutting down");
        self.inner.notify.notify_waiters();
    }

    /// Whether workers are running and jobs are accepted.
    pub fn is_running(&self) -> bool {
        let state = self.inner.state.lock();
        state.workers > 0 && !state.closed
    }

    async fn work<H: JobHandler>(&self, worker: usize, handler: Arc<H>) {
        self.inner.state.lock().workers += 1;
        tracing::debug!(worker, "Queue worker started");

        while let Some((id, event, attempt)) = self.next_job().await {
            let started = Instant::now();
            let result = handler.handle(&event).await;
            let label = if result.is_ok() { "ok" } else { "error" };
            histogram!(JOB_DURATION, "result" => label).record(started.elapsed().as_secs_f64());

            self.finish_attempt(id, attempt, result);
        }

        self.inner.state.lock().workers -= 1;
        tracing::debug!(worker, "Queue worker stopped");
    }

    async fn next_job(&self) -> Option<(JobId, Arc<IssueEvent>, u32)> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.state.lock();
                if let Some(job) = state.take_waiting() {
                    state.publish_waiting();
                    return Some(job);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    fn finish_attempt(&self, id: JobId, attempt: u32, result: Result<Outcome, ReconcileError>) {
        let options = &self.inner.options;
        let mut state = self.inner.state.lock();
        let closed = state.closed;
        let QueueState {
            jobs, completed, ..
        } = &mut *state;
        let Some(job) = jobs.get_mut(&id) else {
            return;
        };

        match result {
            Ok(outcome) => {
                tracing::info!(job_id = id, attempt, ?outcome, "Job completed");
                counter!(JOBS_COMPLETED).increment(1);
                job.state = JobState::Completed;
                job.outcome = Some(outcome);
                job.finished_at = Some(Instant::now());
                completed.push_back(id);
                let retention = options.remove_on_complete;
                prune(completed, jobs, retention.max_age, retention.max_count);
            }
            Err(e) if e.is_transient() && attempt < options.attempts && closed => {
                tracing::error!(job_id = id, attempt, error = %e, "Job failed during shutdown");
                state.fail(id, format!("{e}; {SHUTDOWN_REASON}"), options.remove_on_fail);
            }
            Err(e) if e.is_transient() && attempt < options.attempts => {
                let delay = options
                    .backoff
                    .saturating_mul(2u32.saturating_pow(attempt - 1));
                tracing::warn!(
                    job_id = id,
                    attempt,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %e,
                    "Job attempt failed, retrying"
                );
                counter!(JOB_RETRIES).increment(1);
                job.state = JobState::Delayed;
                job.last_error = Some(e.to_string());
                drop(state);

                let queue = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.promote(id);
                });
            }
            Err(e) => {
                tracing::error!(job_id = id, attempt, error = %e, "Job failed");
                state.fail(id, e.to_string(), options.remove_on_fail);
            }
        }
    }

    // Moves a delayed job back to the waiting list, unless it was cancelled.
    fn promote(&self, id: JobId) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        let Some(job) = state.jobs.get_mut(&id) else {
            return;
        };
        if job.state != JobState::Delayed {
            return;
        }
        job.state = JobState::Waiting;
        state.waiting.push_back(id);
        state.publish_waiting();
        drop(state);

        self.inner.notify.notify_one();
    }
}

/// Applies the queue's retention every `interval` until the queue shuts down.
pub fn spawn_pruner(queue: JobQueue, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if queue.inner.state.lock().closed {
                break;
            }
            queue.prune_finished();
        }
    })
}
