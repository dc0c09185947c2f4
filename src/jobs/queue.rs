use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::jobs::job::{Dependency, Job, JobStatus};
use crate::pipeline::Task;

const DEFAULT_MAX_JOBS: usize = 10_000;

/// A job popped off the queue, ready to execute.
#[derive(Debug, Clone)]
pub struct RunnableJob {
    pub id: Uuid,
    pub task: Task,
    pub timeout: Duration,
}

/// FIFO job queue with single-parent dependencies.
#[derive(Debug)]
pub struct JobQueue {
    jobs: HashMap<Uuid, Job>,
    /// Insertion order, used for FIFO dispatch
    order: Vec<Uuid>,
    max_jobs: usize,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_JOBS)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: HashMap::new(),
            order: Vec::new(),
            max_jobs,
        }
    }

    /// Add a job. Returns false if the queue is at capacity.
    ///
    /// A job whose dependency is still pending starts out deferred. A
    /// dependency that already ended is resolved immediately, and an id the
    /// queue no longer knows about counts as satisfied.
    pub fn enqueue(&mut self, mut job: Job) -> bool {
        if self.jobs.len() >= self.max_jobs {
            return false;
        }

        job.status = match job.depends_on {
            None => JobStatus::Queued,
            Some(dep) => match self.jobs.get(&dep.job_id).map(|d| d.status) {
                None => JobStatus::Queued,
                Some(s) if !s.is_terminal() => JobStatus::Deferred,
                Some(s) if dep.satisfied_by(s) => JobStatus::Queued,
                Some(s) => {
                    job.error = Some(format!("dependency {} {}", dep.job_id, s));
                    job.ended_at = Some(Utc::now());
                    JobStatus::Canceled
                }
            },
        };

        tracing::debug!(job_id = %job.id, status = %job.status, "Job enqueued");
        self.order.push(job.id);
        self.jobs.insert(job.id, job);
        true
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn status(&self, id: &Uuid) -> Option<JobStatus> {
        self.jobs.get(id).map(|j| j.status)
    }

    /// Take the oldest queued job and mark it started.
    pub fn next_runnable(&mut self) -> Option<RunnableJob> {
        let id = *self
            .order
            .iter()
            .find(|id| self.jobs.get(id).map(|j| j.status) == Some(JobStatus::Queued))?;
        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::Started;
        job.started_at = Some(Utc::now());
        Some(RunnableJob {
            id,
            task: job.task.clone(),
            timeout: job.timeout,
        })
    }

    /// Record the outcome of a started job and release its dependents.
    pub fn complete(&mut self, id: &Uuid, outcome: std::result::Result<(), String>) -> bool {
        let status = match outcome {
            Ok(()) => JobStatus::Finished,
            Err(_) => JobStatus::Failed,
        };
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        job.status = status;
        job.error = outcome.err();
        job.ended_at = Some(Utc::now());
        self.release_dependents(*id, status);
        true
    }

    /// Stop a started job. Dependents are released as for a failure.
    pub fn stop(&mut self, id: &Uuid) -> bool {
        self.terminate(id, JobStatus::Started, JobStatus::Stopped)
    }

    /// Cancel a job that has not started yet.
    pub fn cancel(&mut self, id: &Uuid) -> bool {
        match self.status(id) {
            Some(s @ (JobStatus::Queued | JobStatus::Deferred | JobStatus::Scheduled)) => {
                self.terminate(id, s, JobStatus::Canceled)
            }
            _ => false,
        }
    }

    fn terminate(&mut self, id: &Uuid, expected: JobStatus, to: JobStatus) -> bool {
        match self.jobs.get_mut(id) {
            Some(job) if job.status == expected => {
                job.status = to;
                job.ended_at = Some(Utc::now());
                self.release_dependents(*id, to);
                true
            }
            _ => false,
        }
    }

    /// Move deferred dependents of `id` to queued, or cancel them (and their
    /// own dependents) when the dependency does not tolerate the outcome.
    fn release_dependents(&mut self, id: Uuid, status: JobStatus) {
        let mut resolved = vec![(id, status)];
        while let Some((parent, parent_status)) = resolved.pop() {
            let dependents: Vec<(Uuid, Dependency)> = self
                .jobs
                .values()
                .filter(|j| j.status == JobStatus::Deferred)
                .filter_map(|j| j.depends_on.map(|d| (j.id, d)))
                .filter(|(_, d)| d.job_id == parent)
                .collect();

            for (child, dep) in dependents {
                let Some(job) = self.jobs.get_mut(&child) else {
                    continue;
                };
                if dep.satisfied_by(parent_status) {
                    job.status = JobStatus::Queued;
                    tracing::debug!(job_id = %child, parent = %parent, "Dependent job released");
                } else {
                    job.status = JobStatus::Canceled;
                    job.error = Some(format!("dependency {} {}", parent, parent_status));
                    job.ended_at = Some(Utc::now());
                    tracing::debug!(job_id = %child, parent = %parent, "Dependent job canceled");
                    resolved.push((child, JobStatus::Canceled));
                }
            }
        }
    }

    /// Jobs waiting on `id`.
    pub fn dependents_of(&self, id: &Uuid) -> Vec<&Job> {
        self.jobs
            .values()
            .filter(|j| j.depends_on.map(|d| d.job_id) == Some(*id))
            .collect()
    }

    /// Drop terminal jobs whose retention has elapsed. Returns the number removed.
    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.is_expired(now));
        let jobs = &self.jobs;
        self.order.retain(|id| jobs.contains_key(id));
        before - self.jobs.len()
    }

    /// True when no job is queued, started or waiting on a dependency.
    pub fn is_idle(&self) -> bool {
        self.jobs.values().all(|j| j.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}
