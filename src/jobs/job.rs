use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::Task;

/// Lifecycle of a queued job.
///
/// `Waiting` is never assigned by the queue itself: the scheduler reports it
/// for stages whose upstream has not finished yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Started,
    Finished,
    Failed,
    Stopped,
    Canceled,
    Deferred,
    Scheduled,
    Waiting,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Stopped | JobStatus::Canceled
        )
    }

    /// Terminal without success.
    pub fn is_unsuccessful(&self) -> bool {
        self.is_terminal() && *self != JobStatus::Finished
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Started => write!(f, "started"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Stopped => write!(f, "stopped"),
            JobStatus::Canceled => write!(f, "canceled"),
            JobStatus::Deferred => write!(f, "deferred"),
            JobStatus::Scheduled => write!(f, "scheduled"),
            JobStatus::Waiting => write!(f, "waiting"),
        }
    }
}

/// Declares that a job may only start once `job_id` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub job_id: Uuid,
    /// Run even if the dependency did not finish successfully
    pub allow_failure: bool,
}

impl Dependency {
    pub fn tolerant(job_id: Uuid) -> Self {
        Self {
            job_id,
            allow_failure: true,
        }
    }

    pub fn strict(job_id: Uuid) -> Self {
        Self {
            job_id,
            allow_failure: false,
        }
    }

    /// Whether a dependent may run given the dependency's terminal status.
    pub fn satisfied_by(&self, status: JobStatus) -> bool {
        status == JobStatus::Finished || (self.allow_failure && status.is_unsuccessful())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub task: Task,
    pub status: JobStatus,
    pub depends_on: Option<Dependency>,
    pub timeout: Duration,
    /// How long the job stays queryable after reaching a terminal state
    pub result_ttl: Duration,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(task: Task, timeout: Duration, result_ttl: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            task,
            status: JobStatus::Queued,
            depends_on: None,
            timeout,
            result_ttl,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn depending_on(mut self, dependency: Option<Dependency>) -> Self {
        self.depends_on = dependency;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.status.is_terminal(), self.ended_at) {
            (true, Some(ended)) => chrono::Duration::from_std(self.result_ttl)
                .map(|ttl| now - ended >= ttl)
                .unwrap_or(false),
            _ => false,
        }
    }
}
