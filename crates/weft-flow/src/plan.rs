//! Job specifications and per-job execution state.
//!
//! A [`JobSpec`] is the immutable description of one job handed to us by the
//! orchestrator; a [`JobExecutionPlan`] wraps it with the mutable state the
//! manager tracks while driving the job: status, attempts, the opaque
//! submission handle, and the generation counter that fences stale status
//! events.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::producer::JobHandle;

/// Execution status of a job or flow.
///
/// Terminal statuses for a job are `Complete`, `Failed`, and `Cancelled`;
/// they are absorbing per attempt generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Not yet dispatched.
    Pending,
    /// Failed, awaiting an automatic retry.
    PendingRetry,
    /// Failed or cancelled, awaiting an explicit resume.
    PendingResume,
    /// Accepted by the executor but not yet running.
    Orchestrated,
    /// Running on the executor.
    Running,
    /// Finished successfully.
    Complete,
    /// Finished with an error.
    Failed,
    /// Cancelled by request or deadline.
    Cancelled,
}

impl ExecutionStatus {
    /// Returns true for `Complete`, `Failed`, and `Cancelled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Returns the wire event name for this status.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::PendingRetry => "PENDING_RETRY",
            Self::PendingResume => "PENDING_RESUME",
            Self::Orchestrated => "ORCHESTRATED",
            Self::Running => "RUNNING",
            Self::Complete => "COMPLETE",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Maps a wire event name back to a status.
    ///
    /// Unknown names map to `Pending`: the status store is eventually
    /// consistent and an unrecognized event must not advance the job.
    #[must_use]
    pub fn from_event_name(name: &str) -> Self {
        match name {
            "PENDING_RETRY" => Self::PendingRetry,
            "PENDING_RESUME" => Self::PendingResume,
            "ORCHESTRATED" => Self::Orchestrated,
            "RUNNING" => Self::Running,
            "COMPLETE" => Self::Complete,
            "FAILED" => Self::Failed,
            "CANCELLED" => Self::Cancelled,
            _ => Self::Pending,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// Action taken on the rest of a DAG when one of its jobs fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureOption {
    /// Let already-running jobs finish, then finalize the DAG.
    FinishRunning,
    /// Cancel every still-active job immediately.
    Cancel,
    /// Keep scheduling any job whose ancestors all succeeded.
    #[default]
    FinishAllPossible,
}

impl FailureOption {
    /// Parses the configuration spelling of a failure option.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "FINISH_RUNNING" => Some(Self::FinishRunning),
            "CANCEL" => Some(Self::Cancel),
            "FINISH_ALL_POSSIBLE" => Some(Self::FinishAllPossible),
            _ => None,
        }
    }
}

/// Immutable configuration of one job within a flow execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// The job's URI, used for cancellation on the executor.
    pub uri: String,
    /// The job's name, unique within its DAG.
    pub job_name: String,
    /// The job's group as reported to the status store.
    pub job_group: String,
    /// Group of the owning flow.
    pub flow_group: String,
    /// Name of the owning flow.
    pub flow_name: String,
    /// Execution id of the owning flow run (epoch millis at orchestration).
    pub flow_execution_id: i64,
    /// The user the job runs as, for quota accounting.
    pub user: String,
    /// Maximum submission attempts before the job is considered failed.
    pub max_attempts: u32,
    /// Flow-level deadline override; the manager default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_sla: Option<Duration>,
    /// Job-start deadline override; the manager default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_start_sla: Option<Duration>,
    /// Free-form job properties forwarded to the executor.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl JobSpec {
    /// Creates a job spec with defaults for the optional fields.
    pub fn new(
        uri: impl Into<String>,
        job_name: impl Into<String>,
        flow_group: impl Into<String>,
        flow_name: impl Into<String>,
        flow_execution_id: i64,
    ) -> Self {
        let flow_group = flow_group.into();
        Self {
            uri: uri.into(),
            job_name: job_name.into(),
            job_group: flow_group.clone(),
            flow_group,
            flow_name: flow_name.into(),
            flow_execution_id,
            user: String::new(),
            max_attempts: 1,
            flow_sla: None,
            job_start_sla: None,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the quota user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the maximum submission attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the flow-level deadline.
    #[must_use]
    pub const fn with_flow_sla(mut self, flow_sla: Duration) -> Self {
        self.flow_sla = Some(flow_sla);
        self
    }

    /// Sets the job-start deadline.
    #[must_use]
    pub const fn with_job_start_sla(mut self, job_start_sla: Duration) -> Self {
        self.job_start_sla = Some(job_start_sla);
        self
    }

    /// Returns the fully-qualified job name, `group.flow.execId.job`.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!(
            "{}.{}.{}.{}",
            self.flow_group, self.flow_name, self.flow_execution_id, self.job_name
        )
    }
}

/// Mutable execution state of one job node in a supervised DAG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecutionPlan {
    /// The immutable job configuration.
    pub spec: JobSpec,
    /// URI of the executor chosen for this job.
    pub executor_uri: String,
    /// Current execution status.
    pub status: ExecutionStatus,
    /// Opaque submission handle, absent until the job is dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<JobHandle>,
    /// Submission attempts made so far in this generation.
    pub current_attempts: u32,
    /// Start instant the flow deadline is measured from (epoch millis).
    ///
    /// Initially the orchestration time; reset to "now" on resume so the
    /// flow deadline restarts.
    pub flow_start_time_millis: i64,
    /// Monotonic generation, bumped on retry and resume so that status
    /// events from prior attempts are ignored.
    pub job_generation: u64,
}

impl JobExecutionPlan {
    /// Creates a plan for a job that has not been dispatched yet.
    pub fn new(spec: JobSpec, executor_uri: impl Into<String>) -> Self {
        let flow_start_time_millis = spec.flow_execution_id;
        Self {
            spec,
            executor_uri: executor_uri.into(),
            status: ExecutionStatus::Pending,
            handle: None,
            current_attempts: 0,
            flow_start_time_millis,
            job_generation: 1,
        }
    }

    /// Returns true if the job may still be (re)submitted by the scheduler.
    #[must_use]
    pub const fn is_submittable(&self) -> bool {
        matches!(
            self.status,
            ExecutionStatus::Pending
                | ExecutionStatus::PendingRetry
                | ExecutionStatus::PendingResume
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(ExecutionStatus::Complete.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::PendingRetry.is_terminal());
    }

    #[test]
    fn event_name_round_trip() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::PendingRetry,
            ExecutionStatus::PendingResume,
            ExecutionStatus::Orchestrated,
            ExecutionStatus::Running,
            ExecutionStatus::Complete,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::from_event_name(status.event_name()), status);
        }
    }

    #[test]
    fn unknown_event_name_defaults_to_pending() {
        assert_eq!(
            ExecutionStatus::from_event_name("SOMETHING_ELSE"),
            ExecutionStatus::Pending
        );
    }

    #[test]
    fn failure_option_parse() {
        assert_eq!(
            FailureOption::parse("FINISH_RUNNING"),
            Some(FailureOption::FinishRunning)
        );
        assert_eq!(FailureOption::parse("CANCEL"), Some(FailureOption::Cancel));
        assert_eq!(FailureOption::parse("nope"), None);
        assert_eq!(FailureOption::default(), FailureOption::FinishAllPossible);
    }

    #[test]
    fn new_plan_starts_pending_with_flow_start_at_orchestration() {
        let spec = JobSpec::new("weft:job0", "job0", "etl", "orders", 1_700_000_000_000);
        let plan = JobExecutionPlan::new(spec, "weft:executor");
        assert_eq!(plan.status, ExecutionStatus::Pending);
        assert_eq!(plan.current_attempts, 0);
        assert_eq!(plan.flow_start_time_millis, 1_700_000_000_000);
        assert!(plan.handle.is_none());
        assert!(plan.is_submittable());
    }
}
