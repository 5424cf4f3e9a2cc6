//! Read-through view of job and flow status events.
//!
//! The manager never hears from executors directly; it polls a
//! [`JobStatusRetriever`] backed by the service's status pipeline. Statuses
//! are eventually consistent: the manager tolerates missing entries
//! (treated as still pending) and fences stale ones with the job
//! generation counter.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use weft_core::DagId;

use crate::error::Result;
use crate::plan::ExecutionStatus;

/// Sentinel job name/group used to request a flow-level status.
pub const NA_KEY: &str = "NA";

/// Flow-level event names that confirm a flow has finished.
pub const FINISHED_STATUSES: &[&str] = &["COMPLETE", "FAILED", "CANCELLED"];

/// One status event read back from the status store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    /// The raw event name (`PENDING`, `RUNNING`, `COMPLETE`, ...).
    pub event_name: String,
    /// True if the failure should be retried rather than finalized.
    pub should_retry: bool,
    /// Attempts made so far, as seen by the status pipeline.
    pub current_attempts: u32,
    /// Maximum attempts configured for the job.
    pub max_attempts: u32,
    /// When the job entered `ORCHESTRATED`, if it has (epoch millis).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orchestrated_time_millis: Option<i64>,
    /// The job generation that produced this event.
    ///
    /// Events from a generation older than the node's are stale and must be
    /// ignored.
    pub generation: u64,
}

impl JobStatus {
    /// Creates a status event with the given name and generation.
    pub fn new(event_name: impl Into<String>, generation: u64) -> Self {
        Self {
            event_name: event_name.into(),
            should_retry: false,
            current_attempts: 0,
            max_attempts: 1,
            orchestrated_time_millis: None,
            generation,
        }
    }

    /// Maps the event name onto an [`ExecutionStatus`].
    #[must_use]
    pub fn execution_status(&self) -> ExecutionStatus {
        ExecutionStatus::from_event_name(&self.event_name)
    }

    /// Returns true if this is a finished flow-level status.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        FINISHED_STATUSES.contains(&self.event_name.as_str())
    }
}

/// Read-through access to per-job and per-flow status events.
#[async_trait]
pub trait JobStatusRetriever: Send + Sync {
    /// Returns the most recent execution ids for a flow, newest first,
    /// bounded to `limit`.
    async fn latest_execution_ids_for_flow(
        &self,
        flow_name: &str,
        flow_group: &str,
        limit: usize,
    ) -> Result<Vec<i64>>;

    /// Returns the latest status event for one job of a flow execution.
    async fn job_status(
        &self,
        dag_id: &DagId,
        job_group: &str,
        job_name: &str,
    ) -> Result<Option<JobStatus>>;

    /// Returns the flow-level status for an execution, requested through the
    /// [`NA_KEY`] sentinel.
    async fn flow_status(&self, dag_id: &DagId) -> Result<Option<JobStatus>> {
        self.job_status(dag_id, NA_KEY, NA_KEY).await
    }
}
