//! Flow and job lifecycle events.
//!
//! The manager reports progress by emitting [`TimingEvent`]s to an
//! [`EventSink`]. In production the sink feeds the job-status pipeline that
//! the [`crate::status::JobStatusRetriever`] later reads back; in tests an
//! in-memory sink records emissions for assertions.
//!
//! Events use ULID identifiers so their ids sort chronologically when
//! compared as strings, which keeps downstream event logs ordered without a
//! separate sequence field.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use weft_core::DagId;

use crate::plan::JobExecutionPlan;

/// Flow-level timing event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowEvent {
    /// The flow has been accepted and persisted.
    Pending,
    /// The flow's first jobs have been dispatched.
    Running,
    /// Every job finished successfully.
    Succeeded,
    /// A job failed and the flow finished unsuccessfully.
    Failed,
    /// The flow was cancelled by request.
    Cancelled,
    /// A resume was requested and is being applied.
    PendingResume,
    /// A job sat unstarted past the job-start deadline.
    StartDeadlineExceeded,
    /// The flow ran past its deadline.
    RunDeadlineExceeded,
}

impl FlowEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Pending => "FLOW_PENDING",
            Self::Running => "FLOW_RUNNING",
            Self::Succeeded => "FLOW_SUCCEEDED",
            Self::Failed => "FLOW_FAILED",
            Self::Cancelled => "FLOW_CANCELLED",
            Self::PendingResume => "FLOW_PENDING_RESUME",
            Self::StartDeadlineExceeded => "FLOW_START_DEADLINE_EXCEEDED",
            Self::RunDeadlineExceeded => "FLOW_RUN_DEADLINE_EXCEEDED",
        }
    }
}

/// Job-level timing event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEvent {
    /// The job was submitted to an executor.
    Orchestrated,
    /// The job was cancelled.
    Cancel,
    /// The job is being reset for a resume.
    PendingResume,
    /// The job could not be submitted.
    Failed,
}

impl JobEvent {
    /// Returns the wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Orchestrated => "JOB_ORCHESTRATED",
            Self::Cancel => "JOB_CANCEL",
            Self::PendingResume => "JOB_PENDING_RESUME",
            Self::Failed => "JOB_FAILED",
        }
    }
}

/// One emitted lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingEvent {
    /// Unique event identifier (ULID, chronologically sortable).
    pub id: String,
    /// The event's wire name (`FLOW_*` or `JOB_*`).
    pub name: String,
    /// The DAG the event belongs to, in canonical string form.
    pub dag_id: String,
    /// The job the event belongs to, absent for flow-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Free-form message attached to the event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the event was emitted.
    pub timestamp: DateTime<Utc>,
}

impl TimingEvent {
    /// Creates a flow-level event.
    #[must_use]
    pub fn flow(dag_id: &DagId, event: FlowEvent, message: Option<String>) -> Self {
        Self {
            id: Ulid::new().to_string(),
            name: event.name().to_string(),
            dag_id: dag_id.to_string(),
            job_name: None,
            message,
            timestamp: Utc::now(),
        }
    }

    /// Creates a job-level event from the job's plan.
    #[must_use]
    pub fn job(plan: &JobExecutionPlan, event: JobEvent, message: Option<String>) -> Self {
        let dag_id = DagId::new(
            plan.spec.flow_group.clone(),
            plan.spec.flow_name.clone(),
            plan.spec.flow_execution_id,
        );
        Self {
            id: Ulid::new().to_string(),
            name: event.name().to_string(),
            dag_id: dag_id.to_string(),
            job_name: Some(plan.spec.job_name.clone()),
            message,
            timestamp: Utc::now(),
        }
    }
}

/// A sink for lifecycle events.
///
/// Submitting is infallible from the caller's point of view: a sink that
/// fails to forward an event must handle (or log) the failure itself, the
/// way the worker loop tolerates any other transient fault.
pub trait EventSink: Send + Sync {
    /// Records one event.
    fn submit(&self, event: TimingEvent);
}

/// Event sink that logs events through `tracing`.
///
/// The default sink for hosts without a dedicated event pipeline.
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn submit(&self, event: TimingEvent) {
        tracing::info!(
            event = %event.name,
            dag_id = %event.dag_id,
            job_name = event.job_name.as_deref().unwrap_or(""),
            message = event.message.as_deref().unwrap_or(""),
            "lifecycle event"
        );
    }
}

/// In-memory event sink for tests.
#[derive(Debug, Default)]
pub struct InMemoryEventSink {
    events: RwLock<Vec<TimingEvent>>,
}

impl InMemoryEventSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<TimingEvent> {
        self.events.read().map(|e| e.clone()).unwrap_or_default()
    }

    /// Returns the recorded event names, in emission order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.name)
            .collect()
    }

    /// Drains the sink, returning all events in emission order.
    pub fn drain(&self) -> Vec<TimingEvent> {
        self.events
            .write()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl EventSink for InMemoryEventSink {
    fn submit(&self, event: TimingEvent) {
        if let Ok(mut events) = self.events.write() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::JobSpec;

    #[test]
    fn flow_event_names_match_wire_form() {
        assert_eq!(FlowEvent::Succeeded.name(), "FLOW_SUCCEEDED");
        assert_eq!(
            FlowEvent::RunDeadlineExceeded.name(),
            "FLOW_RUN_DEADLINE_EXCEEDED"
        );
        assert_eq!(JobEvent::Orchestrated.name(), "JOB_ORCHESTRATED");
    }

    #[test]
    fn memory_sink_records_in_order() {
        let sink = InMemoryEventSink::new();
        let dag_id = DagId::new("etl", "orders", 7);
        sink.submit(TimingEvent::flow(&dag_id, FlowEvent::Pending, None));
        sink.submit(TimingEvent::flow(&dag_id, FlowEvent::Running, None));
        assert_eq!(sink.names(), vec!["FLOW_PENDING", "FLOW_RUNNING"]);
    }

    #[test]
    fn job_event_carries_dag_and_job_identity() {
        let spec = JobSpec::new("weft:job0", "job0", "etl", "orders", 99);
        let plan = crate::plan::JobExecutionPlan::new(spec, "weft:executor");
        let event = TimingEvent::job(&plan, JobEvent::Cancel, None);
        assert_eq!(event.dag_id, "etl_orders_99");
        assert_eq!(event.job_name.as_deref(), Some("job0"));
    }
}
