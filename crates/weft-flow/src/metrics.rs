//! Observability metrics for the DAG manager.
//!
//! Exposed through the `metrics` crate facade; install any compatible
//! recorder (e.g. a Prometheus exporter) in the host to collect them.
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `weft_dag_manager_jobs_sent_total` | Counter | executor | Jobs submitted to executors |
//! | `weft_dag_manager_jobs_succeeded_total` | Counter | executor | Jobs that completed |
//! | `weft_dag_manager_jobs_failed_total` | Counter | executor | Jobs that failed |
//! | `weft_dag_manager_start_sla_exceeded_total` | Counter | executor | Jobs killed for missing the start deadline |
//! | `weft_dag_manager_run_sla_exceeded_total` | Counter | executor | Jobs killed for exceeding the flow deadline |
//! | `weft_dag_manager_running_jobs` | Gauge | - | Jobs currently on executors |
//! | `weft_dag_manager_flow_state` | Gauge | flow_group, flow_name | -1 failed / 0 running / 1 successful |
//! | `weft_dag_manager_orchestration_delay_millis` | Gauge | - | Submission-to-running latency of the latest flow |
//! | `weft_dag_manager_worker_heartbeats_total` | Counter | shard | Completed worker passes |
//! | `weft_dag_manager_status_poll_seconds` | Histogram | - | Job-status poll latency |

use std::time::Duration;

use crate::plan::JobExecutionPlan;

use weft_core::FlowId;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: jobs submitted to executors.
    pub const JOBS_SENT_TOTAL: &str = "weft_dag_manager_jobs_sent_total";
    /// Counter: jobs that completed successfully.
    pub const JOBS_SUCCEEDED_TOTAL: &str = "weft_dag_manager_jobs_succeeded_total";
    /// Counter: jobs that finished with a failure.
    pub const JOBS_FAILED_TOTAL: &str = "weft_dag_manager_jobs_failed_total";
    /// Counter: jobs killed for missing the job-start deadline.
    pub const START_SLA_EXCEEDED_TOTAL: &str = "weft_dag_manager_start_sla_exceeded_total";
    /// Counter: jobs killed for exceeding the flow deadline.
    pub const RUN_SLA_EXCEEDED_TOTAL: &str = "weft_dag_manager_run_sla_exceeded_total";
    /// Gauge: jobs currently on executors.
    pub const RUNNING_JOBS: &str = "weft_dag_manager_running_jobs";
    /// Gauge: per-flow state (-1 failed, 0 running, 1 successful).
    pub const FLOW_STATE: &str = "weft_dag_manager_flow_state";
    /// Gauge: orchestration delay of the most recently started flow.
    pub const ORCHESTRATION_DELAY_MILLIS: &str = "weft_dag_manager_orchestration_delay_millis";
    /// Counter: completed worker passes per shard.
    pub const WORKER_HEARTBEATS_TOTAL: &str = "weft_dag_manager_worker_heartbeats_total";
    /// Histogram: job-status poll latency in seconds.
    pub const STATUS_POLL_SECONDS: &str = "weft_dag_manager_status_poll_seconds";
}

/// Label keys used across metrics.
pub mod labels {
    /// Executor URI a job was sent to.
    pub const EXECUTOR: &str = "executor";
    /// Flow group.
    pub const FLOW_GROUP: &str = "flow_group";
    /// Flow name.
    pub const FLOW_NAME: &str = "flow_name";
    /// Worker shard index.
    pub const SHARD: &str = "shard";
}

/// Reported state of a flow for the flow-state gauge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// The flow finished unsuccessfully.
    Failed,
    /// The flow is running.
    Running,
    /// The flow finished successfully.
    Successful,
}

impl FlowState {
    const fn value(self) -> f64 {
        match self {
            Self::Failed => -1.0,
            Self::Running => 0.0,
            Self::Successful => 1.0,
        }
    }
}

/// High-level interface for recording DAG-manager metrics.
///
/// Cheap to clone and share across shards.
#[derive(Debug, Clone, Default)]
pub struct DagManagerMetrics;

impl DagManagerMetrics {
    /// Creates a metrics recorder.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Records a job submitted to its executor.
    pub fn increment_jobs_sent(&self, plan: &JobExecutionPlan) {
        metrics::counter!(
            names::JOBS_SENT_TOTAL,
            labels::EXECUTOR => plan.executor_uri.clone(),
        )
        .increment(1);
    }

    /// Records a job that completed successfully.
    pub fn increment_jobs_succeeded(&self, plan: &JobExecutionPlan) {
        metrics::counter!(
            names::JOBS_SUCCEEDED_TOTAL,
            labels::EXECUTOR => plan.executor_uri.clone(),
        )
        .increment(1);
    }

    /// Records a job that finished with a failure.
    pub fn increment_jobs_failed(&self, plan: &JobExecutionPlan) {
        metrics::counter!(
            names::JOBS_FAILED_TOTAL,
            labels::EXECUTOR => plan.executor_uri.clone(),
        )
        .increment(1);
    }

    /// Records a job killed for missing the job-start deadline.
    pub fn increment_start_sla_exceeded(&self, plan: &JobExecutionPlan) {
        metrics::counter!(
            names::START_SLA_EXCEEDED_TOTAL,
            labels::EXECUTOR => plan.executor_uri.clone(),
        )
        .increment(1);
    }

    /// Records a job killed for exceeding the flow deadline.
    pub fn increment_run_sla_exceeded(&self, plan: &JobExecutionPlan) {
        metrics::counter!(
            names::RUN_SLA_EXCEEDED_TOTAL,
            labels::EXECUTOR => plan.executor_uri.clone(),
        )
        .increment(1);
    }

    /// Counts a job now running on an executor.
    pub fn increment_running_jobs(&self, _plan: &JobExecutionPlan) {
        metrics::gauge!(names::RUNNING_JOBS).increment(1.0);
    }

    /// Uncounts a job that left its executor.
    pub fn decrement_running_jobs(&self, _plan: &JobExecutionPlan) {
        metrics::gauge!(names::RUNNING_JOBS).decrement(1.0);
    }

    /// Publishes a flow's state gauge.
    pub fn mark_flow_state(&self, flow_id: &FlowId, state: FlowState) {
        metrics::gauge!(
            names::FLOW_STATE,
            labels::FLOW_GROUP => flow_id.flow_group.clone(),
            labels::FLOW_NAME => flow_id.flow_name.clone(),
        )
        .set(state.value());
    }

    /// Records how long a flow waited between submission and running.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_orchestration_delay(&self, delay_millis: i64) {
        metrics::gauge!(names::ORCHESTRATION_DELAY_MILLIS).set(delay_millis.max(0) as f64);
    }

    /// Marks one completed pass of a worker shard.
    pub fn mark_worker_heartbeat(&self, shard: usize) {
        metrics::counter!(
            names::WORKER_HEARTBEATS_TOTAL,
            labels::SHARD => shard.to_string(),
        )
        .increment(1);
    }

    /// Records one job-status poll's latency.
    pub fn observe_status_poll(&self, elapsed: Duration) {
        metrics::histogram!(names::STATUS_POLL_SECONDS).record(elapsed.as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{JobExecutionPlan, JobSpec};

    fn plan() -> JobExecutionPlan {
        JobExecutionPlan::new(
            JobSpec::new("weft:job0", "job0", "etl", "orders", 100),
            "weft:executor",
        )
    }

    #[test]
    fn recording_without_an_installed_recorder_does_not_panic() {
        let recorder = DagManagerMetrics::new();
        let plan = plan();
        recorder.increment_jobs_sent(&plan);
        recorder.increment_jobs_succeeded(&plan);
        recorder.increment_jobs_failed(&plan);
        recorder.increment_start_sla_exceeded(&plan);
        recorder.increment_run_sla_exceeded(&plan);
        recorder.increment_running_jobs(&plan);
        recorder.decrement_running_jobs(&plan);
        recorder.mark_flow_state(&FlowId::new("etl", "orders"), FlowState::Running);
        recorder.record_orchestration_delay(1_500);
        recorder.mark_worker_heartbeat(0);
        recorder.observe_status_poll(Duration::from_millis(3));
    }

    #[test]
    fn flow_state_values() {
        assert_eq!(FlowState::Failed.value(), -1.0);
        assert_eq!(FlowState::Running.value(), 0.0);
        assert_eq!(FlowState::Successful.value(), 1.0);
    }
}
