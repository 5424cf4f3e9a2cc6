//! The per-shard worker loop.
//!
//! Each worker owns a disjoint subset of DAGs, routed to it by
//! `flow_execution_id mod num_threads`. One pass runs the phases in a fixed
//! order: cancel (one per pass, so kills stay fair without starving
//! scheduling) → drain new submissions → begin resumes → finish resumes →
//! poll-and-advance → cleanup.
//!
//! The worker's index maps are single-writer: only the owning worker
//! mutates them, so they need no locks. Anything that must survive the
//! worker — the DAG checkpoints, the failed-dag mirror — lives in the
//! shared stores instead.
//!
//! A pass never aborts the worker: every phase catches, logs, and moves on.
//! The worker only stops when the supervisor flips the shutdown flag.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use petgraph::graph::NodeIndex;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use weft_core::DagId;

use crate::action::{DagAction, DagActionStore, DagActionType};
use crate::dag::JobDag;
use crate::events::{EventSink, FlowEvent, JobEvent, TimingEvent};
use crate::metrics::{DagManagerMetrics, FlowState};
use crate::plan::{ExecutionStatus, FailureOption, JobExecutionPlan};
use crate::producer::{FLOW_EXECUTION_ID_KEY, SERIALIZED_HANDLE_KEY};
use crate::quota::QuotaManager;
use crate::status::JobStatusRetriever;
use crate::store::{DagStateStore, FailedDagIds};
use crate::topology::TopologyRegistry;

pub(crate) fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Everything a worker shares with the rest of the manager.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) dag_state_store: Arc<dyn DagStateStore>,
    pub(crate) failed_dag_state_store: Arc<dyn DagStateStore>,
    pub(crate) dag_action_store: Option<Arc<dyn DagActionStore>>,
    pub(crate) job_status_retriever: Arc<dyn JobStatusRetriever>,
    pub(crate) topology: Arc<TopologyRegistry>,
    pub(crate) quota_manager: Arc<dyn QuotaManager>,
    pub(crate) event_sink: Arc<dyn EventSink>,
    pub(crate) metrics: DagManagerMetrics,
    pub(crate) job_start_sla_millis: i64,
    pub(crate) default_flow_sla_millis: i64,
    pub(crate) flow_status_tolerance_millis: i64,
}

/// Outcome of advancing one job node.
struct NodeAdvance {
    /// The node reached a terminal status and leaves the active index.
    finished: bool,
    /// Nodes newly dispatched by `submit_next` after a completion.
    next: Vec<NodeIndex>,
}

/// One shard of the DAG manager.
pub(crate) struct DagWorker {
    shard_id: usize,
    ctx: WorkerContext,
    submit_rx: mpsc::UnboundedReceiver<JobDag>,
    cancel_rx: mpsc::UnboundedReceiver<DagId>,
    resume_rx: mpsc::UnboundedReceiver<DagId>,

    /// DAGs this shard supervises.
    dags: HashMap<DagId, JobDag>,
    /// Active (submitted, not yet terminal) nodes per DAG, in dispatch order.
    dag_to_jobs: HashMap<DagId, VecDeque<NodeIndex>>,
    /// Memoised flow deadline per DAG, in millis.
    dag_to_sla: HashMap<DagId, i64>,
    /// DAGs whose terminal event was emitted, awaiting confirmation.
    dag_ids_to_clean: HashSet<DagId>,
    /// DAGs observed entering PENDING_RESUME, awaiting confirmation.
    resuming_dags: HashMap<DagId, JobDag>,
    /// Shared mirror of the failed-dag store's keys.
    failed_dag_ids: FailedDagIds,
}

impl DagWorker {
    pub(crate) fn new(
        shard_id: usize,
        ctx: WorkerContext,
        submit_rx: mpsc::UnboundedReceiver<JobDag>,
        cancel_rx: mpsc::UnboundedReceiver<DagId>,
        resume_rx: mpsc::UnboundedReceiver<DagId>,
        failed_dag_ids: FailedDagIds,
    ) -> Self {
        Self {
            shard_id,
            ctx,
            submit_rx,
            cancel_rx,
            resume_rx,
            dags: HashMap::new(),
            dag_to_jobs: HashMap::new(),
            dag_to_sla: HashMap::new(),
            dag_ids_to_clean: HashSet::new(),
            resuming_dags: HashMap::new(),
            failed_dag_ids,
        }
    }

    /// Runs the worker at a fixed cadence until shutdown.
    pub(crate) async fn run(
        mut self,
        polling_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            shard = self.shard_id,
            interval_ms = polling_interval.as_millis(),
            "dag worker started"
        );
        let mut ticker = tokio::time::interval(polling_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!(shard = self.shard_id, "dag worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Executes one pass of the shard's phases.
    ///
    /// Because the worker runs on a regular cadence, a pass avoids
    /// repetitive work: one cancellation, then drains, then one status poll
    /// per active job.
    pub(crate) async fn run_once(&mut self) {
        if let Ok(dag_id) = self.cancel_rx.try_recv() {
            if let Err(error) = self.cancel_dag(&dag_id).await {
                tracing::error!(%dag_id, %error, "failed to cancel dag");
            }
        }

        while let Ok(dag) = self.submit_rx.try_recv() {
            if dag.is_empty() {
                tracing::warn!("empty dag; ignoring the dag");
                continue;
            }
            if let Err(error) = self.initialize(dag).await {
                tracing::error!(%error, "failed to initialize dag");
            }
        }

        while let Ok(dag_id) = self.resume_rx.try_recv() {
            if let Err(error) = self.begin_resuming_dag(&dag_id).await {
                tracing::error!(%dag_id, %error, "failed to begin resuming dag");
            }
        }

        self.finish_resuming_dags().await;
        self.poll_and_advance().await;
        self.clean_up().await;
        self.ctx.metrics.mark_worker_heartbeat(self.shard_id);
    }

    fn emit_flow_event(&self, dag_id: &DagId, event: FlowEvent, message: Option<String>) {
        self.ctx
            .event_sink
            .submit(TimingEvent::flow(dag_id, event, message));
    }

    async fn remove_dag_action(&self, dag_id: &DagId, action_type: DagActionType) {
        if let Some(store) = &self.ctx.dag_action_store {
            let action = DagAction::new(dag_id, action_type);
            if let Err(error) = store.delete_dag_action(&action).await {
                tracing::error!(%dag_id, ?action_type, %error, "failed to delete dag action");
            }
        }
    }

    // --- Cancel phase ---

    /// Cancels every active job of the DAG and records the kill.
    async fn cancel_dag(&mut self, dag_id: &DagId) -> crate::error::Result<()> {
        tracing::info!(%dag_id, "cancelling dag");
        if self.dag_to_jobs.contains_key(dag_id) {
            let nodes: Vec<NodeIndex> = self
                .dag_to_jobs
                .get(dag_id)
                .map(|queue| queue.iter().copied().collect())
                .unwrap_or_default();
            tracing::info!(%dag_id, count = nodes.len(), "found active jobs to cancel");
            for idx in nodes {
                if let Err(error) = self.cancel_dag_node(dag_id, idx).await {
                    tracing::error!(%dag_id, %error, "failed to cancel job; continuing");
                }
            }
            if let Some(dag) = self.dags.get_mut(dag_id) {
                dag.set_flow_event(Some(FlowEvent::Cancelled));
                dag.set_message("Flow killed by request");
            }
        } else {
            tracing::warn!(%dag_id, "dag not found; it may already be cancelled or finished");
        }
        self.remove_dag_action(dag_id, DagActionType::Kill).await;
        Ok(())
    }

    /// Cancels one job on its executor, emitting the cancel event and
    /// marking the node `Cancelled` when a submission handle exists.
    async fn cancel_dag_node(
        &mut self,
        dag_id: &DagId,
        idx: NodeIndex,
    ) -> crate::error::Result<()> {
        let Some(plan) = self.dags.get(dag_id).and_then(|dag| dag.node(idx)).cloned() else {
            return Ok(());
        };
        let producer = self.ctx.topology.producer_for(&plan.executor_uri)?;

        let mut props = BTreeMap::new();
        props.insert(
            FLOW_EXECUTION_ID_KEY.to_string(),
            plan.spec.flow_execution_id.to_string(),
        );
        if let Some(handle) = &plan.handle {
            props.insert(
                SERIALIZED_HANDLE_KEY.to_string(),
                producer.serialize_handle(handle)?,
            );
            self.ctx
                .event_sink
                .submit(TimingEvent::job(&plan, JobEvent::Cancel, None));
            if let Some(node) = self.dags.get_mut(dag_id).and_then(|dag| dag.node_mut(idx)) {
                node.status = ExecutionStatus::Cancelled;
            }
        } else {
            tracing::warn!(
                job = %plan.spec.uri,
                "no submission handle when cancelling job; not sending cancellation event"
            );
        }
        producer.cancel_job(&plan.spec.uri, &props).await
    }

    // --- Submit phase ---

    /// Starts supervising a newly dequeued DAG: records already-running
    /// jobs (the leader-failover recovery path), dispatches the ready
    /// nodes, and reports the flow as running.
    async fn initialize(&mut self, dag: JobDag) -> crate::error::Result<()> {
        let Some(dag_id) = dag.dag_id() else {
            tracing::warn!("dag without an id; ignoring the dag");
            return Ok(());
        };
        if self.dags.contains_key(&dag_id) {
            tracing::warn!(%dag_id, "already tracking a dag with this id, skipping");
            return Ok(());
        }
        tracing::info!(%dag_id, "initializing dag");
        self.dags.insert(dag_id.clone(), dag);

        let mut recovered = Vec::new();
        if let Some(dag) = self.dags.get(&dag_id) {
            for idx in dag.node_indices() {
                if let Some(plan) = dag.node(idx) {
                    if plan.status == ExecutionStatus::Running {
                        recovered.push((idx, plan.clone()));
                    }
                }
            }
        }
        let was_running = !recovered.is_empty();
        for (idx, plan) in recovered {
            self.add_job_state(&dag_id, idx);
            self.ctx.metrics.increment_running_jobs(&plan);
        }

        let next = self.submit_next(&dag_id).await?;
        for idx in next {
            self.add_job_state(&dag_id, idx);
        }

        self.emit_flow_event(&dag_id, FlowEvent::Running, None);
        self.ctx
            .metrics
            .mark_flow_state(&dag_id.flow_id(), FlowState::Running);

        // Orchestration delay is only meaningful the first time the flow
        // transitions to running, not after a leader failover.
        if !was_running {
            self.ctx
                .metrics
                .record_orchestration_delay(Utc::now().timestamp_millis() - dag_id.flow_execution_id);
        }
        tracing::info!(%dag_id, "dag initialization complete");
        Ok(())
    }

    /// Dispatches the DAG's ready nodes and re-checkpoints it.
    async fn submit_next(&mut self, dag_id: &DagId) -> crate::error::Result<Vec<NodeIndex>> {
        let next = self
            .dags
            .get(dag_id)
            .ok_or_else(|| crate::error::Error::DagNotFound {
                dag_id: dag_id.clone(),
            })?
            .next_nodes();

        let mut submitted = Vec::new();
        for &idx in &next {
            self.submit_job(dag_id, idx).await;
            if let Some(plan) = self.dags.get(dag_id).and_then(|dag| dag.node(idx)) {
                submitted.push(plan.spec.job_name.clone());
            }
        }
        tracing::info!(%dag_id, jobs = ?submitted, "submitted next ready jobs");

        if let Some(dag) = self.dags.get(dag_id) {
            self.ctx.dag_state_store.write_checkpoint(dag).await?;
        }
        Ok(next)
    }

    /// Submits one job to its executor.
    ///
    /// Submission failures are terminal for this attempt but not for the
    /// pass: a `JOB_FAILED` event is emitted and the next poll will observe
    /// the failure through the status store.
    async fn submit_job(&mut self, dag_id: &DagId, idx: NodeIndex) {
        let Some(plan) = self
            .dags
            .get_mut(dag_id)
            .and_then(|dag| dag.node_mut(idx))
            .map(|node| {
                node.current_attempts += 1;
                node.status = ExecutionStatus::Running;
                node.clone()
            })
        else {
            return;
        };

        if let Err(error) = self.try_submit_job(dag_id, idx, &plan).await {
            let message = format!(
                "Cannot submit job {} on executor {} due to {error}",
                plan.spec.qualified_name(),
                plan.executor_uri
            );
            tracing::error!(%dag_id, job = %plan.spec.job_name, %error, "job submission failed");
            self.ctx
                .event_sink
                .submit(TimingEvent::job(&plan, JobEvent::Failed, Some(message)));
        }
    }

    async fn try_submit_job(
        &mut self,
        dag_id: &DagId,
        idx: NodeIndex,
        plan: &JobExecutionPlan,
    ) -> crate::error::Result<()> {
        self.ctx.quota_manager.check_quota(plan).await?;
        let producer = self.ctx.topology.producer_for(&plan.executor_uri)?;

        // Count the job as running before submitting: the quota is already
        // held, and a release at terminal status must find a matching
        // increment. Retries must not count twice.
        if plan.current_attempts == 1 {
            self.ctx.metrics.increment_running_jobs(plan);
        }

        let handle = producer.add_spec(&plan.spec).await?;
        if let Some(node) = self.dags.get_mut(dag_id).and_then(|dag| dag.node_mut(idx)) {
            node.handle = Some(handle.clone());
        }
        // Checkpoint with the handle recorded but before the executor ack:
        // a crash in between still lets the next leader find the handle.
        if let Some(dag) = self.dags.get(dag_id) {
            self.ctx.dag_state_store.write_checkpoint(dag).await?;
        }
        producer.await_submission(&handle).await?;

        let link = producer.execution_link(&handle, &plan.spec.uri);
        self.ctx
            .event_sink
            .submit(TimingEvent::job(plan, JobEvent::Orchestrated, Some(link)));
        self.ctx.metrics.increment_jobs_sent(plan);
        tracing::info!(
            job = %plan.spec.qualified_name(),
            executor = %plan.executor_uri,
            "orchestrated job"
        );
        Ok(())
    }

    // --- Resume phases ---

    /// Starts a resume: loads the DAG from the failed store, resets its
    /// failed/cancelled nodes to `PENDING_RESUME`, and parks it until the
    /// status store reflects the reset.
    async fn begin_resuming_dag(&mut self, dag_id: &DagId) -> crate::error::Result<()> {
        if !self.failed_dag_ids.contains(dag_id) {
            tracing::warn!(%dag_id, "no failed dag with this id, so cannot resume flow");
            self.remove_dag_action(dag_id, DagActionType::Resume).await;
            return Ok(());
        }
        let Some(mut dag) = self.ctx.failed_dag_state_store.get_dag(dag_id).await? else {
            tracing::error!(
                %dag_id,
                "dag tracked as failed but missing from the failed dag state store"
            );
            self.remove_dag_action(dag_id, DagActionType::Resume).await;
            return Ok(());
        };

        let resume_time_millis = Utc::now().timestamp_millis();
        self.emit_flow_event(dag_id, FlowEvent::PendingResume, None);

        let indices: Vec<NodeIndex> = dag.node_indices().collect();
        for idx in indices {
            if let Some(plan) = dag.node_mut(idx) {
                if matches!(
                    plan.status,
                    ExecutionStatus::Failed | ExecutionStatus::Cancelled
                ) {
                    plan.status = ExecutionStatus::PendingResume;
                    // The previous execution's attempts must not count
                    // against this generation's retries.
                    plan.current_attempts = 0;
                    plan.job_generation += 1;
                    let snapshot = plan.clone();
                    self.ctx.event_sink.submit(TimingEvent::job(
                        &snapshot,
                        JobEvent::PendingResume,
                        None,
                    ));
                }
                // The flow deadline restarts from the resume.
                plan.flow_start_time_millis = resume_time_millis;
            }
        }

        self.resuming_dags.insert(dag_id.clone(), dag);
        Ok(())
    }

    /// Finishes resumes whose reset the status store has confirmed.
    ///
    /// Separated from [`Self::begin_resuming_dag`] because status events
    /// are eventually consistent: the reset may take a while to be
    /// reflected, and re-initialising before that would observe the old
    /// FAILED statuses.
    async fn finish_resuming_dags(&mut self) {
        let pending: Vec<DagId> = self.resuming_dags.keys().cloned().collect();
        for dag_id in pending {
            if let Err(error) = self.try_finish_resuming(&dag_id).await {
                tracing::error!(%dag_id, %error, "error finishing resume; will retry next pass");
            }
        }
    }

    async fn try_finish_resuming(&mut self, dag_id: &DagId) -> crate::error::Result<()> {
        let flow_status = self.ctx.job_status_retriever.flow_status(dag_id).await?;
        if !flow_status
            .is_some_and(|s| s.event_name == ExecutionStatus::PendingResume.event_name())
        {
            return Ok(());
        }

        let jobs: Vec<(String, String)> = match self.resuming_dags.get(dag_id) {
            Some(dag) => dag
                .node_indices()
                .filter_map(|idx| dag.node(idx))
                .map(|plan| (plan.spec.job_group.clone(), plan.spec.job_name.clone()))
                .collect(),
            None => return Ok(()),
        };
        for (job_group, job_name) in jobs {
            let status = self
                .ctx
                .job_status_retriever
                .job_status(dag_id, &job_group, &job_name)
                .await?;
            if status.is_some_and(|s| matches!(s.event_name.as_str(), "FAILED" | "CANCELLED")) {
                return Ok(());
            }
        }

        let Some(dag) = self.resuming_dags.remove(dag_id) else {
            return Ok(());
        };
        self.ctx.dag_state_store.write_checkpoint(&dag).await?;
        self.ctx.failed_dag_state_store.clean_up(dag_id).await?;
        self.remove_dag_action(dag_id, DagActionType::Resume).await;
        self.failed_dag_ids.remove(dag_id);
        self.initialize(dag).await
    }

    // --- Poll-and-advance phase ---

    /// Polls every active job once and advances its DAG accordingly.
    async fn poll_and_advance(&mut self) {
        let active: Vec<(DagId, NodeIndex)> = self
            .dag_to_jobs
            .iter()
            .flat_map(|(dag_id, nodes)| nodes.iter().map(move |&idx| (dag_id.clone(), idx)))
            .collect();

        let mut newly_submitted: Vec<(DagId, Vec<NodeIndex>)> = Vec::new();
        let mut finished: Vec<(DagId, NodeIndex)> = Vec::new();

        for (dag_id, idx) in active {
            match self.advance_node(&dag_id, idx).await {
                Ok(advance) => {
                    if advance.finished {
                        finished.push((dag_id.clone(), idx));
                    }
                    if !advance.next.is_empty() {
                        newly_submitted.push((dag_id, advance.next));
                    }
                }
                Err(error) => {
                    // Keep processing the other dags assigned to this shard.
                    tracing::error!(%dag_id, %error, "error while advancing job; continuing");
                }
            }
        }

        for (dag_id, nodes) in newly_submitted {
            for idx in nodes {
                self.add_job_state(&dag_id, idx);
            }
        }
        for (dag_id, idx) in finished {
            self.delete_job_state(&dag_id, idx);
        }
    }

    async fn advance_node(
        &mut self,
        dag_id: &DagId,
        idx: NodeIndex,
    ) -> crate::error::Result<NodeAdvance> {
        let Some(plan) = self.dags.get(dag_id).and_then(|dag| dag.node(idx)).cloned() else {
            // The dag vanished from under the index; drop the entry.
            return Ok(NodeAdvance {
                finished: true,
                next: Vec::new(),
            });
        };

        let sla_killed = self.sla_kill_if_needed(dag_id, idx, &plan).await?;

        let started = Instant::now();
        let polled = self
            .ctx
            .job_status_retriever
            .job_status(dag_id, &plan.spec.job_group, &plan.spec.job_name)
            .await?;
        self.ctx.metrics.observe_status_poll(started.elapsed());
        // Events from a previous attempt generation are stale; treating
        // them as absent keeps a resubmitted job from being re-finalized.
        let polled = polled.filter(|status| status.generation >= plan.job_generation);

        let orphan_killed = self
            .kill_job_if_orphaned(dag_id, idx, &plan, polled.as_ref())
            .await?;

        let should_retry =
            !sla_killed && !orphan_killed && polled.as_ref().is_some_and(|s| s.should_retry);

        let status = if sla_killed || orphan_killed {
            ExecutionStatus::Cancelled
        } else if should_retry {
            ExecutionStatus::PendingRetry
        } else {
            polled
                .as_ref()
                .map_or(ExecutionStatus::Pending, |status| status.execution_status())
        };

        let mut advance = NodeAdvance {
            finished: false,
            next: Vec::new(),
        };
        match status {
            ExecutionStatus::Complete | ExecutionStatus::Failed | ExecutionStatus::Cancelled => {
                if let Some(node) = self.dags.get_mut(dag_id).and_then(|dag| dag.node_mut(idx)) {
                    node.status = status;
                }
                advance.next = self.on_job_finish(dag_id, idx).await?;
                advance.finished = true;
            }
            ExecutionStatus::Pending | ExecutionStatus::PendingRetry => {
                if let Some(node) = self.dags.get_mut(dag_id).and_then(|dag| dag.node_mut(idx)) {
                    node.status = status;
                }
            }
            _ => {
                if let Some(node) = self.dags.get_mut(dag_id).and_then(|dag| dag.node_mut(idx)) {
                    node.status = ExecutionStatus::Running;
                }
            }
        }

        if should_retry {
            if let Some(status) = polled.as_ref() {
                tracing::info!(
                    job = %plan.spec.qualified_name(),
                    current_attempts = status.current_attempts,
                    max_attempts = status.max_attempts,
                    "retrying job"
                );
            }
            if let Some(dag) = self.dags.get_mut(dag_id) {
                // The failure is not terminal for the flow.
                dag.set_flow_event(None);
                if let Some(node) = dag.node_mut(idx) {
                    node.job_generation += 1;
                }
            }
            self.submit_job(dag_id, idx).await;
        }

        Ok(advance)
    }

    /// Cancels the job if the flow ran past its deadline.
    ///
    /// The deadline is memoised per DAG on first use.
    async fn sla_kill_if_needed(
        &mut self,
        dag_id: &DagId,
        idx: NodeIndex,
        plan: &JobExecutionPlan,
    ) -> crate::error::Result<bool> {
        let flow_sla_millis = match self.dag_to_sla.get(dag_id) {
            Some(&sla) => sla,
            None => {
                let sla = plan
                    .spec
                    .flow_sla
                    .map_or(self.ctx.default_flow_sla_millis, duration_millis);
                self.dag_to_sla.insert(dag_id.clone(), sla);
                sla
            }
        };

        let now = Utc::now().timestamp_millis();
        if now > plan.flow_start_time_millis.saturating_add(flow_sla_millis) {
            tracing::info!(
                job = %plan.spec.qualified_name(),
                deadline_ms = flow_sla_millis,
                "flow exceeded its deadline; killing the job"
            );
            self.ctx.metrics.increment_run_sla_exceeded(plan);
            self.cancel_dag_node(dag_id, idx).await?;
            if let Some(dag) = self.dags.get_mut(dag_id) {
                dag.set_flow_event(Some(FlowEvent::RunDeadlineExceeded));
                dag.set_message(format!(
                    "Flow killed due to exceeding deadline of {flow_sla_millis} ms"
                ));
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Cancels the job if it sat in `ORCHESTRATED` past the start deadline.
    async fn kill_job_if_orphaned(
        &mut self,
        dag_id: &DagId,
        idx: NodeIndex,
        plan: &JobExecutionPlan,
        polled: Option<&crate::status::JobStatus>,
    ) -> crate::error::Result<bool> {
        let Some(status) = polled else {
            return Ok(false);
        };
        if status.execution_status() != ExecutionStatus::Orchestrated {
            return Ok(false);
        }
        let Some(orchestrated_millis) = status.orchestrated_time_millis else {
            return Ok(false);
        };
        let start_sla_millis = plan
            .spec
            .job_start_sla
            .map_or(self.ctx.job_start_sla_millis, duration_millis);

        let now = Utc::now().timestamp_millis();
        if now - orchestrated_millis > start_sla_millis {
            tracing::info!(
                job = %plan.spec.qualified_name(),
                deadline_ms = start_sla_millis,
                "job exceeded the start deadline; killing the job"
            );
            self.ctx.metrics.increment_start_sla_exceeded(plan);
            self.cancel_dag_node(dag_id, idx).await?;
            if let Some(dag) = self.dags.get_mut(dag_id) {
                dag.set_flow_event(Some(FlowEvent::StartDeadlineExceeded));
                dag.set_message(format!(
                    "Flow killed because no update received for {start_sla_millis} ms after orchestration"
                ));
            }
            return Ok(true);
        }
        Ok(false)
    }

    /// Applies the per-terminal-status policy once a job finishes.
    async fn on_job_finish(
        &mut self,
        dag_id: &DagId,
        idx: NodeIndex,
    ) -> crate::error::Result<Vec<NodeIndex>> {
        let Some(plan) = self.dags.get(dag_id).and_then(|dag| dag.node(idx)).cloned() else {
            return Ok(Vec::new());
        };
        tracing::info!(
            job = %plan.spec.qualified_name(),
            %dag_id,
            status = %plan.status,
            "job finished"
        );

        // Only decrement the running counter for jobs whose quota was
        // actually outstanding; releases and decrements must stay paired.
        if self.ctx.quota_manager.release_quota(&plan).await? {
            self.ctx.metrics.decrement_running_jobs(&plan);
        }

        match plan.status {
            ExecutionStatus::Failed => {
                if let Some(dag) = self.dags.get_mut(dag_id) {
                    dag.set_message(format!(
                        "Flow failed because job {} failed",
                        plan.spec.qualified_name()
                    ));
                    dag.set_flow_event(Some(FlowEvent::Failed));
                }
                self.ctx.metrics.increment_jobs_failed(&plan);
                Ok(Vec::new())
            }
            ExecutionStatus::Cancelled => {
                if let Some(dag) = self.dags.get_mut(dag_id) {
                    // A deadline kill already recorded its own flow event.
                    if dag.flow_event().is_none() {
                        dag.set_flow_event(Some(FlowEvent::Cancelled));
                    }
                }
                Ok(Vec::new())
            }
            ExecutionStatus::Complete => {
                self.ctx.metrics.increment_jobs_succeeded(&plan);
                self.submit_next(dag_id).await
            }
            _ => {
                tracing::warn!(job = %plan.spec.qualified_name(), "unexpected non-terminal status at job finish");
                Ok(Vec::new())
            }
        }
    }

    // --- Cleanup phase ---

    /// Classifies finished DAGs, emits their terminal events, and deletes
    /// them once the status store confirms the terminal status.
    async fn clean_up(&mut self) {
        // Approximates the emission instant, to account for the delay until
        // the status pipeline processes the event.
        let now = Utc::now().timestamp_millis();

        // Pass A: classification.
        let tracked: Vec<DagId> = self.dags.keys().cloned().collect();
        for dag_id in tracked {
            if self.dag_ids_to_clean.contains(&dag_id) {
                continue;
            }
            let Some((flow_event, failure_option)) = self
                .dags
                .get(&dag_id)
                .map(|dag| (dag.flow_event(), dag.failure_option()))
            else {
                continue;
            };

            if matches!(flow_event, Some(FlowEvent::Failed | FlowEvent::Cancelled)) {
                match failure_option {
                    FailureOption::FinishRunning => {
                        // The remaining jobs are no longer driven.
                        self.drop_active_jobs(&dag_id);
                    }
                    FailureOption::Cancel => {
                        let nodes: Vec<NodeIndex> = self
                            .dag_to_jobs
                            .get(&dag_id)
                            .map(|queue| queue.iter().copied().collect())
                            .unwrap_or_default();
                        for idx in nodes {
                            if let Err(error) = self.cancel_dag_node(&dag_id, idx).await {
                                tracing::error!(%dag_id, %error, "failed to cancel job; continuing");
                            }
                        }
                        self.drop_active_jobs(&dag_id);
                    }
                    FailureOption::FinishAllPossible => {}
                }
            }

            if !self.has_running_jobs(&dag_id) {
                self.dag_ids_to_clean.insert(dag_id.clone());
                let Some(event) = self.dags.get_mut(&dag_id).map(|dag| {
                    if dag.flow_event().is_none() {
                        // No failure was recorded, so the flow succeeded.
                        dag.set_flow_event(Some(FlowEvent::Succeeded));
                    }
                    dag.flow_event().unwrap_or(FlowEvent::Succeeded)
                }) else {
                    continue;
                };
                if event != FlowEvent::Succeeded {
                    self.add_failed_dag(&dag_id).await;
                }
                let message = self
                    .dags
                    .get(&dag_id)
                    .and_then(|dag| dag.message().map(String::from));
                self.emit_flow_event(&dag_id, event, message);
                if let Some(dag) = self.dags.get_mut(&dag_id) {
                    dag.set_event_emitted_at_millis(now);
                }
            }
        }

        // Pass B: confirmation.
        let to_confirm: Vec<DagId> = self.dag_ids_to_clean.iter().cloned().collect();
        for dag_id in to_confirm {
            if let Err(error) = self.try_confirm_and_clean(&dag_id, now).await {
                tracing::error!(%dag_id, %error, "error confirming dag completion; will retry next pass");
            }
        }
    }

    async fn try_confirm_and_clean(
        &mut self,
        dag_id: &DagId,
        now: i64,
    ) -> crate::error::Result<()> {
        let Some((flow_event, emitted_at, message)) = self.dags.get(dag_id).map(|dag| {
            (
                dag.flow_event(),
                dag.event_emitted_at_millis().unwrap_or(now),
                dag.message().map(String::from),
            )
        }) else {
            self.dag_ids_to_clean.remove(dag_id);
            return Ok(());
        };

        let flow_status = self.ctx.job_status_retriever.flow_status(dag_id).await?;
        if flow_status.is_some_and(|s| s.is_finished()) {
            let flow_id = dag_id.flow_id();
            match flow_event {
                Some(FlowEvent::Succeeded) => {
                    self.ctx
                        .metrics
                        .mark_flow_state(&flow_id, FlowState::Successful);
                }
                Some(
                    FlowEvent::Failed
                    | FlowEvent::Cancelled
                    | FlowEvent::StartDeadlineExceeded
                    | FlowEvent::RunDeadlineExceeded,
                ) => {
                    self.ctx.metrics.mark_flow_state(&flow_id, FlowState::Failed);
                }
                other => {
                    tracing::warn!(%dag_id, ?other, "unexpected flow event at cleanup");
                }
            }
            tracing::info!(%dag_id, event = ?flow_event, "dag finished; cleaning up from the state store");
            self.clean_up_dag(dag_id).await;
            self.dag_ids_to_clean.remove(dag_id);
        } else if now > emitted_at.saturating_add(self.ctx.flow_status_tolerance_millis) {
            // The status store has not processed the terminal event within
            // the tolerance; re-emit rather than assume it was received.
            if let Some(event) = flow_event {
                self.emit_flow_event(dag_id, event, message);
            }
        } else {
            tracing::debug!(%dag_id, "waiting for terminal flow status before cleaning up");
        }
        Ok(())
    }

    /// Writes the DAG into the failed store and mirrors its id.
    async fn add_failed_dag(&mut self, dag_id: &DagId) {
        tracing::info!(%dag_id, "adding dag to the failed dag state store");
        if let Some(dag) = self.dags.get(dag_id) {
            if let Err(error) = self.ctx.failed_dag_state_store.write_checkpoint(dag).await {
                tracing::error!(%dag_id, %error, "failed to add dag to the failed dag state store");
            }
        }
        self.failed_dag_ids.insert(dag_id.clone());
    }

    /// Deletes a finished DAG from the live store and the in-memory maps.
    async fn clean_up_dag(&mut self, dag_id: &DagId) {
        tracing::info!(%dag_id, "cleaning up dag");
        if let Some(dag) = self.dags.get_mut(dag_id) {
            // Clearing the flow event lets a later resume publish fresh
            // status without the stale terminal event in the way.
            dag.set_flow_event(None);
        }
        if let Err(error) = self.ctx.dag_state_store.clean_up(dag_id).await {
            tracing::error!(%dag_id, %error, "failed to clean dag from the state store");
        }
        self.dags.remove(dag_id);
        self.dag_to_jobs.remove(dag_id);
    }

    // --- Index maintenance ---

    fn add_job_state(&mut self, dag_id: &DagId, idx: NodeIndex) {
        self.dag_to_jobs
            .entry(dag_id.clone())
            .or_default()
            .push_back(idx);
    }

    fn delete_job_state(&mut self, dag_id: &DagId, idx: NodeIndex) {
        if let Some(queue) = self.dag_to_jobs.get_mut(dag_id) {
            queue.retain(|&node| node != idx);
        }
        self.dag_to_sla.remove(dag_id);
    }

    fn drop_active_jobs(&mut self, dag_id: &DagId) {
        if let Some(queue) = self.dag_to_jobs.get_mut(dag_id) {
            queue.clear();
        }
        self.dag_to_sla.remove(dag_id);
    }

    fn has_running_jobs(&self, dag_id: &DagId) -> bool {
        self.dag_to_jobs
            .get(dag_id)
            .is_some_and(|queue| !queue.is_empty())
    }

    #[cfg(test)]
    fn tracked_dag_count(&self) -> usize {
        self.dags.len()
    }

    #[cfg(test)]
    fn sla_entries(&self) -> usize {
        self.dag_to_sla.len()
    }

    #[cfg(test)]
    fn active_job_count(&self, dag_id: &DagId) -> usize {
        self.dag_to_jobs.get(dag_id).map_or(0, VecDeque::len)
    }
}
