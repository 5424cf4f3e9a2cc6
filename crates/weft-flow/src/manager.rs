//! The leader-gated DAG manager supervisor.
//!
//! A [`DagManager`] owns the worker shards and routes every external
//! request to the shard that supervises the targeted flow execution:
//! `shard = flow_execution_id mod num_threads`, stable across request
//! kinds. Cancellation and resume must land on the shard that admitted the
//! DAG, because the submission handles live only in that shard's in-memory
//! indices.
//!
//! The manager is idle at construction and only does work while it holds
//! leadership: `set_active(true)` builds the shards, seeds the quota
//! accounting, and re-drives every DAG persisted in the live store;
//! `set_active(false)` tears the shards down again. Every mutating public
//! operation is silently dropped while inactive — the durable stores are
//! the source of truth and the next leader re-drives from them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use weft_core::{DagId, FlowId};

use crate::action::{DagAction, DagActionStore, DagActionType};
use crate::catalog::{FlowCatalog, FlowSpec, InMemoryFlowCatalog};
use crate::config::DagManagerConfig;
use crate::dag::JobDag;
use crate::error::{Error, Result};
use crate::events::{EventSink, FlowEvent, TimingEvent, TracingEventSink};
use crate::metrics::DagManagerMetrics;
use crate::producer::SpecProducer;
use crate::quota::QuotaManager;
use crate::quota::memory::InMemoryQuotaManager;
use crate::retention::FailedDagRetention;
use crate::status::JobStatusRetriever;
use crate::store::memory::InMemoryDagStateStore;
use crate::store::{DagStateStore, FailedDagIds};
use crate::topology::TopologyRegistry;
use crate::worker::{DagWorker, WorkerContext, duration_millis};

/// Returns the worker shard that owns a flow execution.
pub(crate) fn shard_for(flow_execution_id: i64, num_threads: usize) -> usize {
    let threads = i64::try_from(num_threads.max(1)).unwrap_or(1);
    usize::try_from(flow_execution_id.rem_euclid(threads)).unwrap_or(0)
}

/// Producer ends of one shard's queues.
struct ShardQueues {
    submit: mpsc::UnboundedSender<JobDag>,
    cancel: mpsc::UnboundedSender<DagId>,
    resume: mpsc::UnboundedSender<DagId>,
}

/// State guarded by the supervisor mutex.
#[derive(Default)]
struct ManagerState {
    active: bool,
    shards: Vec<ShardQueues>,
    worker_handles: Vec<JoinHandle<()>>,
    aux_handles: Vec<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
    failed_dag_ids: FailedDagIds,
}

/// Builder for [`DagManager`].
///
/// Collaborators default to in-memory implementations so a manager can be
/// assembled incrementally; production hosts inject their durable stores
/// (e.g. [`crate::store::fs::FsDagStateStore`]) and real quota manager.
pub struct DagManagerBuilder {
    config: DagManagerConfig,
    job_status_retriever: Arc<dyn JobStatusRetriever>,
    dag_state_store: Arc<dyn DagStateStore>,
    failed_dag_state_store: Arc<dyn DagStateStore>,
    dag_action_store: Option<Arc<dyn DagActionStore>>,
    flow_catalog: Arc<dyn FlowCatalog>,
    quota_manager: Arc<dyn QuotaManager>,
    event_sink: Arc<dyn EventSink>,
    topology: Arc<TopologyRegistry>,
}

impl DagManagerBuilder {
    /// Starts a builder with the given config and status retriever.
    pub fn new(
        config: DagManagerConfig,
        job_status_retriever: Arc<dyn JobStatusRetriever>,
    ) -> Self {
        Self {
            config,
            job_status_retriever,
            dag_state_store: Arc::new(InMemoryDagStateStore::new()),
            failed_dag_state_store: Arc::new(InMemoryDagStateStore::new()),
            dag_action_store: None,
            flow_catalog: Arc::new(InMemoryFlowCatalog::new()),
            quota_manager: Arc::new(InMemoryQuotaManager::unlimited()),
            event_sink: Arc::new(TracingEventSink),
            topology: Arc::new(TopologyRegistry::new()),
        }
    }

    /// Sets the live DAG state store.
    #[must_use]
    pub fn dag_state_store(mut self, store: Arc<dyn DagStateStore>) -> Self {
        self.dag_state_store = store;
        self
    }

    /// Sets the failed-dag state store.
    #[must_use]
    pub fn failed_dag_state_store(mut self, store: Arc<dyn DagStateStore>) -> Self {
        self.failed_dag_state_store = store;
        self
    }

    /// Sets the optional dag-action store.
    #[must_use]
    pub fn dag_action_store(mut self, store: Arc<dyn DagActionStore>) -> Self {
        self.dag_action_store = Some(store);
        self
    }

    /// Sets the flow catalog.
    #[must_use]
    pub fn flow_catalog(mut self, catalog: Arc<dyn FlowCatalog>) -> Self {
        self.flow_catalog = catalog;
        self
    }

    /// Sets the quota manager.
    #[must_use]
    pub fn quota_manager(mut self, quota_manager: Arc<dyn QuotaManager>) -> Self {
        self.quota_manager = quota_manager;
        self
    }

    /// Sets the lifecycle event sink.
    #[must_use]
    pub fn event_sink(mut self, event_sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = event_sink;
        self
    }

    /// Sets the executor topology registry.
    #[must_use]
    pub fn topology(mut self, topology: Arc<TopologyRegistry>) -> Self {
        self.topology = topology;
        self
    }

    /// Builds the manager, idle until `set_active(true)`.
    #[must_use]
    pub fn build(self) -> DagManager {
        DagManager {
            config: self.config,
            job_status_retriever: self.job_status_retriever,
            dag_state_store: self.dag_state_store,
            failed_dag_state_store: self.failed_dag_state_store,
            dag_action_store: self.dag_action_store,
            flow_catalog: self.flow_catalog,
            quota_manager: self.quota_manager,
            event_sink: self.event_sink,
            topology: self.topology,
            metrics: DagManagerMetrics::new(),
            state: Mutex::new(ManagerState::default()),
        }
    }
}

/// Supervisor of the DAG execution machinery.
pub struct DagManager {
    config: DagManagerConfig,
    job_status_retriever: Arc<dyn JobStatusRetriever>,
    dag_state_store: Arc<dyn DagStateStore>,
    failed_dag_state_store: Arc<dyn DagStateStore>,
    dag_action_store: Option<Arc<dyn DagActionStore>>,
    flow_catalog: Arc<dyn FlowCatalog>,
    quota_manager: Arc<dyn QuotaManager>,
    event_sink: Arc<dyn EventSink>,
    topology: Arc<TopologyRegistry>,
    metrics: DagManagerMetrics,
    state: Mutex<ManagerState>,
}

impl DagManager {
    /// Returns true while this manager holds leadership.
    pub async fn is_active(&self) -> bool {
        self.state.lock().await.active
    }

    /// Flips the manager's leadership state.
    ///
    /// Activation loads the failed-dag ids, seeds the quota accounting
    /// from the live store, schedules the worker shards and the retention
    /// sweep, re-drives every persisted DAG, and starts the housekeeping
    /// re-sync with doubling delays. Deactivation stops the shards and
    /// discards the in-memory state; the durable stores stay authoritative.
    ///
    /// # Errors
    ///
    /// Returns an error if the durable stores cannot be read during
    /// activation.
    pub async fn set_active(self: &Arc<Self>, active: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.active == active {
            tracing::info!(active, "dag manager already in the requested state, skipping");
            return Ok(());
        }
        state.active = active;
        if active {
            self.activate(&mut state).await
        } else {
            Self::deactivate(&mut state, self.config.termination_timeout).await;
            Ok(())
        }
    }

    async fn activate(self: &Arc<Self>, state: &mut ManagerState) -> Result<()> {
        tracing::info!(
            num_threads = self.config.num_threads,
            "activating dag manager"
        );

        let failed_dag_ids = FailedDagIds::new();
        for dag_id in self.failed_dag_state_store.get_dag_ids().await? {
            failed_dag_ids.insert(dag_id);
        }

        let dags = self.dag_state_store.get_dags().await?;
        // Seed the quota accounting from the recovered DAGs so counts
        // survive the leadership change.
        self.quota_manager.init(&dags).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = WorkerContext {
            dag_state_store: self.dag_state_store.clone(),
            failed_dag_state_store: self.failed_dag_state_store.clone(),
            dag_action_store: self.dag_action_store.clone(),
            job_status_retriever: self.job_status_retriever.clone(),
            topology: self.topology.clone(),
            quota_manager: self.quota_manager.clone(),
            event_sink: self.event_sink.clone(),
            metrics: self.metrics.clone(),
            job_start_sla_millis: duration_millis(self.config.job_start_sla),
            default_flow_sla_millis: duration_millis(self.config.default_flow_sla),
            flow_status_tolerance_millis: duration_millis(self.config.flow_status_tolerance),
        };

        let mut shards = Vec::with_capacity(self.config.num_threads);
        let mut worker_handles = Vec::with_capacity(self.config.num_threads);
        for shard_id in 0..self.config.num_threads {
            let (submit_tx, submit_rx) = mpsc::unbounded_channel();
            let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
            let (resume_tx, resume_rx) = mpsc::unbounded_channel();
            let worker = DagWorker::new(
                shard_id,
                ctx.clone(),
                submit_rx,
                cancel_rx,
                resume_rx,
                failed_dag_ids.clone(),
            );
            worker_handles.push(tokio::spawn(
                worker.run(self.config.polling_interval, shutdown_rx.clone()),
            ));
            shards.push(ShardQueues {
                submit: submit_tx,
                cancel: cancel_tx,
                resume: resume_tx,
            });
        }
        state.shards = shards;
        state.worker_handles = worker_handles;
        state.failed_dag_ids = failed_dag_ids.clone();
        state.shutdown = Some(shutdown_tx);

        let retention = FailedDagRetention::new(
            self.failed_dag_state_store.clone(),
            failed_dag_ids,
            self.config.failed_dag_retention,
        );
        let retention_interval = self.config.retention_polling_interval;
        let mut retention_shutdown = shutdown_rx.clone();
        state.aux_handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(retention_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        retention.run_once().await;
                    }
                    changed = retention_shutdown.changed() => {
                        if changed.is_err() || *retention_shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));

        let mut loaded = 0;
        for dag in dags {
            Self::offer_dag(state, self.config.num_threads, dag)?;
            loaded += 1;
        }
        tracing::info!(loaded, "loaded dags from the dag state store");

        // Housekeeping: re-run the load on a doubling-delay schedule to
        // recover DAGs a transient read error may have hidden.
        let manager = Arc::clone(self);
        let mut housekeeping_shutdown = shutdown_rx;
        let initial_delay = self.config.housekeeping_initial_delay;
        let max_delay = self.config.housekeeping_max_delay;
        state.aux_handles.push(tokio::spawn(async move {
            let mut delay = initial_delay;
            while delay < max_delay {
                tokio::select! {
                    () = tokio::time::sleep(delay) => {
                        if let Err(error) = manager.resync().await {
                            tracing::error!(%error, "failed to sync dag state store");
                        }
                    }
                    changed = housekeeping_shutdown.changed() => {
                        if changed.is_err() || *housekeeping_shutdown.borrow() {
                            return;
                        }
                    }
                }
                delay = delay.saturating_mul(2);
            }
        }));

        Ok(())
    }

    async fn deactivate(state: &mut ManagerState, termination_timeout: Duration) {
        tracing::info!("inactivating the dag manager; shutting down all workers");
        if let Some(shutdown) = state.shutdown.take() {
            let _ = shutdown.send(true);
        }
        for handle in state.worker_handles.drain(..) {
            let abort = handle.abort_handle();
            if tokio::time::timeout(termination_timeout, handle)
                .await
                .is_err()
            {
                tracing::error!("timed out waiting for a dag worker to stop; aborting it");
                abort.abort();
            }
        }
        for handle in state.aux_handles.drain(..) {
            handle.abort();
        }
        state.shards.clear();
        state.failed_dag_ids = FailedDagIds::new();
    }

    /// Submits a DAG for supervision.
    ///
    /// With `persist`, the DAG is checkpointed to the live store first and
    /// the corresponding LAUNCH action is deleted, so a leader failover
    /// does not relaunch it. With `set_status`, a `FLOW_PENDING` event is
    /// emitted. Silently dropped while inactive.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint write fails or the owning
    /// shard's queue refuses the DAG.
    pub async fn add_dag(&self, dag: JobDag, persist: bool, set_status: bool) -> Result<()> {
        let state = self.state.lock().await;
        if !state.active {
            tracing::warn!("skipping add dag because this dag manager instance is not active");
            return Ok(());
        }
        let Some(dag_id) = dag.dag_id() else {
            tracing::warn!("dag without an id; ignoring the dag");
            return Ok(());
        };
        tracing::info!(%dag_id, persist, set_status, "adding dag");

        if persist {
            self.dag_state_store.write_checkpoint(&dag).await?;
            // Once persisted, active managers track the execution; the
            // LAUNCH action must go so a failover does not run it twice.
            if let Some(action_store) = &self.dag_action_store {
                action_store
                    .delete_dag_action(&DagAction::new(&dag_id, DagActionType::Launch))
                    .await?;
            }
        }

        Self::offer_dag(&state, self.config.num_threads, dag)?;

        if set_status {
            self.event_sink
                .submit(TimingEvent::flow(&dag_id, FlowEvent::Pending, None));
        }
        Ok(())
    }

    /// Submits a DAG and, on success, removes its flow spec from the
    /// catalog when the spec is ad-hoc (carries no schedule).
    ///
    /// # Errors
    ///
    /// Returns an error if the submission or the catalog removal fails.
    pub async fn add_dag_and_remove_adhoc_flow_spec(
        &self,
        flow_spec: &FlowSpec,
        dag: JobDag,
        persist: bool,
        set_status: bool,
    ) -> Result<()> {
        self.add_dag(dag, persist, set_status).await?;
        let state = self.state.lock().await;
        // Only the active manager may delete the spec.
        if state.active && !flow_spec.scheduled {
            self.flow_catalog.remove(&flow_spec.uri).await?;
        }
        Ok(())
    }

    /// Requests cancellation of a flow's recent executions.
    ///
    /// The execution ids are resolved through the status store, bounded to
    /// the configured limit, and each kill is routed to the shard owning
    /// that execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the status store lookup fails or a shard queue
    /// refuses the kill.
    pub async fn stop_dag(&self, flow_id: &FlowId) -> Result<()> {
        let state = self.state.lock().await;
        if !state.active {
            tracing::warn!(flow = %flow_id, "skipping stop dag because this dag manager instance is not active");
            return Ok(());
        }
        let execution_ids = self
            .job_status_retriever
            .latest_execution_ids_for_flow(
                &flow_id.flow_name,
                &flow_id.flow_group,
                self.config.stop_dag_execution_limit,
            )
            .await?;
        tracing::info!(flow = %flow_id, count = execution_ids.len(), "found flow executions to cancel");
        for flow_execution_id in execution_ids {
            let dag_id = DagId::new(
                flow_id.flow_group.clone(),
                flow_id.flow_name.clone(),
                flow_execution_id,
            );
            Self::offer_cancel(&state, self.config.num_threads, dag_id)?;
        }
        Ok(())
    }

    /// Handles a kill request from the event bus or a direct invocation.
    pub async fn handle_kill_flow_request(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
    ) {
        let state = self.state.lock().await;
        if !state.active {
            return;
        }
        tracing::info!(
            flow_group,
            flow_name,
            flow_execution_id,
            "received kill request for flow"
        );
        let dag_id = DagId::new(flow_group, flow_name, flow_execution_id);
        if let Err(error) = Self::offer_cancel(&state, self.config.num_threads, dag_id) {
            tracing::warn!(%error, "failed to enqueue flow kill");
        }
    }

    /// Handles a resume request from the event bus or a direct invocation.
    pub async fn handle_resume_flow_request(
        &self,
        flow_group: &str,
        flow_name: &str,
        flow_execution_id: i64,
    ) {
        let state = self.state.lock().await;
        if !state.active {
            return;
        }
        tracing::info!(
            flow_group,
            flow_name,
            flow_execution_id,
            "received resume request for flow"
        );
        let dag_id = DagId::new(flow_group, flow_name, flow_execution_id);
        let shard = shard_for(dag_id.flow_execution_id, self.config.num_threads);
        let sent = state
            .shards
            .get(shard)
            .map(|queues| queues.resume.send(dag_id.clone()).is_ok());
        if sent != Some(true) {
            tracing::warn!(%dag_id, shard, "failed to enqueue flow resume");
        }
    }

    /// Replaces the executor topology.
    ///
    /// Serialised against the other supervisor operations.
    pub async fn set_topologies(&self, producers: HashMap<String, Arc<dyn SpecProducer>>) {
        let _state = self.state.lock().await;
        self.topology.set_producers(producers);
    }

    /// Re-runs the recovery load; scheduled by the housekeeping task.
    async fn resync(&self) -> Result<()> {
        let state = self.state.lock().await;
        if !state.active {
            return Ok(());
        }
        let dags = self.dag_state_store.get_dags().await?;
        tracing::info!(count = dags.len(), "re-syncing dags from the dag state store");
        for dag in dags {
            Self::offer_dag(&state, self.config.num_threads, dag)?;
        }
        Ok(())
    }

    fn offer_dag(state: &ManagerState, num_threads: usize, dag: JobDag) -> Result<()> {
        let Some(dag_id) = dag.dag_id() else {
            tracing::warn!("dag without an id; ignoring the dag");
            return Ok(());
        };
        let shard = shard_for(dag_id.flow_execution_id, num_threads);
        let Some(queues) = state.shards.get(shard) else {
            return Err(Error::QueueRejected { dag_id, shard });
        };
        queues
            .submit
            .send(dag)
            .map_err(|_| Error::QueueRejected { dag_id, shard })
    }

    fn offer_cancel(state: &ManagerState, num_threads: usize, dag_id: DagId) -> Result<()> {
        let shard = shard_for(dag_id.flow_execution_id, num_threads);
        let Some(queues) = state.shards.get(shard) else {
            return Err(Error::QueueRejected { dag_id, shard });
        };
        queues
            .cancel
            .send(dag_id.clone())
            .map_err(|_| Error::QueueRejected { dag_id, shard })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::memory::InMemoryDagActionStore;
    use crate::events::InMemoryEventSink;
    use crate::plan::{JobExecutionPlan, JobSpec};
    use crate::producer::memory::InMemorySpecProducer;
    use crate::status::memory::InMemoryStatusBoard;
    use crate::status::JobStatus;
    use chrono::Utc;

    const EXECUTOR: &str = "weft:executor";

    struct Fixture {
        manager: Arc<DagManager>,
        live_store: Arc<InMemoryDagStateStore>,
        action_store: Arc<InMemoryDagActionStore>,
        board: Arc<InMemoryStatusBoard>,
        producer: Arc<InMemorySpecProducer>,
        sink: Arc<InMemoryEventSink>,
        catalog: Arc<InMemoryFlowCatalog>,
    }

    fn fixture() -> Fixture {
        let config = DagManagerConfig {
            num_threads: 3,
            polling_interval: Duration::from_millis(20),
            ..DagManagerConfig::default()
        };
        let live_store = Arc::new(InMemoryDagStateStore::new());
        let failed_store = Arc::new(InMemoryDagStateStore::new());
        let action_store = Arc::new(InMemoryDagActionStore::new());
        let board = Arc::new(InMemoryStatusBoard::new());
        let producer = Arc::new(InMemorySpecProducer::new());
        let sink = Arc::new(InMemoryEventSink::new());
        let catalog = Arc::new(InMemoryFlowCatalog::new());
        let topology = Arc::new(TopologyRegistry::new());
        topology.register(EXECUTOR, producer.clone());

        let manager = Arc::new(
            DagManagerBuilder::new(config, board.clone())
                .dag_state_store(live_store.clone())
                .failed_dag_state_store(failed_store)
                .dag_action_store(action_store.clone())
                .flow_catalog(catalog.clone())
                .event_sink(sink.clone())
                .topology(topology)
                .build(),
        );

        Fixture {
            manager,
            live_store,
            action_store,
            board,
            producer,
            sink,
            catalog,
        }
    }

    fn one_job_dag(job_name: &str, execution_id: i64) -> JobDag {
        let mut dag = JobDag::default();
        dag.add_job(JobExecutionPlan::new(
            JobSpec::new(format!("weft:{job_name}"), job_name, "etl", "orders", execution_id)
                .with_user("alice"),
            EXECUTOR,
        ))
        .unwrap();
        dag
    }

    fn recent_execution_id() -> i64 {
        Utc::now().timestamp_millis() - 60_000
    }

    #[test]
    fn routing_is_execution_id_mod_num_threads() {
        assert_eq!(shard_for(100, 3), 1);
        assert_eq!(shard_for(101, 3), 2);
        assert_eq!(shard_for(102, 3), 0);
        // Stable for any request kind and safe on degenerate inputs.
        assert_eq!(shard_for(-1, 3), 2);
        assert_eq!(shard_for(100, 0), 0);
    }

    #[tokio::test]
    async fn inactive_manager_drops_mutations_silently() {
        let f = fixture();
        let dag = one_job_dag("job0", recent_execution_id());

        f.manager.add_dag(dag, true, true).await.unwrap();
        assert_eq!(f.live_store.len().unwrap(), 0);
        assert!(f.sink.names().is_empty());

        f.manager
            .handle_kill_flow_request("etl", "orders", 100)
            .await;
        f.manager.handle_resume_flow_request("etl", "orders", 100).await;
        f.manager
            .stop_dag(&FlowId::new("etl", "orders"))
            .await
            .unwrap();
        assert!(!f.manager.is_active().await);
    }

    #[tokio::test]
    async fn add_dag_persists_then_deletes_the_launch_action() {
        let f = fixture();
        f.manager.set_active(true).await.unwrap();

        let dag = one_job_dag("job0", recent_execution_id());
        let dag_id = dag.dag_id().unwrap();
        let launch = DagAction::new(&dag_id, DagActionType::Launch);
        f.action_store.add_dag_action(&launch).await.unwrap();

        f.manager.add_dag(dag, true, true).await.unwrap();

        assert!(f.live_store.contains(&dag_id).unwrap());
        assert!(!f.action_store.exists(&launch).await.unwrap());
        assert!(f.sink.names().contains(&"FLOW_PENDING".to_string()));

        // The owning shard picks the dag up and dispatches its job.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.producer.submission_count(), 1);
        assert!(f.sink.names().contains(&"FLOW_RUNNING".to_string()));

        f.manager.set_active(false).await.unwrap();
    }

    #[tokio::test]
    async fn adhoc_flow_spec_is_removed_after_submission() {
        let f = fixture();
        f.manager.set_active(true).await.unwrap();

        let adhoc = FlowSpec::new("weft:flows/adhoc", false);
        let scheduled = FlowSpec::new("weft:flows/scheduled", true);
        f.catalog.put(adhoc.clone()).unwrap();
        f.catalog.put(scheduled.clone()).unwrap();

        f.manager
            .add_dag_and_remove_adhoc_flow_spec(
                &adhoc,
                one_job_dag("job0", recent_execution_id()),
                true,
                false,
            )
            .await
            .unwrap();
        f.manager
            .add_dag_and_remove_adhoc_flow_spec(
                &scheduled,
                one_job_dag("job0", recent_execution_id() + 1),
                true,
                false,
            )
            .await
            .unwrap();

        assert!(!f.catalog.contains(&adhoc.uri).unwrap());
        assert!(f.catalog.contains(&scheduled.uri).unwrap());

        f.manager.set_active(false).await.unwrap();
    }

    #[tokio::test]
    async fn activation_recovers_persisted_dags() {
        let f = fixture();
        let dag = one_job_dag("job0", recent_execution_id());
        f.live_store.write_checkpoint(&dag).await.unwrap();

        f.manager.set_active(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(f.producer.submission_count(), 1);
        assert!(f.sink.names().contains(&"FLOW_RUNNING".to_string()));

        f.manager.set_active(false).await.unwrap();
        assert!(!f.manager.is_active().await);
    }

    #[tokio::test]
    async fn sticky_kill_cancels_each_execution_on_its_owning_shard() {
        let f = fixture();
        f.manager.set_active(true).await.unwrap();

        // Three executions landing on three different shards.
        let now = recent_execution_id();
        let base = now - now % 3;
        let execution_ids = vec![base, base + 1, base + 2];
        let mut kills = Vec::new();
        for &execution_id in &execution_ids {
            let dag = one_job_dag("job0", execution_id);
            let dag_id = dag.dag_id().unwrap();
            let kill = DagAction::new(&dag_id, DagActionType::Kill);
            f.action_store.add_dag_action(&kill).await.unwrap();
            kills.push(kill);
            f.manager.add_dag(dag, true, false).await.unwrap();
            f.board
                .set_job_status(&dag_id, "etl", "job0", JobStatus::new("RUNNING", 1))
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(f.producer.submission_count(), 3);

        f.board
            .set_executions("etl", "orders", execution_ids)
            .unwrap();
        f.manager.stop_dag(&FlowId::new("etl", "orders")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        // Every execution was cancelled by the shard that admitted it (the
        // submission handles only exist there), and each KILL action is gone.
        assert_eq!(f.producer.cancellations().len(), 3);
        for kill in kills {
            assert!(!f.action_store.exists(&kill).await.unwrap());
        }

        f.manager.set_active(false).await.unwrap();
    }

    #[tokio::test]
    async fn deactivation_gates_later_mutations() {
        let f = fixture();
        f.manager.set_active(true).await.unwrap();
        f.manager.set_active(false).await.unwrap();

        f.manager
            .add_dag(one_job_dag("job0", recent_execution_id()), true, true)
            .await
            .unwrap();
        assert_eq!(f.live_store.len().unwrap(), 0);
    }
}
