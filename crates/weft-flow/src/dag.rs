//! The job DAG supervised by the manager.
//!
//! A [`JobDag`] is a directed acyclic graph whose nodes carry a
//! [`JobExecutionPlan`], plus the flow-level bookkeeping that travels with
//! the DAG through checkpoints: the pending terminal event, its message, and
//! the instant the event was last emitted.
//!
//! The graph is held in a petgraph `DiGraph`; the durable form is a portable
//! `(jobs, edges)` pair so checkpoints do not depend on petgraph internals.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use weft_core::DagId;

use crate::error::{Error, Result};
use crate::events::FlowEvent;
use crate::plan::{ExecutionStatus, FailureOption, JobExecutionPlan};

/// A DAG of jobs belonging to one flow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "SerializedDag", into = "SerializedDag")]
pub struct JobDag {
    graph: DiGraph<JobExecutionPlan, ()>,
    index_map: HashMap<String, NodeIndex>,
    failure_option: FailureOption,
    flow_event: Option<FlowEvent>,
    message: Option<String>,
    event_emitted_at_millis: Option<i64>,
}

impl JobDag {
    /// Creates an empty DAG with the given failure option.
    #[must_use]
    pub fn new(failure_option: FailureOption) -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            failure_option,
            flow_event: None,
            message: None,
            event_emitted_at_millis: None,
        }
    }

    /// Adds a job node to the DAG.
    ///
    /// # Errors
    ///
    /// Returns an error if a job with the same name already exists.
    pub fn add_job(&mut self, plan: JobExecutionPlan) -> Result<NodeIndex> {
        let name = plan.spec.job_name.clone();
        if self.index_map.contains_key(&name) {
            return Err(Error::configuration(format!("duplicate job name: {name}")));
        }
        let idx = self.graph.add_node(plan);
        self.index_map.insert(name, idx);
        Ok(idx)
    }

    /// Adds a dependency edge: `child` runs only after `parent` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if either job is unknown or the edge would create a
    /// cycle.
    pub fn add_dependency(&mut self, parent: &str, child: &str) -> Result<()> {
        let parent_idx = self.index_of(parent).ok_or_else(|| Error::JobNotFound {
            job: parent.to_string(),
        })?;
        let child_idx = self.index_of(child).ok_or_else(|| Error::JobNotFound {
            job: child.to_string(),
        })?;
        let edge = self.graph.add_edge(parent_idx, child_idx, ());
        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(Error::CycleDetected {
                job: child.to_string(),
            });
        }
        Ok(())
    }

    /// Returns the DAG's identifier, or `None` for an empty DAG.
    ///
    /// Every node carries the owning flow's identity; the first node is
    /// authoritative.
    #[must_use]
    pub fn dag_id(&self) -> Option<DagId> {
        self.graph.node_indices().next().map(|idx| {
            let spec = &self.graph[idx].spec;
            DagId::new(
                spec.flow_group.clone(),
                spec.flow_name.clone(),
                spec.flow_execution_id,
            )
        })
    }

    /// Returns the node index for a job name, if present.
    #[must_use]
    pub fn index_of(&self, job_name: &str) -> Option<NodeIndex> {
        self.index_map.get(job_name).copied()
    }

    /// Returns the plan at a node index.
    #[must_use]
    pub fn node(&self, idx: NodeIndex) -> Option<&JobExecutionPlan> {
        self.graph.node_weight(idx)
    }

    /// Returns the plan at a node index, mutably.
    pub fn node_mut(&mut self, idx: NodeIndex) -> Option<&mut JobExecutionPlan> {
        self.graph.node_weight_mut(idx)
    }

    /// Returns all node indices in insertion order.
    pub fn node_indices(&self) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.node_indices()
    }

    /// Returns the parents of a node.
    pub fn parents(&self, idx: NodeIndex) -> impl Iterator<Item = NodeIndex> + '_ {
        self.graph.neighbors_directed(idx, Direction::Incoming)
    }

    /// Returns the set of nodes ready for submission: jobs in a pending
    /// state all of whose parents completed successfully.
    ///
    /// Results are in insertion order for deterministic dispatch.
    #[must_use]
    pub fn next_nodes(&self) -> Vec<NodeIndex> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                self.graph[idx].is_submittable()
                    && self
                        .parents(idx)
                        .all(|parent| self.graph[parent].status == ExecutionStatus::Complete)
            })
            .collect()
    }

    /// Returns the number of jobs in the DAG.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if the DAG has no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Returns the configured failure option.
    #[must_use]
    pub const fn failure_option(&self) -> FailureOption {
        self.failure_option
    }

    /// Returns the pending terminal flow event, if one was recorded.
    #[must_use]
    pub const fn flow_event(&self) -> Option<FlowEvent> {
        self.flow_event
    }

    /// Sets or clears the pending terminal flow event.
    pub fn set_flow_event(&mut self, event: Option<FlowEvent>) {
        self.flow_event = event;
    }

    /// Returns the message recorded alongside the flow event.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Records a message alongside the flow event.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    /// Returns when the pending flow event was last emitted (epoch millis).
    #[must_use]
    pub const fn event_emitted_at_millis(&self) -> Option<i64> {
        self.event_emitted_at_millis
    }

    /// Stamps when the pending flow event was emitted.
    pub fn set_event_emitted_at_millis(&mut self, at: i64) {
        self.event_emitted_at_millis = Some(at);
    }
}

impl Default for JobDag {
    fn default() -> Self {
        Self::new(FailureOption::default())
    }
}

/// Portable durable form of a [`JobDag`].
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SerializedDag {
    failure_option: FailureOption,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    flow_event: Option<FlowEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_emitted_at_millis: Option<i64>,
    jobs: Vec<JobExecutionPlan>,
    edges: Vec<(usize, usize)>,
}

impl From<JobDag> for SerializedDag {
    fn from(dag: JobDag) -> Self {
        // Node indices are contiguous because nodes are never removed.
        let jobs = dag
            .graph
            .node_indices()
            .map(|idx| dag.graph[idx].clone())
            .collect();
        let edges = dag
            .graph
            .edge_indices()
            .filter_map(|edge| dag.graph.edge_endpoints(edge))
            .map(|(source, target)| (source.index(), target.index()))
            .collect();
        Self {
            failure_option: dag.failure_option,
            flow_event: dag.flow_event,
            message: dag.message,
            event_emitted_at_millis: dag.event_emitted_at_millis,
            jobs,
            edges,
        }
    }
}

impl From<SerializedDag> for JobDag {
    fn from(serialized: SerializedDag) -> Self {
        let mut graph = DiGraph::new();
        let mut index_map = HashMap::new();
        let mut indices = Vec::with_capacity(serialized.jobs.len());
        for plan in serialized.jobs {
            let name = plan.spec.job_name.clone();
            let idx = graph.add_node(plan);
            index_map.insert(name, idx);
            indices.push(idx);
        }
        for (source, target) in serialized.edges {
            if let (Some(&from), Some(&to)) = (indices.get(source), indices.get(target)) {
                graph.add_edge(from, to, ());
            }
        }
        Self {
            graph,
            index_map,
            failure_option: serialized.failure_option,
            flow_event: serialized.flow_event,
            message: serialized.message,
            event_emitted_at_millis: serialized.event_emitted_at_millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::JobSpec;

    fn plan(name: &str) -> JobExecutionPlan {
        JobExecutionPlan::new(
            JobSpec::new(format!("weft:{name}"), name, "etl", "orders", 100),
            "weft:executor",
        )
    }

    fn diamond() -> JobDag {
        // a -> b, a -> c, b -> d, c -> d
        let mut dag = JobDag::default();
        for name in ["a", "b", "c", "d"] {
            dag.add_job(plan(name)).unwrap();
        }
        dag.add_dependency("a", "b").unwrap();
        dag.add_dependency("a", "c").unwrap();
        dag.add_dependency("b", "d").unwrap();
        dag.add_dependency("c", "d").unwrap();
        dag
    }

    fn set_status(dag: &mut JobDag, name: &str, status: ExecutionStatus) {
        let idx = dag.index_of(name).unwrap();
        dag.node_mut(idx).unwrap().status = status;
    }

    #[test]
    fn empty_dag_has_no_id() {
        let dag = JobDag::default();
        assert!(dag.is_empty());
        assert!(dag.dag_id().is_none());
        assert!(dag.next_nodes().is_empty());
    }

    #[test]
    fn dag_id_comes_from_first_job() {
        let mut dag = JobDag::default();
        dag.add_job(plan("a")).unwrap();
        assert_eq!(dag.dag_id().unwrap().to_string(), "etl_orders_100");
    }

    #[test]
    fn duplicate_job_name_is_rejected() {
        let mut dag = JobDag::default();
        dag.add_job(plan("a")).unwrap();
        assert!(dag.add_job(plan("a")).is_err());
    }

    #[test]
    fn cycle_is_rejected_and_edge_rolled_back() {
        let mut dag = JobDag::default();
        dag.add_job(plan("a")).unwrap();
        dag.add_job(plan("b")).unwrap();
        dag.add_dependency("a", "b").unwrap();
        assert!(matches!(
            dag.add_dependency("b", "a"),
            Err(Error::CycleDetected { .. })
        ));
        // The rejected edge must not linger: b is still schedulable once a completes.
        set_status(&mut dag, "a", ExecutionStatus::Complete);
        let next = dag.next_nodes();
        assert_eq!(next, vec![dag.index_of("b").unwrap()]);
    }

    #[test]
    fn next_nodes_walks_the_diamond() {
        let mut dag = diamond();
        assert_eq!(dag.next_nodes(), vec![dag.index_of("a").unwrap()]);

        set_status(&mut dag, "a", ExecutionStatus::Complete);
        assert_eq!(
            dag.next_nodes(),
            vec![dag.index_of("b").unwrap(), dag.index_of("c").unwrap()]
        );

        set_status(&mut dag, "b", ExecutionStatus::Complete);
        set_status(&mut dag, "c", ExecutionStatus::Running);
        // d is blocked until both parents complete.
        assert!(dag.next_nodes().is_empty());

        set_status(&mut dag, "c", ExecutionStatus::Complete);
        assert_eq!(dag.next_nodes(), vec![dag.index_of("d").unwrap()]);
    }

    #[test]
    fn failed_parent_blocks_descendants() {
        let mut dag = diamond();
        set_status(&mut dag, "a", ExecutionStatus::Complete);
        set_status(&mut dag, "b", ExecutionStatus::Failed);
        set_status(&mut dag, "c", ExecutionStatus::Complete);
        // d has a failed parent; only nothing is ready.
        assert!(dag.next_nodes().is_empty());
    }

    #[test]
    fn pending_retry_and_resume_are_schedulable() {
        let mut dag = JobDag::default();
        dag.add_job(plan("a")).unwrap();
        set_status(&mut dag, "a", ExecutionStatus::PendingRetry);
        assert_eq!(dag.next_nodes().len(), 1);
        set_status(&mut dag, "a", ExecutionStatus::PendingResume);
        assert_eq!(dag.next_nodes().len(), 1);
        set_status(&mut dag, "a", ExecutionStatus::Running);
        assert!(dag.next_nodes().is_empty());
    }

    #[test]
    fn serde_round_trip_preserves_structure_and_flow_state() {
        let mut dag = diamond();
        dag.set_flow_event(Some(FlowEvent::Failed));
        dag.set_message("job b failed");
        dag.set_event_emitted_at_millis(12_345);
        set_status(&mut dag, "a", ExecutionStatus::Complete);

        let json = serde_json::to_string(&dag).unwrap();
        let restored: JobDag = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.len(), 4);
        assert_eq!(restored.flow_event(), Some(FlowEvent::Failed));
        assert_eq!(restored.message(), Some("job b failed"));
        assert_eq!(restored.event_emitted_at_millis(), Some(12_345));
        assert_eq!(restored.dag_id(), dag.dag_id());
        // Edges survive: b and c are ready, d is still blocked.
        assert_eq!(
            restored.next_nodes(),
            vec![
                restored.index_of("b").unwrap(),
                restored.index_of("c").unwrap()
            ]
        );
    }
}
