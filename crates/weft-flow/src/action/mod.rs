//! Durable log of pending external actions.
//!
//! A [`DagAction`] records a LAUNCH, KILL, or RESUME request so it can be
//! re-driven across leader changes: the new leader replays pending actions,
//! and the old handler deletes an action once the request is safely owned by
//! the in-memory machinery (e.g. the LAUNCH is deleted right after the DAG
//! is persisted to the live store).

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use weft_core::DagId;

use crate::error::Result;

/// The kind of a pending external action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DagActionType {
    /// Launch a new flow execution.
    Launch,
    /// Kill a flow execution.
    Kill,
    /// Resume a failed flow execution.
    Resume,
}

/// One pending external action, keyed by flow identity, execution, and type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagAction {
    /// Group of the target flow.
    pub flow_group: String,
    /// Name of the target flow.
    pub flow_name: String,
    /// Execution the action targets.
    pub flow_execution_id: i64,
    /// What should happen.
    pub action_type: DagActionType,
}

impl DagAction {
    /// Creates an action targeting the given DAG.
    #[must_use]
    pub fn new(dag_id: &DagId, action_type: DagActionType) -> Self {
        Self {
            flow_group: dag_id.flow_group.clone(),
            flow_name: dag_id.flow_name.clone(),
            flow_execution_id: dag_id.flow_execution_id,
            action_type,
        }
    }

    /// Returns the targeted DAG's identifier.
    #[must_use]
    pub fn dag_id(&self) -> DagId {
        DagId::new(
            self.flow_group.clone(),
            self.flow_name.clone(),
            self.flow_execution_id,
        )
    }
}

/// Durable storage for pending dag actions.
#[async_trait]
pub trait DagActionStore: Send + Sync {
    /// Records a pending action. Recording an existing action is a no-op.
    async fn add_dag_action(&self, action: &DagAction) -> Result<()>;

    /// Deletes an action; returns true if it was present.
    async fn delete_dag_action(&self, action: &DagAction) -> Result<bool>;

    /// Returns true if the action is pending.
    async fn exists(&self, action: &DagAction) -> Result<bool>;

    /// Returns all pending actions.
    async fn get_dag_actions(&self) -> Result<Vec<DagAction>>;
}
