//! In-memory DAG state store for testing.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: State is lost when the process exits

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use weft_core::DagId;

use super::DagStateStore;
use crate::dag::JobDag;
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("dag state store lock poisoned")
}

/// In-memory DAG state store for tests.
#[derive(Debug, Default)]
pub struct InMemoryDagStateStore {
    dags: RwLock<HashMap<DagId, JobDag>>,
}

impl InMemoryDagStateStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored DAGs.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        Ok(self.dags.read().map_err(poison_err)?.len())
    }

    /// Returns true if a checkpoint exists for the id.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn contains(&self, dag_id: &DagId) -> Result<bool> {
        Ok(self.dags.read().map_err(poison_err)?.contains_key(dag_id))
    }
}

#[async_trait]
impl DagStateStore for InMemoryDagStateStore {
    async fn write_checkpoint(&self, dag: &JobDag) -> Result<()> {
        let dag_id = dag
            .dag_id()
            .ok_or_else(|| Error::storage("cannot checkpoint an empty dag"))?;
        self.dags
            .write()
            .map_err(poison_err)?
            .insert(dag_id, dag.clone());
        Ok(())
    }

    async fn get_dag(&self, dag_id: &DagId) -> Result<Option<JobDag>> {
        Ok(self.dags.read().map_err(poison_err)?.get(dag_id).cloned())
    }

    async fn get_dags(&self) -> Result<Vec<JobDag>> {
        Ok(self.dags.read().map_err(poison_err)?.values().cloned().collect())
    }

    async fn get_dag_ids(&self) -> Result<HashSet<DagId>> {
        Ok(self.dags.read().map_err(poison_err)?.keys().cloned().collect())
    }

    async fn clean_up(&self, dag_id: &DagId) -> Result<()> {
        self.dags.write().map_err(poison_err)?.remove(dag_id);
        Ok(())
    }
}
