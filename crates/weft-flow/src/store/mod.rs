//! Durable storage for supervised DAGs.
//!
//! Two logical stores exist: the live store holds DAGs currently being
//! driven, the failed store holds finished-unsuccessful DAGs awaiting
//! resume or retention. Both share the [`DagStateStore`] contract.
//!
//! Durable state is the source of truth: everything the manager keeps in
//! memory is rebuilt from these stores on leader change.

pub mod fs;
pub mod memory;

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use weft_core::DagId;

use crate::dag::JobDag;
use crate::error::Result;

/// Durable key/value storage of serialized DAGs, keyed by [`DagId`].
///
/// The serialization format is the store's concern; the manager only
/// requires key-value semantics. Implementations must be safe for
/// concurrent callers: every worker shard checkpoints through the same
/// store.
#[async_trait]
pub trait DagStateStore: Send + Sync {
    /// Writes (or overwrites) the DAG's durable checkpoint.
    async fn write_checkpoint(&self, dag: &JobDag) -> Result<()>;

    /// Reads one DAG back, or `None` if absent.
    async fn get_dag(&self, dag_id: &DagId) -> Result<Option<JobDag>>;

    /// Reads all stored DAGs.
    async fn get_dags(&self) -> Result<Vec<JobDag>>;

    /// Returns the identifiers of all stored DAGs.
    async fn get_dag_ids(&self) -> Result<HashSet<DagId>>;

    /// Deletes a DAG's checkpoint. Deleting an absent DAG is a no-op.
    async fn clean_up(&self, dag_id: &DagId) -> Result<()>;
}

/// Shared mirror of the failed-dag store's keys.
///
/// Shared across every worker shard and the retention sweep; the only
/// cross-shard mutations are add-on-failure, remove-on-resume, and
/// remove-on-retention. Observation is best-effort.
#[derive(Debug, Clone, Default)]
pub struct FailedDagIds {
    inner: Arc<RwLock<HashSet<DagId>>>,
}

fn recover<T>(poisoned: PoisonError<T>) -> T {
    poisoned.into_inner()
}

impl FailedDagIds {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an id; returns true if it was not present.
    pub fn insert(&self, dag_id: DagId) -> bool {
        self.inner.write().unwrap_or_else(recover).insert(dag_id)
    }

    /// Removes an id; returns true if it was present.
    pub fn remove(&self, dag_id: &DagId) -> bool {
        self.inner.write().unwrap_or_else(recover).remove(dag_id)
    }

    /// Returns true if the id is present.
    #[must_use]
    pub fn contains(&self, dag_id: &DagId) -> bool {
        self.inner.read().unwrap_or_else(recover).contains(dag_id)
    }

    /// Returns a point-in-time copy of the set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DagId> {
        self.inner
            .read()
            .unwrap_or_else(recover)
            .iter()
            .cloned()
            .collect()
    }

    /// Returns the number of ids in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(recover).len()
    }

    /// Returns true if the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_dag_ids_insert_contains_remove() {
        let ids = FailedDagIds::new();
        let dag_id = DagId::new("etl", "orders", 100);
        assert!(ids.insert(dag_id.clone()));
        assert!(!ids.insert(dag_id.clone()));
        assert!(ids.contains(&dag_id));
        assert_eq!(ids.len(), 1);
        assert!(ids.remove(&dag_id));
        assert!(!ids.remove(&dag_id));
        assert!(ids.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_the_live_set() {
        let ids = FailedDagIds::new();
        ids.insert(DagId::new("etl", "orders", 100));
        let snapshot = ids.snapshot();
        ids.insert(DagId::new("etl", "orders", 101));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(ids.len(), 2);
    }
}
