//! In-memory dag-action store for testing.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{DagAction, DagActionStore};
use crate::error::{Error, Result};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("dag action store lock poisoned")
}

/// In-memory dag-action store for tests.
#[derive(Debug, Default)]
pub struct InMemoryDagActionStore {
    actions: RwLock<HashSet<DagAction>>,
}

impl InMemoryDagActionStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DagActionStore for InMemoryDagActionStore {
    async fn add_dag_action(&self, action: &DagAction) -> Result<()> {
        self.actions
            .write()
            .map_err(poison_err)?
            .insert(action.clone());
        Ok(())
    }

    async fn delete_dag_action(&self, action: &DagAction) -> Result<bool> {
        Ok(self.actions.write().map_err(poison_err)?.remove(action))
    }

    async fn exists(&self, action: &DagAction) -> Result<bool> {
        Ok(self.actions.read().map_err(poison_err)?.contains(action))
    }

    async fn get_dag_actions(&self) -> Result<Vec<DagAction>> {
        Ok(self
            .actions
            .read()
            .map_err(poison_err)?
            .iter()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::DagActionType;
    use weft_core::DagId;

    #[tokio::test]
    async fn add_exists_delete() {
        let store = InMemoryDagActionStore::new();
        let dag_id = DagId::new("etl", "orders", 100);
        let action = DagAction::new(&dag_id, DagActionType::Kill);

        store.add_dag_action(&action).await.unwrap();
        assert!(store.exists(&action).await.unwrap());
        assert_eq!(store.get_dag_actions().await.unwrap().len(), 1);

        assert!(store.delete_dag_action(&action).await.unwrap());
        assert!(!store.delete_dag_action(&action).await.unwrap());
        assert!(!store.exists(&action).await.unwrap());
    }

    #[test]
    fn action_round_trips_to_dag_id() {
        let dag_id = DagId::new("etl", "orders", 100);
        let action = DagAction::new(&dag_id, DagActionType::Resume);
        assert_eq!(action.dag_id(), dag_id);
    }
}
