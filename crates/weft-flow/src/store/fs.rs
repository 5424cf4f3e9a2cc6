//! Filesystem-backed DAG state store.
//!
//! The default production store: one JSON file per DAG under a root
//! directory, named `{dag_id}.json`. Writes go through a temp file and an
//! atomic rename so a crash mid-checkpoint never leaves a truncated file.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use weft_core::DagId;

use super::DagStateStore;
use crate::dag::JobDag;
use crate::error::{Error, Result};

/// Filesystem-backed DAG state store.
#[derive(Debug, Clone)]
pub struct FsDagStateStore {
    root: PathBuf,
}

impl FsDagStateStore {
    /// Opens (creating if needed) a store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root directory cannot be created.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::storage_with(format!("creating {}", root.display()), e))?;
        Ok(Self { root })
    }

    fn path_for(&self, dag_id: &DagId) -> PathBuf {
        self.root.join(format!("{dag_id}.json"))
    }

    fn dag_id_from_path(path: &Path) -> Option<DagId> {
        path.file_stem()?.to_str()?.parse().ok()
    }
}

#[async_trait]
impl DagStateStore for FsDagStateStore {
    async fn write_checkpoint(&self, dag: &JobDag) -> Result<()> {
        let dag_id = dag
            .dag_id()
            .ok_or_else(|| Error::storage("cannot checkpoint an empty dag"))?;
        let json = serde_json::to_vec_pretty(dag)
            .map_err(|e| Error::serialization(format!("serializing dag {dag_id}: {e}")))?;
        let path = self.path_for(&dag_id);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| Error::storage_with(format!("writing {}", tmp.display()), e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::storage_with(format!("renaming to {}", path.display()), e))?;
        Ok(())
    }

    async fn get_dag(&self, dag_id: &DagId) -> Result<Option<JobDag>> {
        let path = self.path_for(dag_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::storage_with(format!("reading {}", path.display()), e)),
        };
        let dag = serde_json::from_slice(&bytes)
            .map_err(|e| Error::serialization(format!("deserializing dag {dag_id}: {e}")))?;
        Ok(Some(dag))
    }

    async fn get_dags(&self) -> Result<Vec<JobDag>> {
        let mut dags = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::storage_with(format!("listing {}", self.root.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage_with(format!("listing {}", self.root.display()), e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            match tokio::fs::read(&path).await {
                Ok(bytes) => match serde_json::from_slice::<JobDag>(&bytes) {
                    Ok(dag) => dags.push(dag),
                    Err(error) => {
                        // Skip the corrupt checkpoint; the housekeeping
                        // re-sync will retry the load later.
                        tracing::warn!(path = %path.display(), %error, "skipping unreadable dag checkpoint");
                    }
                },
                Err(error) => {
                    tracing::warn!(path = %path.display(), %error, "skipping unreadable dag checkpoint");
                }
            }
        }
        Ok(dags)
    }

    async fn get_dag_ids(&self) -> Result<HashSet<DagId>> {
        let mut ids = HashSet::new();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| Error::storage_with(format!("listing {}", self.root.display()), e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::storage_with(format!("listing {}", self.root.display()), e))?
        {
            let path = entry.path();
            if path.extension().map_or(true, |ext| ext != "json") {
                continue;
            }
            if let Some(dag_id) = Self::dag_id_from_path(&path) {
                ids.insert(dag_id);
            }
        }
        Ok(ids)
    }

    async fn clean_up(&self, dag_id: &DagId) -> Result<()> {
        let path = self.path_for(dag_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage_with(
                format!("removing {}", path.display()),
                e,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ExecutionStatus, JobExecutionPlan, JobSpec};

    fn one_job_dag(execution_id: i64) -> JobDag {
        let mut dag = JobDag::default();
        dag.add_job(JobExecutionPlan::new(
            JobSpec::new("weft:job0", "job0", "etl", "orders", execution_id),
            "weft:executor",
        ))
        .unwrap();
        dag
    }

    #[tokio::test]
    async fn checkpoints_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDagStateStore::new(dir.path()).unwrap();

        let mut dag = one_job_dag(100);
        let idx = dag.index_of("job0").unwrap();
        dag.node_mut(idx).unwrap().status = ExecutionStatus::Running;
        let dag_id = dag.dag_id().unwrap();

        store.write_checkpoint(&dag).await.unwrap();
        let restored = store.get_dag(&dag_id).await.unwrap().unwrap();
        let restored_idx = restored.index_of("job0").unwrap();
        assert_eq!(
            restored.node(restored_idx).unwrap().status,
            ExecutionStatus::Running
        );

        assert_eq!(store.get_dags().await.unwrap().len(), 1);
        assert!(store.get_dag_ids().await.unwrap().contains(&dag_id));

        store.clean_up(&dag_id).await.unwrap();
        assert!(store.get_dag(&dag_id).await.unwrap().is_none());
        assert!(store.get_dags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rewriting_a_checkpoint_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDagStateStore::new(dir.path()).unwrap();

        let mut dag = one_job_dag(100);
        store.write_checkpoint(&dag).await.unwrap();
        let idx = dag.index_of("job0").unwrap();
        dag.node_mut(idx).unwrap().status = ExecutionStatus::Complete;
        store.write_checkpoint(&dag).await.unwrap();

        assert_eq!(store.get_dags().await.unwrap().len(), 1);
        let restored = store.get_dag(&dag.dag_id().unwrap()).await.unwrap().unwrap();
        let restored_idx = restored.index_of("job0").unwrap();
        assert_eq!(
            restored.node(restored_idx).unwrap().status,
            ExecutionStatus::Complete
        );
    }

    #[tokio::test]
    async fn corrupt_checkpoint_is_skipped_on_bulk_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDagStateStore::new(dir.path()).unwrap();
        store.write_checkpoint(&one_job_dag(100)).await.unwrap();
        std::fs::write(dir.path().join("etl_orders_101.json"), b"{not json").unwrap();

        let dags = store.get_dags().await.unwrap();
        assert_eq!(dags.len(), 1);
    }

    #[tokio::test]
    async fn missing_dag_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsDagStateStore::new(dir.path()).unwrap();
        let dag_id = DagId::new("etl", "orders", 100);
        assert!(store.get_dag(&dag_id).await.unwrap().is_none());
        store.clean_up(&dag_id).await.unwrap();
    }
}
