//! Retention sweep over the failed-dag store.
//!
//! Failed DAGs are kept around so they can be resumed; this sweep deletes
//! the ones older than the retention bound. A DAG's age is measured from
//! its flow execution id, which encodes the orchestration instant.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::store::{DagStateStore, FailedDagIds};

/// Periodic purge of failed DAGs older than the retention bound.
pub struct FailedDagRetention {
    failed_dag_state_store: Arc<dyn DagStateStore>,
    failed_dag_ids: FailedDagIds,
    retention: Duration,
}

impl FailedDagRetention {
    /// Creates a sweep over the given failed store and shared id set.
    ///
    /// A zero `retention` disables the sweep.
    #[must_use]
    pub fn new(
        failed_dag_state_store: Arc<dyn DagStateStore>,
        failed_dag_ids: FailedDagIds,
        retention: Duration,
    ) -> Self {
        Self {
            failed_dag_state_store,
            failed_dag_ids,
            retention,
        }
    }

    /// Runs one sweep, returning how many DAGs were purged.
    pub async fn run_once(&self) -> usize {
        if self.retention.is_zero() {
            return 0;
        }
        let started_millis = Utc::now().timestamp_millis();
        let retention_millis = i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX);
        let mut cleaned = 0;

        for dag_id in self.failed_dag_ids.snapshot() {
            if started_millis > dag_id.flow_execution_id.saturating_add(retention_millis) {
                if let Err(error) = self.failed_dag_state_store.clean_up(&dag_id).await {
                    tracing::error!(%dag_id, %error, "failed to purge expired failed dag");
                    continue;
                }
                self.failed_dag_ids.remove(&dag_id);
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            tracing::info!(cleaned, "purged expired dags from the failed dag state store");
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::JobDag;
    use crate::plan::{JobExecutionPlan, JobSpec};
    use crate::store::memory::InMemoryDagStateStore;

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
    async fn purges_only_expired_dags() {
        let store = Arc::new(InMemoryDagStateStore::new());
        let failed_ids = FailedDagIds::new();
        let now = Utc::now().timestamp_millis();

        let expired = one_job_dag(now - 10_000);
        let fresh = one_job_dag(now - 1_000);
        for dag in [&expired, &fresh] {
            store.write_checkpoint(dag).await.unwrap();
            failed_ids.insert(dag.dag_id().unwrap());
        }

        let retention =
            FailedDagRetention::new(store.clone(), failed_ids.clone(), Duration::from_secs(5));
        assert_eq!(retention.run_once().await, 1);

        assert!(!failed_ids.contains(&expired.dag_id().unwrap()));
        assert!(failed_ids.contains(&fresh.dag_id().unwrap()));
        assert!(store
            .get_dag(&expired.dag_id().unwrap())
            .await
            .unwrap()
            .is_none());
        assert!(store
            .get_dag(&fresh.dag_id().unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn zero_retention_disables_the_sweep() {
        let store = Arc::new(InMemoryDagStateStore::new());
        let failed_ids = FailedDagIds::new();
        let old = one_job_dag(0);
        store.write_checkpoint(&old).await.unwrap();
        failed_ids.insert(old.dag_id().unwrap());

        let retention = FailedDagRetention::new(store, failed_ids.clone(), Duration::ZERO);
        assert_eq!(retention.run_once().await, 0);
        assert_eq!(failed_ids.len(), 1);
    }
}
