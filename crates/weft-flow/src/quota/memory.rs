//! In-memory quota manager.
//!
//! Tracks in-flight job counts per user and per flow group behind an
//! `RwLock`. Suitable for single-process deployments and tests; a clustered
//! deployment would back the same trait with shared storage.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::QuotaManager;
use crate::dag::JobDag;
use crate::error::{Error, Result};
use crate::plan::{ExecutionStatus, JobExecutionPlan};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("quota manager lock poisoned")
}

#[derive(Debug, Default)]
struct QuotaState {
    counts: HashMap<String, usize>,
    /// Job nodes with an outstanding acquire, keyed by qualified job name.
    acquired: HashSet<String>,
}

/// In-memory quota manager with per-user and per-flow-group caps.
///
/// A cap of 0 means unlimited.
#[derive(Debug)]
pub struct InMemoryQuotaManager {
    state: RwLock<QuotaState>,
    per_user_limit: usize,
    per_flow_group_limit: usize,
}

impl Default for InMemoryQuotaManager {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl InMemoryQuotaManager {
    /// Creates a manager with the given caps (0 = unlimited).
    #[must_use]
    pub fn new(per_user_limit: usize, per_flow_group_limit: usize) -> Self {
        Self {
            state: RwLock::new(QuotaState::default()),
            per_user_limit,
            per_flow_group_limit,
        }
    }

    /// Creates a manager that never refuses.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0, 0)
    }

    fn user_key(plan: &JobExecutionPlan) -> Option<String> {
        if plan.spec.user.is_empty() {
            None
        } else {
            Some(format!("user:{}", plan.spec.user))
        }
    }

    fn flow_group_key(plan: &JobExecutionPlan) -> String {
        format!("flowGroup:{}", plan.spec.flow_group)
    }

    fn acquire_locked(&self, state: &mut QuotaState, plan: &JobExecutionPlan) -> Result<()> {
        let job_key = plan.spec.qualified_name();
        if state.acquired.contains(&job_key) {
            return Ok(());
        }

        if let Some(user_key) = Self::user_key(plan) {
            let current = state.counts.get(&user_key).copied().unwrap_or(0);
            if self.per_user_limit > 0 && current >= self.per_user_limit {
                return Err(Error::QuotaExceeded {
                    subject: user_key,
                    current,
                    limit: self.per_user_limit,
                });
            }
        }
        let group_key = Self::flow_group_key(plan);
        let current = state.counts.get(&group_key).copied().unwrap_or(0);
        if self.per_flow_group_limit > 0 && current >= self.per_flow_group_limit {
            return Err(Error::QuotaExceeded {
                subject: group_key,
                current,
                limit: self.per_flow_group_limit,
            });
        }

        if let Some(user_key) = Self::user_key(plan) {
            *state.counts.entry(user_key).or_insert(0) += 1;
        }
        *state.counts.entry(group_key).or_insert(0) += 1;
        state.acquired.insert(job_key);
        Ok(())
    }

    /// Returns the in-flight count for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn user_count(&self, user: &str) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.counts.get(&format!("user:{user}")).copied().unwrap_or(0))
    }

    /// Returns the in-flight count for a flow group.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn flow_group_count(&self, flow_group: &str) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .counts
            .get(&format!("flowGroup:{flow_group}"))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl QuotaManager for InMemoryQuotaManager {
    async fn init(&self, dags: &[JobDag]) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        for dag in dags {
            for idx in dag.node_indices() {
                let Some(plan) = dag.node(idx) else { continue };
                if matches!(
                    plan.status,
                    ExecutionStatus::Running | ExecutionStatus::Orchestrated
                ) {
                    // Seeding must never refuse: these jobs are already on
                    // executors, the caps only gate new submissions.
                    let job_key = plan.spec.qualified_name();
                    if state.acquired.insert(job_key) {
                        if let Some(user_key) = Self::user_key(plan) {
                            *state.counts.entry(user_key).or_insert(0) += 1;
                        }
                        let group_key = Self::flow_group_key(plan);
                        *state.counts.entry(group_key).or_insert(0) += 1;
                    }
                }
            }
        }
        Ok(())
    }

    async fn check_quota(&self, plan: &JobExecutionPlan) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        self.acquire_locked(&mut state, plan)
    }

    async fn release_quota(&self, plan: &JobExecutionPlan) -> Result<bool> {
        let mut state = self.state.write().map_err(poison_err)?;
        let job_key = plan.spec.qualified_name();
        if !state.acquired.remove(&job_key) {
            return Ok(false);
        }
        if let Some(user_key) = Self::user_key(plan) {
            if let Some(count) = state.counts.get_mut(&user_key) {
                *count = count.saturating_sub(1);
            }
        }
        let group_key = Self::flow_group_key(plan);
        if let Some(count) = state.counts.get_mut(&group_key) {
            *count = count.saturating_sub(1);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::JobSpec;

    fn plan(name: &str, user: &str) -> JobExecutionPlan {
        JobExecutionPlan::new(
            JobSpec::new(format!("weft:{name}"), name, "etl", "orders", 100).with_user(user),
            "weft:executor",
        )
    }

    #[tokio::test]
    async fn acquire_is_idempotent_per_job() {
        let quota = InMemoryQuotaManager::new(2, 0);
        let job = plan("job0", "alice");
        quota.check_quota(&job).await.unwrap();
        // A retry of the same node must not count twice.
        quota.check_quota(&job).await.unwrap();
        assert_eq!(quota.user_count("alice").unwrap(), 1);
    }

    #[tokio::test]
    async fn violation_is_refused_and_release_frees_capacity() {
        let quota = InMemoryQuotaManager::new(1, 0);
        let first = plan("job0", "alice");
        let second = plan("job1", "alice");

        quota.check_quota(&first).await.unwrap();
        assert!(matches!(
            quota.check_quota(&second).await,
            Err(Error::QuotaExceeded { .. })
        ));

        assert!(quota.release_quota(&first).await.unwrap());
        // Releasing again is a no-op and reports so.
        assert!(!quota.release_quota(&first).await.unwrap());
        quota.check_quota(&second).await.unwrap();
    }

    #[tokio::test]
    async fn flow_group_cap_applies_across_users() {
        let quota = InMemoryQuotaManager::new(0, 1);
        quota.check_quota(&plan("job0", "alice")).await.unwrap();
        assert!(quota.check_quota(&plan("job1", "bob")).await.is_err());
        assert_eq!(quota.flow_group_count("etl").unwrap(), 1);
    }

    #[tokio::test]
    async fn init_seeds_running_jobs_without_refusing() {
        let quota = InMemoryQuotaManager::new(1, 0);
        let mut dag = JobDag::default();
        for name in ["job0", "job1"] {
            let mut running = plan(name, "alice");
            running.status = ExecutionStatus::Running;
            dag.add_job(running).unwrap();
        }
        quota.init(std::slice::from_ref(&dag)).await.unwrap();
        // Both recovered jobs are counted even though they exceed the cap.
        assert_eq!(quota.user_count("alice").unwrap(), 2);
        // Their own re-submission is still accepted (already acquired).
        let idx = dag.index_of("job0").unwrap();
        quota.check_quota(dag.node(idx).unwrap()).await.unwrap();
    }
}
