//! In-memory status board for testing.
//!
//! A programmable implementation of [`JobStatusRetriever`]: tests seed
//! statuses (or sequences of statuses) per job and per flow, and the worker
//! observes them exactly as it would from the real status pipeline.

use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use weft_core::DagId;

use super::{JobStatus, JobStatusRetriever, NA_KEY};
use crate::error::{Error, Result};

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("status board lock poisoned")
}

type StatusKey = (String, String, String);

/// In-memory, programmable status board.
#[derive(Debug, Default)]
pub struct InMemoryStatusBoard {
    statuses: RwLock<HashMap<StatusKey, VecDeque<JobStatus>>>,
    executions: RwLock<HashMap<(String, String), Vec<i64>>>,
}

impl InMemoryStatusBoard {
    /// Creates a new empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(dag_id: &DagId, job_group: &str, job_name: &str) -> StatusKey {
        (
            dag_id.to_string(),
            job_group.to_string(),
            job_name.to_string(),
        )
    }

    /// Sets the current status of one job, replacing any queued sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the board lock is poisoned.
    pub fn set_job_status(
        &self,
        dag_id: &DagId,
        job_group: &str,
        job_name: &str,
        status: JobStatus,
    ) -> Result<()> {
        let mut statuses = self.statuses.write().map_err(poison_err)?;
        statuses.insert(
            Self::key(dag_id, job_group, job_name),
            VecDeque::from([status]),
        );
        Ok(())
    }

    /// Queues a further status for one job: each poll consumes one queued
    /// status until only the last remains, which then repeats.
    ///
    /// # Errors
    ///
    /// Returns an error if the board lock is poisoned.
    pub fn push_job_status(
        &self,
        dag_id: &DagId,
        job_group: &str,
        job_name: &str,
        status: JobStatus,
    ) -> Result<()> {
        let mut statuses = self.statuses.write().map_err(poison_err)?;
        statuses
            .entry(Self::key(dag_id, job_group, job_name))
            .or_default()
            .push_back(status);
        Ok(())
    }

    /// Sets the flow-level status of an execution.
    ///
    /// # Errors
    ///
    /// Returns an error if the board lock is poisoned.
    pub fn set_flow_status(&self, dag_id: &DagId, status: JobStatus) -> Result<()> {
        self.set_job_status(dag_id, NA_KEY, NA_KEY, status)
    }

    /// Records the known execution ids of a flow, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the board lock is poisoned.
    pub fn set_executions(
        &self,
        flow_group: &str,
        flow_name: &str,
        execution_ids: Vec<i64>,
    ) -> Result<()> {
        let mut executions = self.executions.write().map_err(poison_err)?;
        executions.insert(
            (flow_group.to_string(), flow_name.to_string()),
            execution_ids,
        );
        Ok(())
    }
}

#[async_trait]
impl JobStatusRetriever for InMemoryStatusBoard {
    async fn latest_execution_ids_for_flow(
        &self,
        flow_name: &str,
        flow_group: &str,
        limit: usize,
    ) -> Result<Vec<i64>> {
        let executions = self.executions.read().map_err(poison_err)?;
        Ok(executions
            .get(&(flow_group.to_string(), flow_name.to_string()))
            .map(|ids| ids.iter().take(limit).copied().collect())
            .unwrap_or_default())
    }

    async fn job_status(
        &self,
        dag_id: &DagId,
        job_group: &str,
        job_name: &str,
    ) -> Result<Option<JobStatus>> {
        let mut statuses = self.statuses.write().map_err(poison_err)?;
        let Some(queue) = statuses.get_mut(&Self::key(dag_id, job_group, job_name)) else {
            return Ok(None);
        };
        if queue.len() > 1 {
            Ok(queue.pop_front())
        } else {
            Ok(queue.front().cloned())
        }
    }
}
