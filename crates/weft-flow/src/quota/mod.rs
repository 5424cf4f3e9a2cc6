//! Concurrency quota enforcement for job submissions.
//!
//! The quota manager caps how many jobs a user (and a flow group) may have
//! in flight at once. Accounting is exactly-once per job node: the acquire
//! happens on the first submission attempt, stays outstanding across
//! retries, and is released once when the node reaches a terminal status.

pub mod memory;

use async_trait::async_trait;

use crate::dag::JobDag;
use crate::error::Result;
use crate::plan::JobExecutionPlan;

/// Enforces per-user and per-flow-group concurrency caps.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync`; every worker shard checks and releases
/// through the same manager.
#[async_trait]
pub trait QuotaManager: Send + Sync {
    /// Seeds the accounting from DAGs recovered out of the live store, so
    /// counts survive a leader change.
    async fn init(&self, dags: &[JobDag]) -> Result<()>;

    /// Acquires quota for one job node, erroring on violation.
    ///
    /// A node whose quota is already held (a retry, or a recovered running
    /// job) is accepted without acquiring again.
    async fn check_quota(&self, plan: &JobExecutionPlan) -> Result<()>;

    /// Releases the node's quota at terminal status.
    ///
    /// Returns true if an outstanding acquire was actually released, so the
    /// caller can pair metric decrements with real releases.
    async fn release_quota(&self, plan: &JobExecutionPlan) -> Result<bool>;
}
