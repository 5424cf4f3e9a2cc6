//! # weft-flow
//!
//! DAG execution manager for the weft data-integration service.
//!
//! The orchestrator hands this crate a fully-built DAG of jobs (a *flow
//! execution*); the crate durably persists it, dispatches each job onto a
//! remote executor once its parents complete, detects failures and
//! deadline breaches, honours kill and resume requests, and cleans up the
//! durable state once the flow's terminal status is confirmed.
//!
//! ## Core Concepts
//!
//! - **[`DagManager`](manager::DagManager)**: The leader-gated supervisor.
//!   Active only while this node holds leadership; on activation it
//!   recovers every in-flight DAG from the durable stores.
//! - **Worker shards**: N parallel loops, each owning a disjoint subset of
//!   DAGs routed by `flow_execution_id mod N`. Kill and resume requests
//!   follow the same routing, because the submission handles live only in
//!   the owning shard.
//! - **Durable stores**: A live store for in-flight DAGs, a failed store
//!   for resumable ones, and an action log that re-drives LAUNCH / KILL /
//!   RESUME requests across leader changes.
//!
//! ## Guarantees
//!
//! - **Checkpoint before dispatch**: A DAG is persisted before its first
//!   job is submitted, and re-checkpointed as it advances.
//! - **At-least-once with idempotent resume**: Executor crashes may rerun
//!   jobs; resuming a failed flow restarts exactly its failed portion.
//! - **Confirmed cleanup**: A DAG leaves the live store only after the
//!   status store reports a terminal flow status.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use weft_flow::config::DagManagerConfig;
//! use weft_flow::dag::JobDag;
//! use weft_flow::error::Result;
//! use weft_flow::manager::DagManagerBuilder;
//! use weft_flow::plan::{JobExecutionPlan, JobSpec};
//! use weft_flow::status::memory::InMemoryStatusBoard;
//!
//! # async fn example() -> Result<()> {
//! let manager = Arc::new(
//!     DagManagerBuilder::new(
//!         DagManagerConfig::default(),
//!         Arc::new(InMemoryStatusBoard::new()),
//!     )
//!     .build(),
//! );
//!
//! // Becomes active when this node wins leadership.
//! manager.set_active(true).await?;
//!
//! let mut dag = JobDag::default();
//! let spec = JobSpec::new("weft:jobs/ingest", "ingest", "etl", "orders", 1_700_000_000_000);
//! dag.add_job(JobExecutionPlan::new(spec, "weft:executors/default"))?;
//! manager.add_dag(dag, true, true).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod action;
pub mod catalog;
pub mod config;
pub mod dag;
pub mod error;
pub mod events;
pub mod manager;
pub mod metrics;
pub mod plan;
pub mod producer;
pub mod quota;
pub mod retention;
pub mod status;
pub mod store;
pub mod topology;

pub(crate) mod worker;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::action::{DagAction, DagActionStore, DagActionType};
    pub use crate::catalog::{FlowCatalog, FlowSpec};
    pub use crate::config::DagManagerConfig;
    pub use crate::dag::JobDag;
    pub use crate::error::{Error, Result};
    pub use crate::events::{EventSink, FlowEvent, JobEvent, TimingEvent};
    pub use crate::manager::{DagManager, DagManagerBuilder};
    pub use crate::metrics::DagManagerMetrics;
    pub use crate::plan::{ExecutionStatus, FailureOption, JobExecutionPlan, JobSpec};
    pub use crate::producer::{JobHandle, SpecProducer};
    pub use crate::quota::QuotaManager;
    pub use crate::retention::FailedDagRetention;
    pub use crate::status::{JobStatus, JobStatusRetriever};
    pub use crate::store::{DagStateStore, FailedDagIds};
    pub use crate::topology::TopologyRegistry;
    pub use weft_core::{DagId, FlowId};
}
