//! Submission of jobs to remote executors.
//!
//! A [`SpecProducer`] fronts one executor: it accepts job specs, cancels
//! jobs, and hands back an opaque [`JobHandle`] per submission. The handle is
//! stored on the job's node so a later cancellation (possibly after a leader
//! change) can reference the in-flight submission; serializing it for the
//! executor is the producer's own concern.
//!
//! Submission is split in two: [`SpecProducer::add_spec`] starts the
//! submission and returns the handle, [`SpecProducer::await_submission`]
//! blocks until the executor acknowledges it. The split lets the worker
//! checkpoint the DAG with the handle recorded but before the executor ack,
//! so a crash in between still leaves the handle recoverable.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::JobSpec;

/// Property key under which a serialized handle rides on a cancel request.
pub const SERIALIZED_HANDLE_KEY: &str = "weft.producer.serializedHandle";

/// Property key carrying the flow execution id on a cancel request.
pub const FLOW_EXECUTION_ID_KEY: &str = "weft.flow.executionId";

/// Opaque handle to one job submission.
///
/// The token's encoding is producer-defined; the manager only stores it and
/// hands it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobHandle(String);

impl JobHandle {
    /// Wraps a producer-defined token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.0
    }
}

/// Submits and cancels jobs on one remote executor.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent access from the
/// worker shards.
#[async_trait]
pub trait SpecProducer: Send + Sync {
    /// Starts submitting a job, returning an opaque handle once the
    /// submission is in flight.
    async fn add_spec(&self, spec: &JobSpec) -> Result<JobHandle>;

    /// Waits until the executor acknowledges the submission.
    ///
    /// Completion means *submission accepted*, not job completion.
    async fn await_submission(&self, handle: &JobHandle) -> Result<()>;

    /// Serializes a handle so it can ride on a cancel request.
    fn serialize_handle(&self, handle: &JobHandle) -> Result<String>;

    /// Returns a human-facing link to the submission on the executor.
    fn execution_link(&self, handle: &JobHandle, spec_uri: &str) -> String;

    /// Cancels a job on the executor.
    async fn cancel_job(&self, spec_uri: &str, props: &BTreeMap<String, String>) -> Result<()>;
}
