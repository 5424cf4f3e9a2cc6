//! Error types for the DAG execution domain.

use weft_core::DagId;

/// The result type used throughout weft-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing DAG executions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Adding a dependency would create a cycle.
    #[error("cycle detected in job dag at job: {job}")]
    CycleDetected {
        /// The job whose dependency closed the cycle.
        job: String,
    },

    /// A DAG was not found where one was expected.
    #[error("dag not found: {dag_id}")]
    DagNotFound {
        /// The missing DAG's identifier.
        dag_id: DagId,
    },

    /// A job was not found within a DAG.
    #[error("job not found: {job}")]
    JobNotFound {
        /// The missing job's name.
        job: String,
    },

    /// A shard queue refused an enqueue.
    #[error("could not enqueue dag {dag_id} on shard {shard}")]
    QueueRejected {
        /// The DAG that could not be enqueued.
        dag_id: DagId,
        /// The shard whose queue refused the offer.
        shard: usize,
    },

    /// A concurrency quota would be exceeded.
    #[error("quota exceeded for {subject}: {current}/{limit}")]
    QuotaExceeded {
        /// The quota subject (user or flow group).
        subject: String,
        /// The count already in flight.
        current: usize,
        /// The configured cap.
        limit: usize,
    },

    /// No spec producer is registered for an executor.
    #[error("no spec producer registered for executor: {executor_uri}")]
    UnknownExecutor {
        /// The unresolved executor URI.
        executor_uri: String,
    },

    /// A job submission failed.
    #[error("job submission failed: {message}")]
    Submission {
        /// Description of the submission failure.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A value could not be serialized or deserialized.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Description of the invalid value.
        message: String,
    },
}

impl Error {
    /// Creates an [`Error::Storage`] without an underlying cause.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an [`Error::Storage`] wrapping an underlying cause.
    pub fn storage_with(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an [`Error::Submission`] with the given message.
    pub fn submission(message: impl Into<String>) -> Self {
        Self::Submission {
            message: message.into(),
        }
    }

    /// Creates an [`Error::Serialization`] with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates an [`Error::Configuration`] with the given message.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
