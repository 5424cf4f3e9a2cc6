//! Flow-spec catalog access.
//!
//! The manager only needs one operation from the catalog: removing an
//! ad-hoc flow spec (one with no recurring schedule) once its execution has
//! been durably accepted, so the spec is not re-launched later.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A flow specification as seen by the manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowSpec {
    /// The spec's catalog URI.
    pub uri: String,
    /// True if the flow has a recurring schedule.
    pub scheduled: bool,
}

impl FlowSpec {
    /// Creates a flow spec.
    pub fn new(uri: impl Into<String>, scheduled: bool) -> Self {
        Self {
            uri: uri.into(),
            scheduled,
        }
    }
}

/// The flow-spec catalog.
#[async_trait]
pub trait FlowCatalog: Send + Sync {
    /// Removes a spec from the catalog. Removing an absent spec is a no-op.
    async fn remove(&self, uri: &str) -> Result<()>;
}

fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("flow catalog lock poisoned")
}

/// In-memory flow catalog for tests.
#[derive(Debug, Default)]
pub struct InMemoryFlowCatalog {
    specs: RwLock<HashMap<String, FlowSpec>>,
}

impl InMemoryFlowCatalog {
    /// Creates a new empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn put(&self, spec: FlowSpec) -> Result<()> {
        self.specs
            .write()
            .map_err(poison_err)?
            .insert(spec.uri.clone(), spec);
        Ok(())
    }

    /// Returns true if the spec is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn contains(&self, uri: &str) -> Result<bool> {
        Ok(self.specs.read().map_err(poison_err)?.contains_key(uri))
    }
}

#[async_trait]
impl FlowCatalog for InMemoryFlowCatalog {
    async fn remove(&self, uri: &str) -> Result<()> {
        self.specs.write().map_err(poison_err)?.remove(uri);
        Ok(())
    }
}
