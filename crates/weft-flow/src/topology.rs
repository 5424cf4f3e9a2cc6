//! Executor topology: which spec producer serves which executor URI.
//!
//! A read-mostly map from executor URI to [`SpecProducer`]. The supervisor
//! replaces the whole map when the topology registry pushes an update;
//! worker shards resolve producers on every submission and cancellation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::producer::SpecProducer;

fn recover<T>(poisoned: PoisonError<T>) -> T {
    poisoned.into_inner()
}

/// Registry of spec producers keyed by executor URI.
#[derive(Default)]
pub struct TopologyRegistry {
    producers: RwLock<HashMap<String, Arc<dyn SpecProducer>>>,
}

impl TopologyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the producer for one executor.
    pub fn register(&self, executor_uri: impl Into<String>, producer: Arc<dyn SpecProducer>) {
        self.producers
            .write()
            .unwrap_or_else(recover)
            .insert(executor_uri.into(), producer);
    }

    /// Replaces the whole topology.
    pub fn set_producers(&self, producers: HashMap<String, Arc<dyn SpecProducer>>) {
        *self.producers.write().unwrap_or_else(recover) = producers;
    }

    /// Resolves the producer for an executor URI.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownExecutor`] if no producer is registered.
    pub fn producer_for(&self, executor_uri: &str) -> Result<Arc<dyn SpecProducer>> {
        self.producers
            .read()
            .unwrap_or_else(recover)
            .get(executor_uri)
            .cloned()
            .ok_or_else(|| Error::UnknownExecutor {
                executor_uri: executor_uri.to_string(),
            })
    }
}

impl std::fmt::Debug for TopologyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let uris: Vec<String> = self
            .producers
            .read()
            .unwrap_or_else(recover)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("TopologyRegistry")
            .field("executors", &uris)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::memory::InMemorySpecProducer;

    #[test]
    fn register_and_resolve() {
        let registry = TopologyRegistry::new();
        assert!(registry.producer_for("weft:executor").is_err());
        registry.register("weft:executor", Arc::new(InMemorySpecProducer::new()));
        assert!(registry.producer_for("weft:executor").is_ok());
    }

    #[test]
    fn set_producers_replaces_the_map() {
        let registry = TopologyRegistry::new();
        registry.register("weft:old", Arc::new(InMemorySpecProducer::new()));
        let mut producers: HashMap<String, Arc<dyn SpecProducer>> = HashMap::new();
        producers.insert(
            "weft:new".to_string(),
            Arc::new(InMemorySpecProducer::new()),
        );
        registry.set_producers(producers);
        assert!(registry.producer_for("weft:old").is_err());
        assert!(registry.producer_for("weft:new").is_ok());
    }
}
