//! In-memory spec producer for testing.
//!
//! Records submissions and cancellations instead of talking to an executor.
//! Submission acknowledgements complete immediately; a failure toggle lets
//! tests exercise the submission-failure path.

use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use super::{JobHandle, SpecProducer};
use crate::error::{Error, Result};
use crate::plan::JobSpec;

/// In-memory spec producer for tests.
#[derive(Debug, Default)]
pub struct InMemorySpecProducer {
    submissions: RwLock<Vec<JobSpec>>,
    cancellations: RwLock<Vec<(String, BTreeMap<String, String>)>>,
    next_token: AtomicU64,
    fail_submissions: AtomicBool,
}

impl InMemorySpecProducer {
    /// Creates a new producer that accepts every submission.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent submissions fail (or succeed again).
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// Returns all accepted submissions, in order.
    #[must_use]
    pub fn submissions(&self) -> Vec<JobSpec> {
        self.submissions.read().map(|s| s.clone()).unwrap_or_default()
    }

    /// Returns the number of accepted submissions.
    #[must_use]
    pub fn submission_count(&self) -> usize {
        self.submissions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Returns all cancel requests as `(spec_uri, props)` pairs, in order.
    #[must_use]
    pub fn cancellations(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.cancellations
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SpecProducer for InMemorySpecProducer {
    async fn add_spec(&self, spec: &JobSpec) -> Result<JobHandle> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(Error::submission(format!(
                "executor rejected {}",
                spec.qualified_name()
            )));
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst);
        self.submissions
            .write()
            .map_err(|_| Error::storage("producer lock poisoned"))?
            .push(spec.clone());
        Ok(JobHandle::new(format!("mem-{token}")))
    }

    async fn await_submission(&self, _handle: &JobHandle) -> Result<()> {
        Ok(())
    }

    fn serialize_handle(&self, handle: &JobHandle) -> Result<String> {
        Ok(handle.token().to_string())
    }

    fn execution_link(&self, handle: &JobHandle, spec_uri: &str) -> String {
        format!("memory://{spec_uri}/{}", handle.token())
    }

    async fn cancel_job(&self, spec_uri: &str, props: &BTreeMap<String, String>) -> Result<()> {
        self.cancellations
            .write()
            .map_err(|_| Error::storage("producer lock poisoned"))?
            .push((spec_uri.to_string(), props.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> JobSpec {
        JobSpec::new(format!("weft:{name}"), name, "etl", "orders", 100)
    }

    #[tokio::test]
    async fn records_submissions_and_cancellations() {
        let producer = InMemorySpecProducer::new();
        let handle = producer.add_spec(&spec("job0")).await.unwrap();
        producer.await_submission(&handle).await.unwrap();
        assert_eq!(producer.submission_count(), 1);

        let mut props = BTreeMap::new();
        props.insert(
            super::super::SERIALIZED_HANDLE_KEY.to_string(),
            producer.serialize_handle(&handle).unwrap(),
        );
        producer.cancel_job("weft:job0", &props).await.unwrap();
        let cancellations = producer.cancellations();
        assert_eq!(cancellations.len(), 1);
        assert_eq!(cancellations[0].0, "weft:job0");
    }

    #[tokio::test]
    async fn failure_toggle_rejects_submissions() {
        let producer = InMemorySpecProducer::new();
        producer.set_fail_submissions(true);
        assert!(producer.add_spec(&spec("job0")).await.is_err());
        assert_eq!(producer.submission_count(), 0);
    }
}
