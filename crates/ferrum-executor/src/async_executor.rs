//! Tokio adapter
//!
//! Blocking awaits run on tokio's blocking pool so reactor threads are never
//! parked on the response store.

use crate::{Executor, ExecutorState};
use ferrum_types::{
    ExecutorRequest, FerrumError, IterationStats, RequestId, RequestStatsPerIteration, Response,
    Result,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

/// Cloneable async handle to an [`Executor`]
#[derive(Debug, Clone)]
pub struct AsyncExecutor {
    inner: Arc<Executor>,
}

impl AsyncExecutor {
    pub fn new(executor: Executor) -> Self {
        Self {
            inner: Arc::new(executor),
        }
    }

    pub fn from_arc(executor: Arc<Executor>) -> Self {
        Self { inner: executor }
    }

    /// Underlying blocking executor
    pub fn executor(&self) -> &Arc<Executor> {
        &self.inner
    }

    /// Submission never blocks, so it stays synchronous
    pub fn enqueue_request(&self, request: ExecutorRequest) -> Result<RequestId> {
        self.inner.enqueue_request(request)
    }

    pub fn enqueue_requests(&self, requests: Vec<ExecutorRequest>) -> Vec<Result<RequestId>> {
        self.inner.enqueue_requests(requests)
    }

    pub async fn await_responses(&self, timeout: Option<Duration>) -> Result<Vec<Response>> {
        self.blocking(move |executor| executor.await_responses(timeout))
            .await
    }

    pub async fn await_request_responses(
        &self,
        request_id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<Vec<Response>> {
        self.blocking(move |executor| executor.await_request_responses(request_id, timeout))
            .await
    }

    pub async fn await_responses_for(
        &self,
        request_ids: Vec<RequestId>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Response>>> {
        self.blocking(move |executor| executor.await_responses_for(&request_ids, timeout))
            .await
    }

    /// Collect responses for one request until its terminal response arrives.
    ///
    /// If `timeout` elapses first, returns what arrived so far; the last
    /// response is then not final.
    pub async fn wait_for_completion(
        &self,
        request_id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<Vec<Response>> {
        self.blocking(move |executor| {
            let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
            let mut collected = Vec::new();
            loop {
                let remaining =
                    deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
                let batch = executor.await_request_responses(request_id, remaining)?;
                let finished = batch.iter().any(Response::is_final);
                let timed_out = batch.is_empty();
                collected.extend(batch);
                if finished || timed_out {
                    return Ok(collected);
                }
            }
        })
        .await
    }

    pub fn get_num_responses_ready(&self, request_id: Option<RequestId>) -> usize {
        self.inner.get_num_responses_ready(request_id)
    }

    pub fn cancel_request(&self, request_id: RequestId) {
        self.inner.cancel_request(request_id)
    }

    pub fn get_latest_iteration_stats(&self) -> VecDeque<IterationStats> {
        self.inner.get_latest_iteration_stats()
    }

    pub fn get_latest_request_stats(&self) -> VecDeque<RequestStatsPerIteration> {
        self.inner.get_latest_request_stats()
    }

    pub fn can_enqueue_requests(&self) -> bool {
        self.inner.can_enqueue_requests()
    }

    pub fn state(&self) -> ExecutorState {
        self.inner.state()
    }

    /// Shut down without blocking the runtime while the engine drains
    pub async fn shutdown(&self) -> Result<()> {
        self.blocking(|executor| executor.shutdown()).await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Executor) -> Result<T> + Send + 'static,
    {
        let executor = self.inner.clone();
        task::spawn_blocking(move || f(&executor))
            .await
            .map_err(|e| FerrumError::internal(format!("Blocking executor task failed: {}", e)))?
    }
}

impl From<Executor> for AsyncExecutor {
    fn from(executor: Executor) -> Self {
        Self::new(executor)
    }
}
