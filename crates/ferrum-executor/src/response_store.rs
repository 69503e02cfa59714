//! Response store shared between the engine thread and caller threads
//!
//! Holds published, not yet consumed responses per request plus the set of
//! requests still pending. Every mutation happens under one mutex and wakes
//! waiters through a condition variable, so a response is either fully
//! visible to an awaiting caller or not visible at all.

use ferrum_types::{FerrumError, RequestId, Response, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Thread-safe buffer of responses keyed by request id
#[derive(Debug, Default)]
pub struct ResponseStore {
    state: Mutex<StoreState>,
    ready: Condvar,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Unconsumed responses, FIFO per request
    buffered: BTreeMap<RequestId, VecDeque<Response>>,
    /// Submitted requests whose terminal response has not been consumed
    pending: HashSet<RequestId>,
    /// Pending requests whose terminal response is already buffered
    terminated: HashSet<RequestId>,
    num_buffered: usize,
    closed: bool,
}

impl StoreState {
    fn take(&mut self, request_id: RequestId) -> Vec<Response> {
        let Some(queue) = self.buffered.remove(&request_id) else {
            return Vec::new();
        };
        self.num_buffered -= queue.len();
        if self.terminated.remove(&request_id) {
            self.pending.remove(&request_id);
        }
        queue.into()
    }

    fn take_all(&mut self) -> Vec<Response> {
        let ids: Vec<RequestId> = self.buffered.keys().copied().collect();
        ids.into_iter().flat_map(|id| self.take(id)).collect()
    }

    fn has_buffered(&self, request_id: RequestId) -> bool {
        self.buffered.contains_key(&request_id)
    }
}

impl ResponseStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a request to the pending set
    pub fn register(&self, request_id: RequestId) {
        self.state.lock().pending.insert(request_id);
    }

    /// Add a request to the pending set unless `limit` requests are already pending
    pub fn register_bounded(&self, request_id: RequestId, limit: Option<usize>) -> bool {
        let mut state = self.state.lock();
        if let Some(limit) = limit {
            if state.pending.len() >= limit {
                return false;
            }
        }
        state.pending.insert(request_id);
        true
    }

    /// Remove a request that never reached the engine
    pub fn unregister(&self, request_id: RequestId) {
        let mut state = self.state.lock();
        if !state.has_buffered(request_id) {
            state.pending.remove(&request_id);
        }
    }

    /// Publish one response and wake waiters
    pub fn publish(&self, response: Response) -> bool {
        self.publish_batch(vec![response]) == 1
    }

    /// Publish responses atomically and wake waiters.
    ///
    /// Responses for requests that are not pending, or that already have a
    /// terminal response buffered, are dropped. Returns how many were kept.
    pub fn publish_batch(&self, responses: Vec<Response>) -> usize {
        if responses.is_empty() {
            return 0;
        }

        let mut accepted = 0;
        {
            let mut state = self.state.lock();
            for response in responses {
                let id = response.request_id;
                if !state.pending.contains(&id) || state.terminated.contains(&id) {
                    debug!("Dropping response for inactive request {}", id);
                    continue;
                }
                if response.is_final() {
                    state.terminated.insert(id);
                }
                state.buffered.entry(id).or_default().push_back(response);
                state.num_buffered += 1;
                accepted += 1;
            }
        }

        if accepted > 0 {
            self.ready.notify_all();
        }
        accepted
    }

    /// Remove and return buffered responses, for one request or all of them
    pub fn consume(&self, request_id: Option<RequestId>) -> Vec<Response> {
        let mut state = self.state.lock();
        match request_id {
            Some(id) => state.take(id),
            None => state.take_all(),
        }
    }

    /// Block until any response is available or the timeout elapses.
    ///
    /// Returns every buffered response, ascending by request id and FIFO per
    /// request. An empty result means the timeout elapsed.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Result<Vec<Response>> {
        let mut state = self.state.lock();
        let deadline = deadline_after(timeout);

        loop {
            if state.num_buffered > 0 {
                return Ok(state.take_all());
            }
            if state.closed {
                return Err(closed_error());
            }
            if !self.park(&mut state, deadline) {
                return Ok(state.take_all());
            }
        }
    }

    /// Block until a response for `request_id` is available or the timeout elapses
    pub fn wait_request(
        &self,
        request_id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<Vec<Response>> {
        let mut state = self.state.lock();
        let deadline = deadline_after(timeout);

        loop {
            if state.has_buffered(request_id) {
                return Ok(state.take(request_id));
            }
            if state.closed {
                return Err(closed_error());
            }
            if !state.pending.contains(&request_id) {
                return Err(FerrumError::unknown_request(request_id));
            }
            if !self.park(&mut state, deadline) {
                return Ok(state.take(request_id));
            }
        }
    }

    /// Block until any of `request_ids` has a response or the timeout elapses.
    ///
    /// The result is positional; ids without data get an empty list. Unknown
    /// ids fail the whole call before any waiting happens, unless the store is
    /// closed with nothing buffered for them.
    pub fn wait_requests(
        &self,
        request_ids: &[RequestId],
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Response>>> {
        let mut state = self.state.lock();
        if state.closed && !request_ids.iter().any(|id| state.has_buffered(*id)) {
            return Err(closed_error());
        }
        if let Some(unknown) = request_ids
            .iter()
            .find(|id| !state.pending.contains(id))
        {
            return Err(FerrumError::unknown_request(*unknown));
        }

        let deadline = deadline_after(timeout);
        let take_each = |state: &mut StoreState| -> Vec<Vec<Response>> {
            request_ids.iter().map(|id| state.take(*id)).collect()
        };

        loop {
            if request_ids.iter().any(|id| state.has_buffered(*id)) {
                return Ok(take_each(&mut state));
            }
            if state.closed {
                return Err(closed_error());
            }
            if request_ids.iter().all(|id| !state.pending.contains(id)) {
                return Ok(take_each(&mut state));
            }
            if !self.park(&mut state, deadline) {
                return Ok(take_each(&mut state));
            }
        }
    }

    /// Number of buffered responses, for one request or across all of them
    pub fn num_ready(&self, request_id: Option<RequestId>) -> usize {
        let state = self.state.lock();
        match request_id {
            Some(id) => state.buffered.get(&id).map_or(0, VecDeque::len),
            None => state.num_buffered,
        }
    }

    /// Number of requests still pending
    pub fn num_pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Whether the request is still pending
    pub fn is_pending(&self, request_id: RequestId) -> bool {
        self.state.lock().pending.contains(&request_id)
    }

    /// Whether the request's terminal response is buffered but not yet consumed
    pub fn is_terminated(&self, request_id: RequestId) -> bool {
        self.state.lock().terminated.contains(&request_id)
    }

    /// Close the store: waiters with nothing to return fail with `ExecutorClosed`
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Whether the store was closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Park on the condition variable. Returns `false` once the deadline passed.
    fn park(
        &self,
        state: &mut parking_lot::MutexGuard<'_, StoreState>,
        deadline: Option<Instant>,
    ) -> bool {
        match deadline {
            Some(deadline) => {
                if Instant::now() >= deadline {
                    return false;
                }
                !self.ready.wait_until(state, deadline).timed_out()
            }
            None => {
                self.ready.wait(state);
                true
            }
        }
    }
}

fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|timeout| Instant::now().checked_add(timeout))
}

fn closed_error() -> FerrumError {
    FerrumError::executor_closed("executor shut down while waiting for responses")
}
