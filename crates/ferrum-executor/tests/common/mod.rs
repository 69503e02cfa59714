//! Shared helpers for executor integration tests

#![allow(dead_code)]

use ferrum_executor::backends::{EchoBackend, EchoModelConfig};
use ferrum_executor::{Executor, ExecutorConfig, ExecutorRequest};
use ferrum_interfaces::{BackendStep, ExecutionBackend};
use ferrum_types::{
    FerrumError, FinishReason, GenerationResult, RequestId, Response, Result, SamplingParams,
    TokenId, TokenUsage,
};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::Once;
use std::thread;
use std::time::{Duration, Instant};

static TEST_INIT: Once = Once::new();

/// Initialize tracing once for the whole test binary
pub fn init_test_env() {
    TEST_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "error".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

pub const WAIT: Duration = Duration::from_secs(5);

/// Executor config with fast idle polling
pub fn test_config() -> ExecutorConfig {
    ExecutorConfig {
        idle_poll_interval_ms: 1,
        drain_timeout_ms: 200,
        ..ExecutorConfig::default()
    }
}

pub fn echo_executor(model: EchoModelConfig) -> Executor {
    init_test_env();
    Executor::new(Box::new(EchoBackend::new(model)), test_config()).unwrap()
}

pub fn greedy_request(tokens: &[u32], max_new_tokens: usize) -> ExecutorRequest {
    ExecutorRequest::from_tokens(tokens, max_new_tokens)
        .with_sampling_params(SamplingParams::greedy())
}

/// Await responses for one request until the terminal one arrives
pub fn collect_until_final(executor: &Executor, request_id: RequestId) -> Vec<Response> {
    let mut collected = Vec::new();
    loop {
        let batch = executor
            .await_request_responses(request_id, Some(WAIT))
            .unwrap();
        assert!(!batch.is_empty(), "timed out waiting for {}", request_id);
        let done = batch.iter().any(Response::is_final);
        collected.extend(batch);
        if done {
            return collected;
        }
    }
}

/// Spin until `count` responses are buffered for the request
pub fn wait_for_ready(executor: &Executor, request_id: Option<RequestId>, count: usize) {
    let deadline = Instant::now() + WAIT;
    while executor.get_num_responses_ready(request_id) < count {
        assert!(Instant::now() < deadline, "responses not ready in time");
        thread::sleep(Duration::from_millis(1));
    }
}

pub fn output_tokens(responses: &[Response]) -> Vec<u32> {
    responses
        .iter()
        .filter_map(Response::generation)
        .flat_map(|g| g.output_token_ids.iter().map(|t| t.get()))
        .collect()
}

#[derive(Debug, Default)]
struct ManualState {
    submitted: Vec<RequestId>,
    active: HashSet<RequestId>,
    outbox: VecDeque<Response>,
    cancel_requests: Vec<RequestId>,
    honor_cancel: bool,
    accepting: bool,
    fail_next_poll: Option<String>,
    reject_submit: bool,
    polls: usize,
    released: bool,
}

/// Backend whose output is scripted by the test through a [`ManualHandle`]
pub struct ManualBackend {
    state: Arc<Mutex<ManualState>>,
}

/// Test-side control of a [`ManualBackend`]
#[derive(Clone)]
pub struct ManualHandle {
    state: Arc<Mutex<ManualState>>,
}

pub fn manual_backend() -> (ManualBackend, ManualHandle) {
    let state = Arc::new(Mutex::new(ManualState {
        honor_cancel: true,
        accepting: true,
        ..ManualState::default()
    }));
    (
        ManualBackend {
            state: state.clone(),
        },
        ManualHandle { state },
    )
}

pub fn manual_executor(config: ExecutorConfig) -> (Executor, ManualHandle) {
    init_test_env();
    let (backend, handle) = manual_backend();
    (Executor::new(Box::new(backend), config).unwrap(), handle)
}

impl ManualHandle {
    /// Queue a response for the next poll
    pub fn push(&self, response: Response) {
        self.state.lock().outbox.push_back(response);
    }

    pub fn push_partial(&self, request_id: RequestId, token: u32) {
        self.push(Response::result(
            request_id,
            GenerationResult::partial(vec![TokenId(token)], TokenUsage::default()),
        ));
    }

    pub fn push_final(&self, request_id: RequestId, token: u32) {
        self.push(Response::result(
            request_id,
            GenerationResult::complete(
                vec![TokenId(token)],
                FinishReason::Length,
                TokenUsage::new(1, 1),
            ),
        ));
    }

    pub fn push_error(&self, request_id: RequestId, message: &str) {
        self.push(Response::error(request_id, FerrumError::backend(message)));
    }

    pub fn set_honor_cancel(&self, honor: bool) {
        self.state.lock().honor_cancel = honor;
    }

    pub fn set_accepting(&self, accepting: bool) {
        self.state.lock().accepting = accepting;
    }

    pub fn set_reject_submit(&self, reject: bool) {
        self.state.lock().reject_submit = reject;
    }

    pub fn fail_next_poll(&self, message: &str) {
        self.state.lock().fail_next_poll = Some(message.to_string());
    }

    pub fn submitted(&self) -> Vec<RequestId> {
        self.state.lock().submitted.clone()
    }

    pub fn cancel_requests(&self) -> Vec<RequestId> {
        self.state.lock().cancel_requests.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    pub fn released(&self) -> bool {
        self.state.lock().released
    }

    /// Wait until the backend has seen `count` submissions
    pub fn wait_for_submitted(&self, count: usize) {
        self.wait_until(|state| state.submitted.len() >= count);
    }

    /// Wait until the backend has seen a cancel call for `request_id`
    pub fn wait_for_cancel(&self, request_id: RequestId) {
        self.wait_until(|state| state.cancel_requests.contains(&request_id));
    }

    /// Wait until the outbox has been drained by a poll
    pub fn wait_for_outbox_drained(&self) {
        self.wait_until(|state| state.outbox.is_empty());
    }

    fn wait_until(&self, condition: impl Fn(&ManualState) -> bool) {
        let deadline = Instant::now() + WAIT;
        while !condition(&self.state.lock()) {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl ExecutionBackend for ManualBackend {
    fn name(&self) -> &str {
        "manual"
    }

    fn submit(&mut self, request_id: RequestId, _request: &ExecutorRequest) -> Result<()> {
        let mut state = self.state.lock();
        state.submitted.push(request_id);
        if state.reject_submit {
            return Err(FerrumError::backend("submission rejected"));
        }
        state.active.insert(request_id);
        Ok(())
    }

    fn poll(&mut self) -> Result<BackendStep> {
        let mut state = self.state.lock();
        state.polls += 1;
        if let Some(message) = state.fail_next_poll.take() {
            return Err(FerrumError::backend(message));
        }

        let responses: Vec<Response> = state.outbox.drain(..).collect();
        for response in &responses {
            if response.is_final() {
                state.active.remove(&response.request_id);
            }
        }
        Ok(BackendStep {
            responses,
            num_queued_requests: 0,
            ..BackendStep::default()
        })
    }

    fn cancel(&mut self, request_id: RequestId) -> bool {
        let mut state = self.state.lock();
        state.cancel_requests.push(request_id);
        state.honor_cancel && state.active.remove(&request_id)
    }

    fn num_active_requests(&self) -> usize {
        self.state.lock().active.len()
    }

    fn can_accept_requests(&self) -> bool {
        self.state.lock().accepting
    }

    fn release(&mut self) -> Result<()> {
        self.state.lock().released = true;
        Ok(())
    }
}
