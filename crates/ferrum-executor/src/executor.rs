//! Executor facade
//!
//! [`Executor`] is the handle callers hold. It validates and numbers requests,
//! hands them to the engine thread, and serves blocking awaits, counts and
//! statistics out of the shared response store and stats buffers.

use crate::engine::{EngineCommand, EngineShared, ExecutorEngine};
use crate::scope::ExecutorScope;
use crossbeam::channel::{unbounded, Sender};
use ferrum_interfaces::{BackendFactory, EngineSource, ExecutionBackend};
use ferrum_types::{
    ExecutorConfig, ExecutorRequest, FerrumError, IterationStats, ModelType, RequestId,
    RequestIdGenerator, RequestStatsPerIteration, Response, Result,
};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle state of an executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorState {
    /// Constructed, engine not running yet
    Created,
    /// Accepting submissions
    Active,
    /// Shutdown in progress
    ShuttingDown,
    /// Engine stopped and backend released
    Closed,
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecutorState::Created => "created",
            ExecutorState::Active => "active",
            ExecutorState::ShuttingDown => "shutting_down",
            ExecutorState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Request/response executor in front of an inference backend
///
/// `Executor` is `Send + Sync`: any number of threads may enqueue, await and
/// cancel concurrently. Dropping it shuts it down.
pub struct Executor {
    config: ExecutorConfig,
    backend_name: String,
    /// Held for reading while submitting so shutdown cannot interleave
    state: RwLock<ExecutorState>,
    ids: RequestIdGenerator,
    commands: Sender<EngineCommand>,
    shared: EngineShared,
    engine_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Executor {
    /// Start an executor on an already constructed backend
    pub fn new(backend: Box<dyn ExecutionBackend>, config: ExecutorConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| FerrumError::initialization(format!("Invalid executor config: {}", e)))?;

        let backend_name = backend.name().to_string();
        let (commands, receiver) = unbounded();
        let shared = EngineShared::new(&config);
        let engine = ExecutorEngine::new(backend, receiver, shared.clone(), &config);

        let executor = Self {
            config,
            backend_name,
            state: RwLock::new(ExecutorState::Created),
            ids: RequestIdGenerator::new(),
            commands,
            shared,
            engine_handle: Mutex::new(None),
        };

        let handle = engine.spawn()?;
        *executor.engine_handle.lock() = Some(handle);
        *executor.state.write() = ExecutorState::Active;

        info!(
            "Executor started on backend '{}' (shutdown policy {:?})",
            executor.backend_name, executor.config.shutdown_policy
        );
        Ok(executor)
    }

    /// Build the backend from a model artifact on disk and start an executor
    pub fn from_model_path(
        model_path: impl AsRef<Path>,
        model_type: ModelType,
        config: ExecutorConfig,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        if !model_path.exists() {
            return Err(FerrumError::initialization(format!(
                "Model path does not exist: {}",
                model_path.display()
            )));
        }

        let source = EngineSource::ModelPath(model_path.to_path_buf());
        let backend = create_backend(factory, &source, model_type, &config)?;
        Self::new(backend, config)
    }

    /// Build the backend from an in-memory engine plus its JSON model config
    pub fn from_engine_buffer(
        engine: impl Into<Vec<u8>>,
        json_config: &str,
        model_type: ModelType,
        config: ExecutorConfig,
        factory: &dyn BackendFactory,
    ) -> Result<Self> {
        let engine = engine.into();
        if engine.is_empty() {
            return Err(FerrumError::initialization("Engine buffer is empty"));
        }
        let model_config: serde_json::Value = serde_json::from_str(json_config)
            .map_err(|e| FerrumError::initialization(format!("Malformed model config: {}", e)))?;

        let source = EngineSource::Buffer {
            engine,
            model_config,
        };
        let backend = create_backend(factory, &source, model_type, &config)?;
        Self::new(backend, config)
    }

    /// Submit one request
    pub fn enqueue_request(&self, request: ExecutorRequest) -> Result<RequestId> {
        let state = self.state.read();
        ensure_active(*state)?;
        request.validate_for(&self.config)?;
        self.ensure_accepting()?;

        let request_id = self.register()?;
        if self
            .commands
            .send(EngineCommand::Enqueue(vec![(request_id, request)]))
            .is_err()
        {
            self.shared.store.unregister(request_id);
            return Err(FerrumError::executor_closed("engine is not running"));
        }

        debug!("Enqueued request {}", request_id);
        Ok(request_id)
    }

    /// Submit several requests; each succeeds or fails on its own.
    ///
    /// Results line up with the input. Accepted requests reach the backend in
    /// input order.
    pub fn enqueue_requests(&self, requests: Vec<ExecutorRequest>) -> Vec<Result<RequestId>> {
        let state = self.state.read();
        if let Err(e) = ensure_active(*state).and_then(|_| self.ensure_accepting()) {
            return requests.iter().map(|_| Err(e.clone())).collect();
        }

        let mut results = Vec::with_capacity(requests.len());
        let mut batch = Vec::new();
        for request in requests {
            let accepted = request
                .validate_for(&self.config)
                .and_then(|_| self.register());
            match accepted {
                Ok(request_id) => {
                    batch.push((request_id, request));
                    results.push(Ok(request_id));
                }
                Err(e) => results.push(Err(e)),
            }
        }

        if batch.is_empty() {
            return results;
        }

        let accepted: Vec<RequestId> = batch.iter().map(|(id, _)| *id).collect();
        if self.commands.send(EngineCommand::Enqueue(batch)).is_err() {
            for request_id in &accepted {
                self.shared.store.unregister(*request_id);
            }
            for result in results.iter_mut().filter(|r| r.is_ok()) {
                *result = Err(FerrumError::executor_closed("engine is not running"));
            }
            return results;
        }

        debug!(
            "Enqueued {} of {} requests",
            accepted.len(),
            results.len()
        );
        results
    }

    /// Wait for responses to any request.
    ///
    /// Returns everything buffered once at least one response is available,
    /// or an empty list when the timeout elapses. `None` waits indefinitely.
    pub fn await_responses(&self, timeout: Option<Duration>) -> Result<Vec<Response>> {
        self.shared.store.wait_any(timeout)
    }

    /// Wait for responses to one request
    pub fn await_request_responses(
        &self,
        request_id: RequestId,
        timeout: Option<Duration>,
    ) -> Result<Vec<Response>> {
        self.shared.store.wait_request(request_id, timeout)
    }

    /// Wait until any of the given requests has responses; results are positional
    pub fn await_responses_for(
        &self,
        request_ids: &[RequestId],
        timeout: Option<Duration>,
    ) -> Result<Vec<Vec<Response>>> {
        self.shared.store.wait_requests(request_ids, timeout)
    }

    /// Buffered responses for one request, or for all requests
    pub fn get_num_responses_ready(&self, request_id: Option<RequestId>) -> usize {
        self.shared.store.num_ready(request_id)
    }

    /// Ask the engine to cancel a request. Unknown or finished requests are ignored.
    pub fn cancel_request(&self, request_id: RequestId) {
        let state = self.state.read();
        if *state != ExecutorState::Active {
            debug!("Ignoring cancel for {} while {}", request_id, *state);
            return;
        }
        if !self.shared.store.is_pending(request_id) || self.shared.store.is_terminated(request_id)
        {
            debug!("Ignoring cancel for finished or unknown request {}", request_id);
            return;
        }
        if self.commands.send(EngineCommand::Cancel(request_id)).is_err() {
            debug!("Engine gone, dropping cancel for {}", request_id);
        }
    }

    /// Take the iteration statistics collected since the last call
    pub fn get_latest_iteration_stats(&self) -> VecDeque<IterationStats> {
        self.shared.iteration_stats.drain()
    }

    /// Take the per-request statistics collected since the last call
    pub fn get_latest_request_stats(&self) -> VecDeque<RequestStatsPerIteration> {
        self.shared.request_stats.drain()
    }

    /// Whether a submission could currently succeed
    pub fn can_enqueue_requests(&self) -> bool {
        *self.state.read() == ExecutorState::Active
            && self.shared.accepting.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ExecutorState {
        *self.state.read()
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &str {
        &self.backend_name
    }

    /// Requests submitted whose terminal response has not been consumed
    pub fn num_pending_requests(&self) -> usize {
        self.shared.store.num_pending()
    }

    /// Iteration snapshots evicted before they were drained
    pub fn num_dropped_iteration_stats(&self) -> u64 {
        self.shared.iteration_stats.num_dropped()
    }

    /// Enter a scope that shuts the executor down when it ends
    pub fn enter(&self) -> ExecutorScope<'_> {
        ExecutorScope::new(self)
    }

    /// Leave a scope, logging the error that ended it if any, and shut down
    pub fn exit(&self, error: Option<&dyn std::error::Error>) -> Result<()> {
        match error {
            Some(e) => warn!("Executor scope exited with error: {}", e),
            None => debug!("Executor scope exited"),
        }
        self.shutdown()
    }

    /// Run `f` inside a scope
    pub fn scoped<R>(&self, f: impl FnOnce(&Executor) -> R) -> R {
        let scope = self.enter();
        f(&scope)
    }

    /// Stop the executor.
    ///
    /// Stops accepting submissions, lets the engine quiesce according to the
    /// configured [`ShutdownPolicy`](ferrum_types::ShutdownPolicy), joins the
    /// engine thread and wakes every blocked awaiter. Later calls do nothing.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            match *state {
                ExecutorState::ShuttingDown | ExecutorState::Closed => return Ok(()),
                ExecutorState::Created | ExecutorState::Active => {}
            }
            *state = ExecutorState::ShuttingDown;
        }

        info!(
            "Shutting down executor ({} requests pending)",
            self.shared.store.num_pending()
        );
        self.shared.accepting.store(false, Ordering::SeqCst);

        if self
            .commands
            .send(EngineCommand::Shutdown(self.config.shutdown_policy))
            .is_err()
        {
            debug!("Engine already stopped");
        }

        let joined = self.engine_handle.lock().take().map(JoinHandle::join);
        self.shared.store.close();
        *self.state.write() = ExecutorState::Closed;

        if let Some(Err(_)) = joined {
            return Err(FerrumError::internal("executor engine thread panicked"));
        }

        info!("Executor closed");
        Ok(())
    }

    fn register(&self) -> Result<RequestId> {
        let request_id = self.ids.next_id();
        if !self
            .shared
            .store
            .register_bounded(request_id, self.config.max_queue_size)
        {
            return Err(FerrumError::resource_exhausted(format!(
                "max_queue_size {} requests already pending",
                self.config.max_queue_size.unwrap_or_default()
            )));
        }
        Ok(request_id)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.shared.accepting.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FerrumError::resource_exhausted(format!(
                "backend '{}' is not accepting requests",
                self.backend_name
            )))
        }
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("Executor shutdown on drop failed: {}", e);
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("backend", &self.backend_name)
            .field("state", &self.state())
            .field("pending", &self.shared.store.num_pending())
            .finish()
    }
}

fn ensure_active(state: ExecutorState) -> Result<()> {
    match state {
        ExecutorState::Active => Ok(()),
        other => Err(FerrumError::executor_closed(format!(
            "executor is {}",
            other
        ))),
    }
}

fn create_backend(
    factory: &dyn BackendFactory,
    source: &EngineSource,
    model_type: ModelType,
    config: &ExecutorConfig,
) -> Result<Box<dyn ExecutionBackend>> {
    if !factory.supported_model_types().contains(&model_type) {
        return Err(FerrumError::initialization(format!(
            "Backend factory '{}' does not support model type {}",
            factory.name(),
            model_type
        )));
    }

    info!(
        "Creating {} backend with factory '{}'",
        model_type,
        factory.name()
    );
    factory.create(source, model_type, config).map_err(|e| match e {
        FerrumError::Initialization { .. } => e,
        other => FerrumError::initialization(format!(
            "Backend factory '{}' failed: {}",
            factory.name(),
            other
        )),
    })
}
